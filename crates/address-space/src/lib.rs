//! Address arithmetic for tunnel lease allocation.
//!
//! Addresses are fixed-width tuples of unsigned groups, either the wide
//! family (8 groups of 16 bits, written in hex and separated by `:`) or the
//! narrow family (4 groups of 8 bits, written in decimal and separated by
//! `.`). Every operation is pure and returns a new value.

mod address;
mod error;
mod range;

pub use address::{common_prefix_groups, Address, AddressFamily};
pub use error::AddressError;
pub use range::AddressRange;
