//! cjdns admin interface client.
//!
//! Speaks the bencoded UDP admin protocol with cookie based authentication.
//! Only the calls needed to authorize tunnel peers are exposed.

mod client;
mod error;
mod types;

pub use client::AdminClient;
pub use error::AdminError;
pub use types::*;
