//! Lease server - issues tunnel addresses to authenticated clients.
//!
//! Clients connect over TCP, present the shared secret and their public key,
//! and receive the next free address of the configured range. Leases are
//! kept in a durable store and handed to the tunnel daemon for activation;
//! after a restart (or on SIGHUP) every lease is replayed into the daemon.

pub mod activation;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod server;
pub mod store;

pub use activation::{Activator, CjdnsActivator};
pub use config::Config;
pub use coordinator::{Coordinator, RegistrationState, ReplayReport};
pub use error::LeaseError;
pub use store::{FileStore, Lease, MemoryStore, Store};
