//! Durable lease storage.
//!
//! One record per identity plus a distinguished cursor record holding the
//! last issued address. Records are independent, so a damaged one never
//! blocks access to the others.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::LeaseError;
use address_space::Address;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// A durable identity to address binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Client public key
    pub identity: String,

    /// Issued address
    pub address: Address,

    /// Free text supplied at registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    /// When the lease was issued
    pub leased_at: DateTime<Utc>,
}

impl Lease {
    /// Create a lease issued now.
    pub fn new(identity: impl Into<String>, address: Address, note: Option<String>) -> Self {
        Self {
            identity: identity.into(),
            address,
            note,
            leased_at: Utc::now(),
        }
    }
}

/// On-disk form of the cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CursorRecord {
    pub last_issued_address: Address,
}

/// Storage backend, persistent or in-memory.
pub enum Store {
    /// Directory of JSON records
    File(FileStore),
    /// In-memory only (no persistence)
    Memory(MemoryStore),
}

impl Store {
    /// Open (creating if needed) a file store rooted at `dir`.
    ///
    /// `seed` is reported as the cursor until one has been written.
    pub async fn open(dir: PathBuf, seed: Address) -> Result<Self, LeaseError> {
        let store = FileStore::open(dir, seed).await?;
        info!(path = ?store.dir(), "Using file lease store");
        Ok(Store::File(store))
    }

    /// Force memory store.
    pub fn memory(seed: Address) -> Self {
        Store::Memory(MemoryStore::new(seed))
    }

    /// Whether a record exists for `identity`.
    pub async fn has_lease(&self, identity: &str) -> Result<bool, LeaseError> {
        match self {
            Store::File(s) => s.has_lease(identity).await,
            Store::Memory(s) => s.has_lease(identity).await,
        }
    }

    /// Fetch the lease for `identity`.
    pub async fn get_lease(&self, identity: &str) -> Result<Lease, LeaseError> {
        match self {
            Store::File(s) => s.get_lease(identity).await,
            Store::Memory(s) => s.get_lease(identity).await,
        }
    }

    /// Durably record a lease. On error the previous record, if any, is untouched.
    pub async fn put_lease(&self, lease: &Lease) -> Result<(), LeaseError> {
        match self {
            Store::File(s) => s.put_lease(lease).await,
            Store::Memory(s) => s.put_lease(lease).await,
        }
    }

    /// The last issued address, or the seed if none was ever recorded.
    pub async fn get_cursor(&self) -> Result<Address, LeaseError> {
        Ok(self.stored_cursor().await?.unwrap_or(self.seed()))
    }

    /// The cursor as recorded, `None` before the first write.
    pub async fn stored_cursor(&self) -> Result<Option<Address>, LeaseError> {
        match self {
            Store::File(s) => s.stored_cursor().await,
            Store::Memory(s) => s.stored_cursor().await,
        }
    }

    /// Durably record the cursor, with the same contract as [`Store::put_lease`].
    pub async fn put_cursor(&self, address: &Address) -> Result<(), LeaseError> {
        match self {
            Store::File(s) => s.put_cursor(address).await,
            Store::Memory(s) => s.put_cursor(address).await,
        }
    }

    /// Lazily list every lease record.
    ///
    /// Damaged records surface as [`LeaseError::CorruptRecord`] items and the
    /// listing carries on. Calling again restarts from the beginning.
    pub fn list_leases(&self) -> BoxStream<'_, Result<Lease, LeaseError>> {
        match self {
            Store::File(s) => s.list_leases().boxed(),
            Store::Memory(s) => s.list_leases().boxed(),
        }
    }

    /// Number of lease records.
    pub async fn count(&self) -> Result<usize, LeaseError> {
        let mut count = 0;
        let mut leases = self.list_leases();
        while let Some(item) = leases.next().await {
            match item {
                Ok(_) | Err(LeaseError::CorruptRecord { .. }) => count += 1,
                Err(e) => return Err(e),
            }
        }
        Ok(count)
    }

    fn seed(&self) -> Address {
        match self {
            Store::File(s) => s.seed(),
            Store::Memory(s) => s.seed(),
        }
    }
}
