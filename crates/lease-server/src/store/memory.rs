//! In-memory lease store.

use super::Lease;
use crate::error::LeaseError;
use address_space::Address;
use futures::Stream;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Non-persistent store, used when persistence is disabled and in tests.
pub struct MemoryStore {
    leases: RwLock<HashMap<String, Lease>>,
    cursor: RwLock<Option<Address>>,
    seed: Address,
    #[cfg(test)]
    pub(crate) faults: Faults,
}

/// Write failure injection.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct Faults {
    pub fail_lease_writes: std::sync::atomic::AtomicBool,
    pub fail_cursor_writes: std::sync::atomic::AtomicBool,
    /// The lease is stored, then the write reports failure.
    pub fail_after_lease_write: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl Faults {
    fn check(flag: &std::sync::atomic::AtomicBool, what: &str) -> Result<(), LeaseError> {
        if flag.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(LeaseError::Persistence(format!("{} write failed", what)));
        }
        Ok(())
    }
}

impl MemoryStore {
    pub fn new(seed: Address) -> Self {
        Self {
            leases: RwLock::new(HashMap::new()),
            cursor: RwLock::new(None),
            seed,
            #[cfg(test)]
            faults: Faults::default(),
        }
    }

    pub(crate) fn seed(&self) -> Address {
        self.seed
    }

    pub async fn has_lease(&self, identity: &str) -> Result<bool, LeaseError> {
        Ok(self.leases.read().await.contains_key(identity))
    }

    pub async fn get_lease(&self, identity: &str) -> Result<Lease, LeaseError> {
        self.leases
            .read()
            .await
            .get(identity)
            .cloned()
            .ok_or_else(|| LeaseError::NotFound(identity.to_string()))
    }

    pub async fn put_lease(&self, lease: &Lease) -> Result<(), LeaseError> {
        #[cfg(test)]
        Faults::check(&self.faults.fail_lease_writes, "lease")?;

        self.leases
            .write()
            .await
            .insert(lease.identity.clone(), lease.clone());

        #[cfg(test)]
        Faults::check(&self.faults.fail_after_lease_write, "lease sync")?;

        Ok(())
    }

    pub async fn stored_cursor(&self) -> Result<Option<Address>, LeaseError> {
        Ok(*self.cursor.read().await)
    }

    pub async fn put_cursor(&self, address: &Address) -> Result<(), LeaseError> {
        #[cfg(test)]
        Faults::check(&self.faults.fail_cursor_writes, "cursor")?;

        *self.cursor.write().await = Some(*address);
        Ok(())
    }

    /// Snapshot of the leases at the time of the first poll.
    pub fn list_leases(&self) -> impl Stream<Item = Result<Lease, LeaseError>> + Send + '_ {
        async_stream::stream! {
            let leases: Vec<Lease> = self.leases.read().await.values().cloned().collect();
            for lease in leases {
                yield Ok(lease);
            }
        }
    }
}
