//! Registration coordinator: the address allocator.
//!
//! All cursor movement happens inside one critical section, so two
//! registrations can never be handed the same address. Validation, the
//! existence check and activation run outside it.

use crate::activation::Activator;
use crate::error::LeaseError;
use crate::store::{Lease, Store};
use address_space::{Address, AddressRange};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Progress of a single registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Received,
    Validated,
    Checked,
    Allocated,
    Activated,
    Completed,
    Rejected,
}

/// Outcome of re-activating every lease on record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Leases the tunnel daemon accepted
    pub activated: usize,
    /// Identities that could not be activated, including unreadable records
    pub failed: Vec<String>,
}

impl ReplayReport {
    /// True when nothing failed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Allocation state, only reachable through the coordinator's lock.
struct Allocator {
    cursor: Address,
}

/// Serializes registrations into the lease store.
pub struct Coordinator {
    store: Store,
    range: AddressRange,
    activator: Arc<dyn Activator>,
    allocator: Mutex<Allocator>,
}

impl Coordinator {
    /// Recover allocation state from `store` and build a coordinator.
    ///
    /// The cursor ends up at or above the range start and at or above every
    /// readable lease. A cursor ahead of every lease is kept as is: whatever
    /// lies between was issued and lost in a crash, and stays retired.
    pub async fn open(
        store: Store,
        range: AddressRange,
        activator: Arc<dyn Activator>,
    ) -> Result<Self, LeaseError> {
        let stored = store.stored_cursor().await?;

        let mut cursor = match stored {
            Some(c) if c.family() != range.family() => {
                return Err(LeaseError::InvalidRange(format!(
                    "stored cursor {} does not belong to range {}",
                    c, range
                )));
            }
            Some(c) => c,
            None => {
                info!(start = %range.start(), "No cursor on record, seeding from range start");
                range.start()
            }
        };

        if cursor < range.start() {
            warn!(cursor = %cursor, start = %range.start(), "Cursor below range start, lifting");
            cursor = range.start();
        }

        let mut leases = 0usize;
        let mut corrupt = 0usize;
        let mut highest: Option<Address> = None;
        let mut cursor_leased = false;

        {
            let mut listing = store.list_leases();
            while let Some(item) = listing.next().await {
                match item {
                    Ok(lease) => {
                        leases += 1;
                        if lease.address.family() != range.family() {
                            warn!(
                                identity = %lease.identity,
                                address = %lease.address,
                                "Lease outside range family"
                            );
                            continue;
                        }
                        cursor_leased |= lease.address == cursor;
                        highest = highest.max(Some(lease.address));
                    }
                    Err(LeaseError::CorruptRecord { .. }) => corrupt += 1,
                    Err(e) => return Err(e),
                }
            }
        }

        match highest {
            Some(h) if h > cursor => {
                warn!(cursor = %cursor, highest = %h, "Cursor behind leases on record, advancing");
                cursor = h;
            }
            _ if stored.is_some() && cursor > range.start() && !cursor_leased => {
                warn!(
                    cursor = %cursor,
                    "No readable lease at cursor; addresses up to it stay retired"
                );
            }
            _ => {}
        }

        if stored != Some(cursor) {
            store.put_cursor(&cursor).await?;
        }

        info!(
            range = %range,
            prefix = %range.common_prefix().join(range.family().separator().to_string().as_str()),
            cursor = %cursor,
            leases,
            corrupt,
            "Lease state recovered"
        );

        Ok(Self {
            store,
            range,
            activator,
            allocator: Mutex::new(Allocator { cursor }),
        })
    }

    /// Issue an address to a new identity and activate it.
    ///
    /// An activation failure is reported, but the lease stays on record and
    /// is picked up again by [`Coordinator::replay_all`].
    #[instrument(skip(self, note))]
    pub async fn register(
        &self,
        identity: &str,
        note: Option<String>,
    ) -> Result<Lease, LeaseError> {
        let mut state = RegistrationState::Received;
        let result = self.run(identity, note, &mut state).await;

        match &result {
            Ok(lease) => {
                state = RegistrationState::Completed;
                info!(address = %lease.address, "Registration completed");
            }
            Err(e) => {
                warn!(at = ?state, code = e.code(), error = %e, "Registration rejected");
                state = RegistrationState::Rejected;
            }
        }
        debug!(state = ?state, "Registration finished");

        result
    }

    async fn run(
        &self,
        identity: &str,
        note: Option<String>,
        state: &mut RegistrationState,
    ) -> Result<Lease, LeaseError> {
        if identity.is_empty() {
            return Err(LeaseError::InvalidIdentity);
        }
        *state = RegistrationState::Validated;

        if self.store.has_lease(identity).await? {
            return Err(LeaseError::DuplicateIdentity(identity.to_string()));
        }
        *state = RegistrationState::Checked;

        let lease = self.allocate(identity, note).await?;
        *state = RegistrationState::Allocated;

        self.activator
            .activate(&lease.address, identity)
            .await
            .map_err(LeaseError::Activation)?;
        *state = RegistrationState::Activated;

        Ok(lease)
    }

    /// The critical section: advance the cursor and record the lease.
    async fn allocate(&self, identity: &str, note: Option<String>) -> Result<Lease, LeaseError> {
        let mut allocator = self.allocator.lock().await;

        // A concurrent registration for the same identity may have won.
        if self.store.has_lease(identity).await? {
            return Err(LeaseError::DuplicateIdentity(identity.to_string()));
        }

        let previous = allocator.cursor;
        let candidate = match previous.increment() {
            Ok(next) if self.range.contains(&next) => next,
            _ => return Err(LeaseError::AddressSpaceExhausted),
        };

        self.store.put_cursor(&candidate).await?;
        allocator.cursor = candidate;

        let lease = Lease::new(identity, candidate, note);
        if let Err(e) = self.store.put_lease(&lease).await {
            // The candidate goes back only when no record of it can exist.
            match self.store.has_lease(identity).await {
                Ok(false) => match self.store.put_cursor(&previous).await {
                    Ok(()) => {
                        allocator.cursor = previous;
                        warn!(
                            address = %candidate,
                            error = %e,
                            "Lease write failed, cursor restored"
                        );
                    }
                    Err(restore) => {
                        error!(
                            address = %candidate,
                            error = %e,
                            restore_error = %restore,
                            "Lease write failed and cursor could not be restored; address retired"
                        );
                    }
                },
                Ok(true) => {
                    error!(
                        address = %candidate,
                        error = %e,
                        "Lease write reported failure but the record exists; address retired"
                    );
                }
                Err(check) => {
                    error!(
                        address = %candidate,
                        error = %e,
                        check_error = %check,
                        "Lease write failed and its outcome is unknown; address retired"
                    );
                }
            }
            return Err(e);
        }

        debug!(address = %candidate, "Address allocated");
        Ok(lease)
    }

    /// The lease held by `identity`.
    pub async fn lookup(&self, identity: &str) -> Result<Lease, LeaseError> {
        self.store.get_lease(identity).await
    }

    /// Re-activate every lease on record.
    ///
    /// Individual failures are collected; only a store that cannot be listed
    /// at all fails the whole replay.
    #[instrument(skip(self))]
    pub async fn replay_all(&self) -> Result<ReplayReport, LeaseError> {
        let mut report = ReplayReport::default();
        let activator = &self.activator;
        let mut leases = self.store.list_leases();

        while let Some(item) = leases.next().await {
            match item {
                Ok(lease) => match activator.activate(&lease.address, &lease.identity).await {
                    Ok(()) => report.activated += 1,
                    Err(reasons) => {
                        warn!(
                            identity = %lease.identity,
                            address = %lease.address,
                            reasons = %reasons.join(", "),
                            "Replay activation failed"
                        );
                        report.failed.push(lease.identity);
                    }
                },
                Err(LeaseError::CorruptRecord { identity, .. }) => report.failed.push(identity),
                Err(e) => return Err(e),
            }
        }

        info!(
            activated = report.activated,
            failed = report.failed.len(),
            "Replay finished"
        );
        Ok(report)
    }

    /// The last issued address.
    pub async fn cursor(&self) -> Address {
        self.allocator.lock().await.cursor
    }

    pub fn range(&self) -> &AddressRange {
        &self.range
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}
