//! Admission checks applied before a request reaches the coordinator.

use crate::error::LeaseError;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::{num::NonZeroU32, sync::Arc};
use tracing::{debug, warn};

/// Global rate limiter (not keyed by peer).
pub type GlobalLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiter state shared across connections.
#[derive(Clone)]
pub struct RateLimitState {
    /// Global rate limiter for all requests
    pub global: Arc<GlobalLimiter>,
}

impl RateLimitState {
    /// Create a new rate limit state with the specified limit.
    pub fn new(requests_per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(requests_per_minute)
            .unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_minute(per_minute);

        Self {
            global: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Create a permissive rate limiter for testing.
    pub fn permissive() -> Self {
        Self::new(10_000)
    }

    /// Admit one request or fail with [`LeaseError::RateLimitExceeded`].
    pub fn check(&self) -> Result<(), LeaseError> {
        if self.global.check().is_err() {
            warn!("Global rate limit exceeded");
            return Err(LeaseError::RateLimitExceeded);
        }

        debug!("Rate limit check passed");
        Ok(())
    }
}

/// Shared secret check.
///
/// Only the digest of the configured password is kept, and candidates are
/// compared digest to digest.
#[derive(Clone)]
pub struct Authenticator {
    digest: String,
}

impl Authenticator {
    pub fn new(password: &SecretString) -> Self {
        Self {
            digest: hash_secret(password.expose_secret()),
        }
    }

    /// Accept the request's password or fail with [`LeaseError::Authentication`].
    pub fn verify(&self, candidate: Option<&str>) -> Result<(), LeaseError> {
        match candidate {
            Some(p) if hash_secret(p) == self.digest => Ok(()),
            _ => Err(LeaseError::Authentication),
        }
    }
}

/// Hex encoded SHA-256 of a secret.
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}
