//! Error types for the lease server.

use address_space::AddressError;
use thiserror::Error;

/// Lease server error types.
///
/// Every variant is reported to the requesting client as a failure response;
/// none of them stop the server.
#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("Invalid address: {0}")]
    InvalidFormat(String),

    #[error("No available IP addresses")]
    AddressSpaceExhausted,

    #[error("No pubkey defined")]
    InvalidIdentity,

    #[error("Public key already registered: {0}")]
    DuplicateIdentity(String),

    #[error("No lease for public key: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Persistence(String),

    #[error("Corrupt lease record for {identity}: {reason}")]
    CorruptRecord { identity: String, reason: String },

    #[error("{}", .0.join(", "))]
    Activation(Vec<String>),

    #[error("Invalid password")]
    Authentication,

    #[error("Invalid request: {0}")]
    MalformedRequest(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid address range: {0}")]
    InvalidRange(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LeaseError {
    /// Stable machine-readable code, used in logs.
    pub fn code(&self) -> &'static str {
        match self {
            LeaseError::InvalidFormat(_) => "INVALID_FORMAT",
            LeaseError::AddressSpaceExhausted => "ADDRESS_SPACE_EXHAUSTED",
            LeaseError::InvalidIdentity => "INVALID_IDENTITY",
            LeaseError::DuplicateIdentity(_) => "DUPLICATE_IDENTITY",
            LeaseError::NotFound(_) => "NOT_FOUND",
            LeaseError::Persistence(_) => "PERSISTENCE_FAILURE",
            LeaseError::CorruptRecord { .. } => "CORRUPT_RECORD",
            LeaseError::Activation(_) => "ACTIVATION_FAILURE",
            LeaseError::Authentication => "AUTHENTICATION_FAILURE",
            LeaseError::MalformedRequest(_) => "MALFORMED_REQUEST",
            LeaseError::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            LeaseError::InvalidRange(_) => "INVALID_RANGE",
            LeaseError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<AddressError> for LeaseError {
    fn from(e: AddressError) -> Self {
        match e {
            AddressError::Overflow(_) => LeaseError::AddressSpaceExhausted,
            AddressError::InvalidFormat { .. } => LeaseError::InvalidFormat(e.to_string()),
            AddressError::FamilyMismatch(_, _) | AddressError::InvalidRange(_) => {
                LeaseError::InvalidRange(e.to_string())
            }
        }
    }
}

impl From<std::io::Error> for LeaseError {
    fn from(e: std::io::Error) -> Self {
        LeaseError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for LeaseError {
    fn from(e: serde_json::Error) -> Self {
        LeaseError::Persistence(format!("JSON serialization error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation_message_is_surfaced_as_is() {
        let err = LeaseError::Activation(vec!["Invalid public key".into(), "busy".into()]);
        assert_eq!(err.to_string(), "Invalid public key, busy");
        assert_eq!(err.code(), "ACTIVATION_FAILURE");
    }

    #[test]
    fn test_address_error_conversion() {
        let err: LeaseError = AddressError::Overflow("::".into()).into();
        assert!(matches!(err, LeaseError::AddressSpaceExhausted));

        let err: LeaseError = AddressError::InvalidRange("reversed".into()).into();
        assert!(matches!(err, LeaseError::InvalidRange(_)));

        let err: LeaseError = address_space::Address::parse("nope").unwrap_err().into();
        assert!(matches!(err, LeaseError::InvalidFormat(_)));
    }

    #[test]
    fn test_io_error_is_persistence_failure() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: LeaseError = io.into();
        assert!(matches!(err, LeaseError::Persistence(msg) if msg == "disk full"));
    }
}
