//! Address errors.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid address '{input}': {reason}")]
    InvalidFormat { input: String, reason: String },

    #[error("Address overflow: no successor for {0}")]
    Overflow(String),

    #[error("Address family mismatch: {0} and {1}")]
    FamilyMismatch(String, String),

    #[error("Invalid address range: {0}")]
    InvalidRange(String),
}

impl AddressError {
    pub(crate) fn format(input: &str, reason: impl Into<String>) -> Self {
        AddressError::InvalidFormat {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}
