//! Admin client errors.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdminError {
    #[error("Admin socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bencode error: {0}")]
    Bencode(#[from] serde_bencode::Error),

    #[error("No reply from admin interface within {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Rejected(String),

    #[error("Unexpected admin reply: {0}")]
    Unexpected(String),
}
