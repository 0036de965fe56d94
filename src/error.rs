//! Internal-subsystem faults.
//!
//! None of these ever reach the host application from a capture path; they
//! are returned by the explicit, fallible operations (opening storage,
//! loading configuration, recovering history) and dropped everywhere else.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("persistent store error: {0}")]
    Persistence(#[from] sled::Error),

    #[error("persisted history is {size} bytes, over the {quota} byte quota")]
    QuotaExceeded { size: usize, quota: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("view probe failed: {0}")]
    Scan(String),

    #[error("internal lock poisoned")]
    Poisoned,
}
