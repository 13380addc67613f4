//! Error types for spotstack.

use thiserror::Error;

/// Result alias used across the workspace.
pub type SpotstackResult<T> = Result<T, SpotstackError>;

/// Every failure the provisioning core can report.
///
/// The variants follow the failure classes a provisioning run can hit:
/// missing records, external tool failures, unparseable tool output,
/// the package poll deadline, and persistence errors.
#[derive(Debug, Error)]
pub enum SpotstackError {
    /// A referenced record (hardware, package, VM, task) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An external tool exited with a failure status or could not be spawned.
    #[error("tool failed: {0}")]
    Tool(String),

    /// Tool output or on-disk metadata could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// A bounded wait ran out of time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The entity store rejected a read or write.
    #[error("database error: {0}")]
    Database(String),

    /// Local filesystem error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Network transfer error.
    #[error("network error: {0}")]
    Network(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A record is in a state that does not permit the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for SpotstackError {
    fn from(err: std::io::Error) -> Self {
        SpotstackError::Storage(err.to_string())
    }
}
