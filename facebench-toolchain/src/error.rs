//! Error types for facebench-toolchain
//!
//! Every failure the driver can observe falls into one of three kinds:
//!
//! - **Config**: a component string cannot be resolved, a capability is
//!   missing, plugin entries collide, or a protocol does not exist. Fatal at
//!   stage entry.
//! - **Data**: an input artifact is missing, a training set is empty, a probe
//!   references an unknown client. Fatal for the work unit.
//! - **Transient**: an I/O operation failed in a likely retryable way. Retried
//!   once per work unit, then escalated to Data.

use thiserror::Error;

/// Uniform classification of a [`ToolchainError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Data,
    Transient,
}

/// Toolchain error type
#[derive(Debug, Error)]
pub enum ToolchainError {
    /// Unresolvable configuration, missing capability, registry collision
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing or malformed input data
    #[error("Data error: {0}")]
    Data(String),

    /// Retryable failure (contended file, interrupted I/O)
    #[error("Transient error: {0}")]
    Transient(String),

    /// Raw I/O error, treated as transient
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Artifact (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// facebench-common error
    #[error("Common error: {0}")]
    Common(#[from] facebench_common::Error),
}

impl ToolchainError {
    /// Classify the error into one of the three kinds
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolchainError::Config(_) => ErrorKind::Config,
            ToolchainError::Data(_) => ErrorKind::Data,
            ToolchainError::Transient(_) => ErrorKind::Transient,
            ToolchainError::Io(err) => io_kind(err),
            ToolchainError::Serialization(_) => ErrorKind::Data,
            ToolchainError::Common(err) => match err {
                facebench_common::Error::Io(err) => io_kind(err),
                facebench_common::Error::Config(_) | facebench_common::Error::Internal(_) => {
                    ErrorKind::Config
                }
            },
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Escalate a (second) transient failure to a data error
    pub fn escalate(self) -> Self {
        match self.kind() {
            ErrorKind::Transient => ToolchainError::Data(format!("retry exhausted: {}", self)),
            _ => self,
        }
    }
}

/// Missing or malformed inputs are data errors; any other I/O may pass
fn io_kind(err: &std::io::Error) -> ErrorKind {
    match err.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::InvalidData => ErrorKind::Data,
        _ => ErrorKind::Transient,
    }
}

/// Result type for toolchain operations
pub type Result<T> = std::result::Result<T, ToolchainError>;
