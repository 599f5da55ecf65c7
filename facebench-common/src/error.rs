//! Error type of the facebench-common crate

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of configuration loading, directory setup and logging
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unreadable TOML, bad log filter
    #[error("Configuration error: {0}")]
    Config(String),

    /// Global state already set, such as a second logging init
    #[error("Internal error: {0}")]
    Internal(String),
}
