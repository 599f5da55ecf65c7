//! # Facebench Common Library
//!
//! Shared code for the facebench workspace:
//! - Error type shared by every crate
//! - TOML configuration file and directory resolution
//! - Logging setup

pub mod config;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
