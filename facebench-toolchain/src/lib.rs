//! facebench-toolchain library interface
//!
//! Runs biometric verification experiments: preprocessing, feature
//! extraction, projection, enrollment, scoring with optional ZT score
//! normalization, and grid submission of the same pipeline as array jobs.

pub mod artifacts;
pub mod capabilities;
pub mod components;
pub mod config;
pub mod error;
pub mod file_selector;
pub mod grid;
pub mod registry;
pub mod retry;
pub mod scoring;
pub mod sharder;
pub mod toolchain;
pub mod types;

pub use crate::config::{DirectoryLayout, ExperimentConfig, SkipFlags};
pub use crate::error::{ErrorKind, Result, ToolchainError};
pub use crate::registry::ComponentRegistry;
pub use crate::toolchain::{StageReport, ToolChain};
