//! Tracing subscriber setup shared by the facebench binaries

use crate::config::LoggingConfig;
use crate::{Error, Result};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Help text for a `-v` count flag; the default level is `info`
pub const VERBOSITY_HELP: &str = "Verbosity (-v debug, -vv trace)";

/// Map a `-v` count onto a level name, if any were given
pub fn level_for_verbosity(verbosity: u8) -> Option<&'static str> {
    match verbosity {
        0 => None,
        1 => Some("debug"),
        _ => Some("trace"),
    }
}

/// Build the filter directive
///
/// Priority: `RUST_LOG` → `-v` count → TOML `[logging] level` → `info`.
pub fn filter_directive(verbosity: u8, logging: &LoggingConfig) -> String {
    if let Ok(from_env) = std::env::var("RUST_LOG") {
        if !from_env.trim().is_empty() {
            return from_env;
        }
    }
    level_for_verbosity(verbosity)
        .map(str::to_string)
        .or_else(|| logging.level.clone())
        .unwrap_or_else(|| "info".to_string())
}

/// Install the global tracing subscriber
///
/// Logs go to stderr unless `[logging] file` names a file, in which case
/// they are appended there without ANSI colors.
pub fn init_logging(verbosity: u8, logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(filter_directive(verbosity, logging))
        .map_err(|e| Error::Config(format!("Invalid log filter: {}", e)))?;

    let (stderr_layer, file_layer) = match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            (None, Some(layer))
        }
        None => (
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
            None,
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Internal(format!("Logging already initialized: {}", e)))
}
