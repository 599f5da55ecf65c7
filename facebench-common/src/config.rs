//! Configuration file loading and experiment directory resolution
//!
//! Directory resolution follows a fixed priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable TOML file never terminates the program: a warning
//! is logged and compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the temporary (artifact) root
pub const TEMP_DIR_ENV: &str = "FACEBENCH_TEMP_DIR";

/// Environment variable overriding the user (result) root
pub const USER_DIR_ENV: &str = "FACEBENCH_USER_DIR";

/// Compiled-in defaults used when nothing else is configured
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledDefaults {
    pub temp_dir: PathBuf,
    pub user_dir: PathBuf,
}

impl CompiledDefaults {
    /// Base delay of the linear retry backoff when the TOML sets none
    pub const RETRY_BACKOFF_MS: u64 = 100;

    /// Defaults for the platform the binary was compiled for
    pub fn for_current_platform() -> Self {
        let base = dirs::data_local_dir()
            .map(|d| d.join("facebench"))
            .unwrap_or_else(|| PathBuf::from("./facebench_data"));

        Self {
            temp_dir: base.join("temp"),
            user_dir: base.join("results"),
        }
    }
}

/// `[logging]` section of the TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default)]
    pub level: Option<String>,
    /// Optional log file; stderr when absent
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// `[zt]` section of the TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZtToml {
    /// Exclude same-client Z columns from the B statistics used to Z-norm A
    #[serde(default)]
    pub exclude_same_client_in_b: Option<bool>,
}

/// On-disk TOML configuration
///
/// Every field is optional so that older files keep parsing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    #[serde(default)]
    pub user_dir: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Base delay for the linear retry backoff of transient failures
    #[serde(default)]
    pub retry_backoff_ms: Option<u64>,
    /// Stop a stage at its first failed work unit
    #[serde(default)]
    pub abort_on_unit_failure: Option<bool>,
    #[serde(default)]
    pub zt: ZtToml,
}

impl TomlConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load configuration from an explicit file path
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read TOML {} failed: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }
}

/// Default location of the TOML file for a module
///
/// `~/.config/facebench/<module>.toml` on every platform `dirs` knows about.
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("facebench").join(format!("{}.toml", module_name)))
}

/// Load the TOML configuration with graceful degradation
///
/// An explicit path that cannot be read or parsed is a configuration error.
/// The default path is optional: absence or parse failure logs a warning and
/// yields an empty configuration.
pub fn load_toml_config(module_name: &str, explicit: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = explicit {
        return TomlConfig::from_file(path);
    }

    let Some(path) = default_config_path(module_name) else {
        debug!("No config directory on this platform, using defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        debug!(path = %path.display(), "No config file, using defaults");
        return Ok(TomlConfig::default());
    }

    match TomlConfig::from_file(&path) {
        Ok(config) => Ok(config),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
            Ok(TomlConfig::default())
        }
    }
}

/// Which experiment root is being resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    /// Intermediate artifacts (preprocessed data, features, models, score fragments)
    Temp,
    /// Final score files
    User,
}

impl RootKind {
    fn env_var(self) -> &'static str {
        match self {
            RootKind::Temp => TEMP_DIR_ENV,
            RootKind::User => USER_DIR_ENV,
        }
    }
}

/// Resolves the temp and user roots by priority
pub struct DirectoryResolver<'a> {
    toml: &'a TomlConfig,
    defaults: CompiledDefaults,
}

impl<'a> DirectoryResolver<'a> {
    pub fn new(toml: &'a TomlConfig) -> Self {
        Self {
            toml,
            defaults: CompiledDefaults::for_current_platform(),
        }
    }

    /// Resolve one root: CLI → ENV → TOML → compiled default
    pub fn resolve(&self, kind: RootKind, cli_arg: Option<&Path>) -> PathBuf {
        if let Some(path) = cli_arg {
            return path.to_path_buf();
        }

        if let Ok(path) = std::env::var(kind.env_var()) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        let from_toml = match kind {
            RootKind::Temp => self.toml.temp_dir.as_ref(),
            RootKind::User => self.toml.user_dir.as_ref(),
        };
        if let Some(path) = from_toml {
            return path.clone();
        }

        match kind {
            RootKind::Temp => self.defaults.temp_dir.clone(),
            RootKind::User => self.defaults.user_dir.clone(),
        }
    }
}

/// Create a directory tree, tolerating concurrent creators
///
/// Two shards may create the same directory at the same moment; an
/// `AlreadyExists` outcome is success.
pub fn ensure_directory_exists(path: &Path) -> Result<()> {
    match std::fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_parse_partial_file() {
        let config = TomlConfig::from_toml(
            r#"
            temp_dir = "/scratch/fb"
            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.temp_dir, Some(PathBuf::from("/scratch/fb")));
        assert_eq!(config.user_dir, None);
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
        assert_eq!(config.zt.exclude_same_client_in_b, None);
    }

    #[test]
    fn test_toml_parse_error_is_config_error() {
        let err = TomlConfig::from_toml("temp_dir = [").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_resolver_cli_wins() {
        let toml = TomlConfig {
            temp_dir: Some(PathBuf::from("/from/toml")),
            ..Default::default()
        };
        let resolver = DirectoryResolver::new(&toml);
        let path = resolver.resolve(RootKind::Temp, Some(Path::new("/from/cli")));
        assert_eq!(path, PathBuf::from("/from/cli"));
    }

    #[test]
    #[serial_test::serial]
    fn test_resolver_env_beats_toml() {
        let toml = TomlConfig {
            temp_dir: Some(PathBuf::from("/from/toml")),
            user_dir: Some(PathBuf::from("/from/toml/user")),
            ..Default::default()
        };
        std::env::set_var(TEMP_DIR_ENV, "/from/env");
        std::env::set_var(USER_DIR_ENV, "  ");
        let resolver = DirectoryResolver::new(&toml);
        assert_eq!(resolver.resolve(RootKind::Temp, None), PathBuf::from("/from/env"));
        // Blank variables are ignored
        assert_eq!(resolver.resolve(RootKind::User, None), PathBuf::from("/from/toml/user"));
        std::env::remove_var(TEMP_DIR_ENV);
        std::env::remove_var(USER_DIR_ENV);
    }

    #[test]
    #[serial_test::serial]
    fn test_resolver_falls_back_to_compiled_default() {
        std::env::remove_var(TEMP_DIR_ENV);
        let toml = TomlConfig::default();
        let resolver = DirectoryResolver::new(&toml);
        let path = resolver.resolve(RootKind::Temp, None);
        assert_eq!(path, CompiledDefaults::for_current_platform().temp_dir);
    }

    #[test]
    fn test_explicit_missing_file_is_config_error() {
        let err = load_toml_config("facebench-verify", Some(Path::new("/no/such/file.toml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
