//! Component registry
//!
//! Maps symbolic names to constructors for every component category. A
//! user-supplied string is resolved in this order:
//!
//! 1. an existing file: a TOML configuration module whose attribute named
//!    after the component kind (`tool = ...`) selects the component
//! 2. a registered name (`euclidean`)
//! 3. a construction expression `name(key = value, ...)`, where the
//!    arguments form a TOML inline table and `name` must be registered
//!
//! The registry is an explicit value handed to the driver; there is no
//! process-wide instance. Several distributions may register the same name:
//! lookups then prefer the non-core distribution, and two non-core
//! candidates are a configuration error.

use crate::components::databases::FileListDatabase;
use crate::components::extractors::{FlattenExtractor, StandardizeExtractor};
use crate::components::preprocessors::IdentityPreprocessor;
use crate::components::tools::{EuclideanTool, WhitenTool, WithinClassTool};
use crate::components::{Component, ComponentKind};
use crate::error::{Result, ToolchainError};
use crate::grid::GridProfile;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Distribution name of the built-in components
pub const CORE_DISTRIBUTION: &str = "facebench";

/// Constructor arguments
pub type Params = BTreeMap<String, toml::Value>;

/// Constructor thunk
pub type Constructor = Box<dyn Fn(&Params) -> Result<Component> + Send + Sync>;

/// Box a closure as a [`Constructor`]
pub fn constructor<F>(f: F) -> Constructor
where
    F: Fn(&Params) -> Result<Component> + Send + Sync + 'static,
{
    Box::new(f)
}

// ============================================================================
// Parameter helpers
// ============================================================================

fn wrong_type(key: &str, expected: &str, value: &toml::Value) -> ToolchainError {
    ToolchainError::Config(format!(
        "parameter '{}' must be {}, got {}",
        key,
        expected,
        value.type_str()
    ))
}

pub fn param_bool(params: &Params, key: &str, default: bool) -> Result<bool> {
    match params.get(key) {
        None => Ok(default),
        Some(toml::Value::Boolean(b)) => Ok(*b),
        Some(other) => Err(wrong_type(key, "a boolean", other)),
    }
}

pub fn param_usize(params: &Params, key: &str, default: usize) -> Result<usize> {
    match params.get(key) {
        None => Ok(default),
        Some(toml::Value::Integer(i)) if *i >= 0 => Ok(*i as usize),
        Some(other) => Err(wrong_type(key, "a non-negative integer", other)),
    }
}

pub fn param_f64(params: &Params, key: &str, default: f64) -> Result<f64> {
    match params.get(key) {
        None => Ok(default),
        Some(toml::Value::Float(f)) => Ok(*f),
        Some(toml::Value::Integer(i)) => Ok(*i as f64),
        Some(other) => Err(wrong_type(key, "a number", other)),
    }
}

pub fn param_str(params: &Params, key: &str) -> Result<Option<String>> {
    match params.get(key) {
        None => Ok(None),
        Some(toml::Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(wrong_type(key, "a string", other)),
    }
}

// ============================================================================
// Registry
// ============================================================================

struct Entry {
    distribution: String,
    kind: ComponentKind,
    name: String,
    constructor: Constructor,
}

/// Name → constructor mapping for all component categories
pub struct ComponentRegistry {
    entries: Vec<Entry>,
}

impl ComponentRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registry holding every built-in component
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let core = CORE_DISTRIBUTION;
        let builtins: Vec<(ComponentKind, &str, Constructor)> = vec![
            (
                ComponentKind::Preprocessor,
                "identity",
                constructor(|p| {
                    Ok(Component::Preprocessor(Box::new(
                        IdentityPreprocessor::from_params(p)?,
                    )))
                }),
            ),
            (
                ComponentKind::Extractor,
                "flatten",
                constructor(|_| Ok(Component::Extractor(Box::new(FlattenExtractor)))),
            ),
            (
                ComponentKind::Extractor,
                "standardize",
                constructor(|p| {
                    Ok(Component::Extractor(Box::new(
                        StandardizeExtractor::from_params(p)?,
                    )))
                }),
            ),
            (
                ComponentKind::Tool,
                "euclidean",
                constructor(|p| Ok(Component::Tool(Box::new(EuclideanTool::from_params(p)?)))),
            ),
            (
                ComponentKind::Tool,
                "whiten",
                constructor(|p| Ok(Component::Tool(Box::new(WhitenTool::from_params(p)?)))),
            ),
            (
                ComponentKind::Tool,
                "within-class",
                constructor(|_| Ok(Component::Tool(Box::new(WithinClassTool::new())))),
            ),
            (
                ComponentKind::Database,
                "file-list",
                constructor(|p| {
                    Ok(Component::Database(Box::new(
                        FileListDatabase::from_params(p)?,
                    )))
                }),
            ),
        ];

        for (kind, name, build) in builtins {
            registry.insert(core, kind, name, build);
        }
        for profile in GridProfile::BUILTIN_NAMES {
            let name = profile.to_string();
            registry.insert(
                core,
                ComponentKind::Grid,
                profile,
                constructor(move |p| Ok(Component::Grid(GridProfile::builtin(&name, p)?))),
            );
        }
        registry
    }

    fn insert(&mut self, distribution: &str, kind: ComponentKind, name: &str, constructor: Constructor) {
        self.entries.push(Entry {
            distribution: distribution.to_string(),
            kind,
            name: name.to_string(),
            constructor,
        });
    }

    /// Register a plugin entry
    ///
    /// A distribution may register each (kind, name) once.
    pub fn register(
        &mut self,
        distribution: &str,
        kind: ComponentKind,
        name: &str,
        constructor: Constructor,
    ) -> Result<()> {
        if self
            .entries
            .iter()
            .any(|e| e.distribution == distribution && e.kind == kind && e.name == name)
        {
            return Err(ToolchainError::Config(format!(
                "{} '{}' registered twice by distribution '{}'",
                kind, name, distribution
            )));
        }
        self.insert(distribution, kind, name, constructor);
        Ok(())
    }

    /// Registered names of one kind, sorted
    pub fn names(&self, kind: ComponentKind) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn lookup(&self, kind: ComponentKind, name: &str) -> Result<Option<&Entry>> {
        let candidates: Vec<&Entry> = self
            .entries
            .iter()
            .filter(|e| e.kind == kind && e.name == name)
            .collect();
        if candidates.len() <= 1 {
            return Ok(candidates.into_iter().next());
        }

        let non_core: Vec<&Entry> = candidates
            .iter()
            .copied()
            .filter(|e| e.distribution != CORE_DISTRIBUTION)
            .collect();
        match non_core.as_slice() {
            [single] => Ok(Some(*single)),
            _ => Err(ToolchainError::Config(format!(
                "{} '{}' is ambiguous between distributions: {}",
                kind,
                name,
                non_core
                    .iter()
                    .map(|e| e.distribution.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Construct a registered component
    pub fn construct(&self, kind: ComponentKind, name: &str, params: &Params) -> Result<Component> {
        let entry = self.lookup(kind, name)?.ok_or_else(|| {
            ToolchainError::Config(format!(
                "unknown {} '{}' (registered: {})",
                kind,
                name,
                self.names(kind).join(", ")
            ))
        })?;
        let component = (entry.constructor)(params)?;
        if component.kind() != kind {
            return Err(ToolchainError::Config(format!(
                "entry '{}' of distribution '{}' built a {} instead of a {}",
                name,
                entry.distribution,
                component.kind(),
                kind
            )));
        }
        debug!(kind = %kind, name, distribution = %entry.distribution, "Constructed component");
        Ok(component)
    }

    /// Resolve a user-supplied string to a live component
    pub fn resolve(&self, kind: ComponentKind, spec: &str) -> Result<Component> {
        let spec = spec.trim();
        let path = Path::new(spec);
        if path.is_file() {
            return self.resolve_config_file(kind, path);
        }
        self.resolve_name_or_expression(kind, spec)
    }

    fn resolve_name_or_expression(&self, kind: ComponentKind, spec: &str) -> Result<Component> {
        if self.lookup(kind, spec)?.is_some() {
            return self.construct(kind, spec, &Params::new());
        }
        match parse_expression(spec)? {
            Some((name, params)) => self.construct(kind, &name, &params),
            None => Err(ToolchainError::Config(format!(
                "cannot resolve {} '{}': not a file, a registered name or an expression",
                kind, spec
            ))),
        }
    }

    fn resolve_config_file(&self, kind: ComponentKind, path: &Path) -> Result<Component> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ToolchainError::Config(format!("Read config {} failed: {}", path.display(), e))
        })?;
        let table: toml::Table = toml::from_str(&content).map_err(|e| {
            ToolchainError::Config(format!("Parse config {} failed: {}", path.display(), e))
        })?;

        let value = table.get(kind.keyword()).ok_or_else(|| {
            ToolchainError::Config(format!(
                "config {} has no '{}' attribute",
                path.display(),
                kind.keyword()
            ))
        })?;
        debug!(path = %path.display(), kind = %kind, "Resolving component from config file");

        match value {
            toml::Value::String(spec) => self.resolve_name_or_expression(kind, spec.trim()),
            toml::Value::Table(t) => {
                let mut params: Params = t.clone().into_iter().collect();
                let name = match params.remove("name") {
                    Some(toml::Value::String(name)) => name,
                    _ => {
                        return Err(ToolchainError::Config(format!(
                            "'{}' table in {} needs a string 'name'",
                            kind.keyword(),
                            path.display()
                        )))
                    }
                };
                self.construct(kind, &name, &params)
            }
            other => Err(wrong_type(kind.keyword(), "a string or a table", other)),
        }
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Parse `name(key = value, ...)`; `Ok(None)` when the string has no call form
fn parse_expression(spec: &str) -> Result<Option<(String, Params)>> {
    let Some(open) = spec.find('(') else {
        return Ok(None);
    };
    let Some(inner) = spec[open + 1..].strip_suffix(')') else {
        return Err(ToolchainError::Config(format!(
            "unbalanced construction expression '{}'",
            spec
        )));
    };
    let name = spec[..open].trim();
    if !valid_name(name) {
        return Err(ToolchainError::Config(format!(
            "invalid component name in expression '{}'",
            spec
        )));
    }

    let wrapped = format!("args = {{ {} }}", inner.trim());
    let mut table: toml::Table = toml::from_str(&wrapped).map_err(|e| {
        ToolchainError::Config(format!("invalid arguments in '{}': {}", spec, e))
    })?;
    let params = match table.remove("args") {
        Some(toml::Value::Table(args)) => args.into_iter().collect(),
        _ => Params::new(),
    };
    Ok(Some((name.to_string(), params)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::tools::EuclideanTool;
    use crate::scoring::fusion::FusionStrategy;
    use std::io::Write;

    fn euclidean_constructor() -> Constructor {
        constructor(|p| Ok(Component::Tool(Box::new(EuclideanTool::from_params(p)?))))
    }

    #[test]
    fn test_resolve_registered_name() {
        let registry = ComponentRegistry::with_builtins();
        let tool = registry
            .resolve(ComponentKind::Tool, "euclidean")
            .unwrap()
            .into_tool()
            .unwrap();
        assert_eq!(tool.name(), "euclidean");
    }

    #[test]
    fn test_resolve_expression_with_params() {
        let registry = ComponentRegistry::with_builtins();
        let tool = registry
            .resolve(
                ComponentKind::Tool,
                r#"euclidean(multiple_model_scoring = "max")"#,
            )
            .unwrap()
            .into_tool()
            .unwrap();
        assert_eq!(
            tool.capabilities().multiple_model_scoring,
            Some(FusionStrategy::Max)
        );
    }

    #[test]
    fn test_expression_only_reaches_registered_names() {
        let registry = ComponentRegistry::with_builtins();
        let err = registry
            .resolve(ComponentKind::Tool, "std::process::exit(code = 1)")
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);

        let err = registry.resolve(ComponentKind::Tool, "nonexistent").unwrap_err();
        assert!(err.to_string().contains("cannot resolve"));
    }

    #[test]
    fn test_resolve_config_file_table_form() {
        let registry = ComponentRegistry::with_builtins();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[feature_extractor]\nname = \"standardize\"\nsplit_training_by_client = true"
        )
        .unwrap();

        let extractor = registry
            .resolve(ComponentKind::Extractor, file.path().to_str().unwrap())
            .unwrap()
            .into_extractor()
            .unwrap();
        assert_eq!(extractor.name(), "standardize");
        assert!(extractor.capabilities().split_training_by_client);
    }

    #[test]
    fn test_resolve_config_file_missing_keyword() {
        let registry = ComponentRegistry::with_builtins();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tool = \"euclidean\"").unwrap();
        let err = registry
            .resolve(ComponentKind::Database, file.path().to_str().unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("'database'"));
    }

    #[test]
    fn test_non_core_distribution_preferred() {
        let mut registry = ComponentRegistry::with_builtins();
        registry
            .register(
                "plugin",
                ComponentKind::Tool,
                "whiten",
                euclidean_constructor(),
            )
            .unwrap();
        let tool = registry
            .resolve(ComponentKind::Tool, "whiten")
            .unwrap()
            .into_tool()
            .unwrap();
        assert_eq!(tool.name(), "euclidean");
    }

    #[test]
    fn test_two_non_core_candidates_rejected() {
        let mut registry = ComponentRegistry::with_builtins();
        for dist in ["plugin-a", "plugin-b"] {
            registry
                .register(dist, ComponentKind::Tool, "dup", euclidean_constructor())
                .unwrap();
        }
        let err = registry.resolve(ComponentKind::Tool, "dup").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ComponentRegistry::new();
        registry
            .register("p", ComponentKind::Tool, "t", euclidean_constructor())
            .unwrap();
        assert!(registry
            .register("p", ComponentKind::Tool, "t", euclidean_constructor())
            .is_err());
    }

    #[test]
    fn test_constructor_kind_checked() {
        let mut registry = ComponentRegistry::new();
        registry
            .register("p", ComponentKind::Database, "liar", euclidean_constructor())
            .unwrap();
        assert!(registry.resolve(ComponentKind::Database, "liar").is_err());
    }

    #[test]
    fn test_param_helpers() {
        let mut params = Params::new();
        params.insert("n".into(), toml::Value::Integer(3));
        params.insert("flag".into(), toml::Value::String("yes".into()));
        assert_eq!(param_usize(&params, "n", 0).unwrap(), 3);
        assert_eq!(param_f64(&params, "n", 0.0).unwrap(), 3.0);
        assert_eq!(param_usize(&params, "missing", 7).unwrap(), 7);
        assert!(param_bool(&params, "flag", false).is_err());
    }
}
