//! Component protocol
//!
//! The driver never branches on a component's concrete type. It reads the
//! component's [`Capabilities`] record and calls the protocol operations the
//! record says are available.
//!
//! # Component categories
//! - [`Preprocessor`]: raw data → preprocessed sample
//! - [`FeatureExtractor`]: preprocessed sample → feature (optionally trained)
//! - [`Tool`]: projection, enrollment and scoring
//! - [`Database`]: file lists, models, cohorts
//! - grid profiles ([`crate::grid::GridProfile`])
//!
//! Components own the format of their artifacts: they turn values into bytes
//! and back. The driver only decides where the bytes live and writes them
//! atomically.

pub mod databases;
pub mod extractors;
pub mod preprocessors;
pub mod tools;

use crate::error::{Result, ToolchainError};
use crate::grid::GridProfile;
use crate::scoring::fusion::FusionStrategy;
use crate::types::{
    Annotations, Array, ClientId, File, Group, Model, ModelId, ProbeObject, Purpose, TrainingSet,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

// ============================================================================
// Capabilities
// ============================================================================

/// Declared capability record of a component
///
/// Preprocessors leave everything at the default; extractors only use
/// `requires_training` and `split_training_by_client`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Run a training stage before the component's main operation
    pub requires_training: bool,
    /// Run the project stage (and project_train if required)
    pub performs_projection: bool,
    /// Run project_train; only honored with `performs_projection`
    pub requires_projection_training: bool,
    /// Deliver training data as per-client groups
    pub split_training_by_client: bool,
    /// Enroll from projected artifacts instead of raw features
    pub use_projected_features_for_enrollment: bool,
    /// Run enroll_train before enrollment
    pub requires_enroller_training: bool,
    /// Load the projector before training the enroller; `None` follows
    /// `performs_projection`
    pub load_projector_for_enroller_training: Option<bool>,
    /// Reduction across model parts when no native multi-model scorer exists
    pub multiple_model_scoring: Option<FusionStrategy>,
    /// Reduction across probe files when no native multi-probe scorer exists
    pub multiple_probe_scoring: Option<FusionStrategy>,
}

// ============================================================================
// Default artifact codec
// ============================================================================

/// Encode an array as JSON bytes
pub fn encode_array(value: &Array) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode an array from JSON bytes
pub fn decode_array(bytes: &[u8]) -> Result<Array> {
    Ok(serde_json::from_slice(bytes)?)
}

fn unsupported(component: &str, operation: &str) -> ToolchainError {
    ToolchainError::Config(format!("{} does not implement {}", component, operation))
}

// ============================================================================
// Preprocessor
// ============================================================================

/// Turns raw input data into preprocessed samples
pub trait Preprocessor: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Load raw data from the database's original location
    fn read_original(&self, path: &Path) -> Result<Array> {
        let bytes = std::fs::read(path)?;
        decode_array(&bytes)
    }

    fn preprocess(&self, raw: Array, annotations: Option<&Annotations>) -> Result<Array>;

    fn write_data(&self, data: &Array) -> Result<Vec<u8>> {
        encode_array(data)
    }

    fn read_data(&self, bytes: &[u8]) -> Result<Array> {
        decode_array(bytes)
    }
}

// ============================================================================
// Feature extractor
// ============================================================================

/// Turns preprocessed samples into features
pub trait FeatureExtractor: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Train extractor parameters; returns the parameter blob
    fn train(&mut self, _training: &TrainingSet<Array>) -> Result<Vec<u8>> {
        Err(unsupported(self.name(), "train"))
    }

    /// Load previously trained parameters
    fn load(&mut self, _params: &[u8]) -> Result<()> {
        Err(unsupported(self.name(), "load"))
    }

    fn extract(&self, data: &Array) -> Result<Array>;

    fn write_feature(&self, feature: &Array) -> Result<Vec<u8>> {
        encode_array(feature)
    }

    fn read_feature(&self, bytes: &[u8]) -> Result<Array> {
        decode_array(bytes)
    }
}

// ============================================================================
// Recognition tool
// ============================================================================

/// Projector + enroller + scorer
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Train the projector; returns the projector blob
    fn train_projector(&mut self, _training: &TrainingSet<Array>) -> Result<Vec<u8>> {
        Err(unsupported(self.name(), "train_projector"))
    }

    fn load_projector(&mut self, _params: &[u8]) -> Result<()> {
        Err(unsupported(self.name(), "load_projector"))
    }

    fn project(&self, _feature: &Array) -> Result<Array> {
        Err(unsupported(self.name(), "project"))
    }

    /// Train the enroller from per-client groups; returns the enroller blob
    fn train_enroller(&mut self, _training: &[Vec<Array>]) -> Result<Vec<u8>> {
        Err(unsupported(self.name(), "train_enroller"))
    }

    fn load_enroller(&mut self, _params: &[u8]) -> Result<()> {
        Err(unsupported(self.name(), "load_enroller"))
    }

    fn enroll(&self, features: &[Array]) -> Result<Model>;

    /// Score one model part against one probe feature
    fn score(&self, model_part: &Array, probe: &Array) -> Result<f64>;

    /// Native scoring of a multi-part model; `None` lets the driver fuse
    fn score_for_multiple_models(&self, _parts: &[Array], _probe: &Array) -> Result<Option<f64>> {
        Ok(None)
    }

    /// Native scoring of a multi-file probe; `None` lets the driver fuse
    fn score_for_multiple_probes(&self, _model: &Model, _probes: &[Array]) -> Result<Option<f64>> {
        Ok(None)
    }

    fn write_feature(&self, feature: &Array) -> Result<Vec<u8>> {
        encode_array(feature)
    }

    fn read_feature(&self, bytes: &[u8]) -> Result<Array> {
        decode_array(bytes)
    }

    fn write_model(&self, model: &Model) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(model)?)
    }

    fn read_model(&self, bytes: &[u8]) -> Result<Model> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// ============================================================================
// Database
// ============================================================================

/// Source of file lists and identities
///
/// Every list must be stable under equal arguments. The file selector sorts
/// results by id, so implementations may return them in any order.
pub trait Database: Send + Sync {
    fn name(&self) -> &str;

    fn protocols(&self) -> Vec<String>;

    /// Enrollment model ids of a group
    fn models(&self, protocol: &str, group: Group) -> Result<Vec<ModelId>>;

    /// T-norm cohort model ids of a group
    fn t_models(&self, protocol: &str, group: Group) -> Result<Vec<ModelId>>;

    fn client_id_of(&self, model: &ModelId) -> Result<ClientId>;

    /// Client of a T-norm cohort model
    fn t_client_id_of(&self, t_model: &ModelId) -> Result<ClientId> {
        self.client_id_of(t_model)
    }

    /// Files of a group and purpose
    ///
    /// With `model`, enroll/tprobe purposes return that model's enrollment
    /// files and the probe purpose returns the probes meant for that model.
    fn files(
        &self,
        protocol: &str,
        group: Group,
        purpose: Purpose,
        model: Option<&ModelId>,
    ) -> Result<Vec<File>>;

    /// Z-norm impostor files of a group
    fn z_files(&self, protocol: &str, group: Group) -> Result<Vec<File>>;

    /// Probe file sets; `None` means every probe is a single file
    fn probe_sets(
        &self,
        _protocol: &str,
        _group: Group,
        _model: Option<&ModelId>,
    ) -> Result<Option<Vec<ProbeObject>>> {
        Ok(None)
    }

    /// Location of the raw data of a file
    fn original_path(&self, file: &File) -> PathBuf;

    fn annotations(&self, _file: &File) -> Option<Annotations> {
        None
    }
}

// ============================================================================
// Tagged component variant
// ============================================================================

/// Component category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentKind {
    Preprocessor,
    Extractor,
    Tool,
    Database,
    Grid,
}

impl ComponentKind {
    /// Attribute name looked up in configuration files
    pub fn keyword(self) -> &'static str {
        match self {
            ComponentKind::Preprocessor => "preprocessor",
            ComponentKind::Extractor => "feature_extractor",
            ComponentKind::Tool => "tool",
            ComponentKind::Database => "database",
            ComponentKind::Grid => "grid",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A resolved, live component
pub enum Component {
    Preprocessor(Box<dyn Preprocessor>),
    Extractor(Box<dyn FeatureExtractor>),
    Tool(Box<dyn Tool>),
    Database(Box<dyn Database>),
    Grid(GridProfile),
}

impl Component {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::Preprocessor(_) => ComponentKind::Preprocessor,
            Component::Extractor(_) => ComponentKind::Extractor,
            Component::Tool(_) => ComponentKind::Tool,
            Component::Database(_) => ComponentKind::Database,
            Component::Grid(_) => ComponentKind::Grid,
        }
    }

    /// Capability record; databases and grid profiles declare none
    pub fn capabilities(&self) -> Capabilities {
        match self {
            Component::Preprocessor(p) => p.capabilities(),
            Component::Extractor(e) => e.capabilities(),
            Component::Tool(t) => t.capabilities(),
            Component::Database(_) | Component::Grid(_) => Capabilities::default(),
        }
    }

    fn wrong_kind(&self, expected: ComponentKind) -> ToolchainError {
        ToolchainError::Config(format!(
            "expected a {} component, got a {}",
            expected,
            self.kind()
        ))
    }

    pub fn into_preprocessor(self) -> Result<Box<dyn Preprocessor>> {
        match self {
            Component::Preprocessor(p) => Ok(p),
            other => Err(other.wrong_kind(ComponentKind::Preprocessor)),
        }
    }

    pub fn into_extractor(self) -> Result<Box<dyn FeatureExtractor>> {
        match self {
            Component::Extractor(e) => Ok(e),
            other => Err(other.wrong_kind(ComponentKind::Extractor)),
        }
    }

    pub fn into_tool(self) -> Result<Box<dyn Tool>> {
        match self {
            Component::Tool(t) => Ok(t),
            other => Err(other.wrong_kind(ComponentKind::Tool)),
        }
    }

    pub fn into_database(self) -> Result<Box<dyn Database>> {
        match self {
            Component::Database(d) => Ok(d),
            other => Err(other.wrong_kind(ComponentKind::Database)),
        }
    }

    pub fn into_grid(self) -> Result<GridProfile> {
        match self {
            Component::Grid(g) => Ok(g),
            other => Err(other.wrong_kind(ComponentKind::Grid)),
        }
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::Preprocessor(p) => p.name().to_string(),
            Component::Extractor(e) => e.name().to_string(),
            Component::Tool(t) => t.name().to_string(),
            Component::Database(d) => d.name().to_string(),
            Component::Grid(g) => g.name.clone(),
        };
        write!(f, "Component::{:?}({})", self.kind(), name)
    }
}
