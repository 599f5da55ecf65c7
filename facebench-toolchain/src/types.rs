//! Core data model
//!
//! Files, identities, groups, stages and the numeric values that flow
//! between stages. Identifiers are string newtypes ordered lexicographically;
//! that ordering is the global contract every shard relies on.

use crate::error::{Result, ToolchainError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Unique id of a [`File`] within one experiment
    FileId
);
string_id!(
    /// Enrolled identity; T-norm cohort models use the same type
    ModelId
);
string_id!(
    /// Identity of the person a file or model belongs to
    ClientId
);

// ============================================================================
// Files
// ============================================================================

/// Role a file plays in an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    /// Training data
    World,
    /// Enrollment data of a model
    Enroll,
    /// Probe compared against models
    Probe,
    /// Enrollment data of a T-norm cohort model
    TProbe,
    /// Z-norm impostor file
    ZNorm,
}

/// Immutable file record provided by the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub id: FileId,
    /// Relative path without extension; artifact paths are derived from it
    pub path: String,
    pub client_id: ClientId,
    /// Client this file claims to be; `None` means "any model"
    #[serde(default)]
    pub claimed_client_id: Option<ClientId>,
    pub purpose: Purpose,
}

/// Eye/landmark annotations keyed by name
pub type Annotations = BTreeMap<String, (f64, f64)>;

/// One score column: a probe or a Z-norm impostor
///
/// Plain databases produce one file per object; file-set databases group
/// several files (e.g. video frames) under one id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeObject {
    pub id: FileId,
    pub client_id: ClientId,
    pub claimed_client_id: Option<ClientId>,
    /// Path reported in score files
    pub path: String,
    pub files: Vec<File>,
}

impl ProbeObject {
    pub fn single(file: File) -> Self {
        Self {
            id: file.id.clone(),
            client_id: file.client_id.clone(),
            claimed_client_id: file.claimed_client_id.clone(),
            path: file.path.clone(),
            files: vec![file],
        }
    }
}

// ============================================================================
// Groups, stages, score types
// ============================================================================

/// Data group
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Group {
    World,
    Dev,
    Eval,
}

impl Group {
    pub fn label(self) -> &'static str {
        match self {
            Group::World => "world",
            Group::Dev => "dev",
            Group::Eval => "eval",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Group {
    type Err = ToolchainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "world" => Ok(Group::World),
            "dev" => Ok(Group::Dev),
            "eval" => Ok(Group::Eval),
            other => Err(ToolchainError::Config(format!("unknown group '{}'", other))),
        }
    }
}

/// Pipeline stage, in canonical execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preprocess,
    ExtractTrain,
    Extract,
    ProjectTrain,
    Project,
    EnrollTrain,
    Enroll,
    Score,
    ZNormMerge,
    Concatenate,
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::Preprocess,
        Stage::ExtractTrain,
        Stage::Extract,
        Stage::ProjectTrain,
        Stage::Project,
        Stage::EnrollTrain,
        Stage::Enroll,
        Stage::Score,
        Stage::ZNormMerge,
        Stage::Concatenate,
    ];

    /// The stage label used in job names and logging
    pub fn label(self) -> &'static str {
        match self {
            Stage::Preprocess => "preprocess",
            Stage::ExtractTrain => "extract-train",
            Stage::Extract => "extract",
            Stage::ProjectTrain => "project-train",
            Stage::Project => "project",
            Stage::EnrollTrain => "enroll-train",
            Stage::Enroll => "enroll",
            Stage::Score => "score",
            Stage::ZNormMerge => "znorm-merge",
            Stage::Concatenate => "concatenate",
        }
    }

    /// Parse a label; underscores are accepted in place of dashes
    pub fn from_label(label: &str) -> Option<Stage> {
        let normalized = label.replace('_', "-");
        Stage::ALL.into_iter().find(|s| s.label() == normalized)
    }

    pub fn is_trainer(self) -> bool {
        matches!(
            self,
            Stage::ExtractTrain | Stage::ProjectTrain | Stage::EnrollTrain
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The four raw score matrices of ZT normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScoreType {
    /// Models × probes
    A,
    /// Models × Z-files
    B,
    /// T-models × probes
    C,
    /// T-models × Z-files
    D,
}

impl ScoreType {
    pub const ALL: [ScoreType; 4] = [ScoreType::A, ScoreType::B, ScoreType::C, ScoreType::D];

    pub fn letter(self) -> &'static str {
        match self {
            ScoreType::A => "A",
            ScoreType::B => "B",
            ScoreType::C => "C",
            ScoreType::D => "D",
        }
    }

    /// Rows are T-models rather than enrollment models
    pub fn uses_t_models(self) -> bool {
        matches!(self, ScoreType::C | ScoreType::D)
    }

    /// Columns are Z-norm files rather than probes
    pub fn uses_z_files(self) -> bool {
        matches!(self, ScoreType::B | ScoreType::D)
    }
}

impl fmt::Display for ScoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.letter())
    }
}

/// Which model population a stage works on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Cohort {
    /// Enrollment models ("N")
    Models,
    /// T-norm cohort models ("T")
    TModels,
}

impl Cohort {
    pub fn letter(self) -> &'static str {
        match self {
            Cohort::Models => "N",
            Cohort::TModels => "T",
        }
    }
}

/// Score normalization flavor of an output file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Normalization {
    NoNorm,
    ZtNorm,
}

impl Normalization {
    pub fn dir_name(self) -> &'static str {
        match self {
            Normalization::NoNorm => "nonorm",
            Normalization::ZtNorm => "ztnorm",
        }
    }
}

// ============================================================================
// Numeric values
// ============================================================================

/// Dense float64 array; the value type of every preprocessed sample, feature
/// and projected feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Array {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl Array {
    /// One-dimensional array
    pub fn vector(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Array with explicit shape; the element count must match
    pub fn with_shape(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ToolchainError::Data(format!(
                "shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

/// Enrolled model: one or more parts scored independently
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub parts: Vec<Array>,
}

impl Model {
    pub fn single(part: Array) -> Self {
        Self { parts: vec![part] }
    }
}

/// Training data handed to a trainer: flat, or grouped by client
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingSet<T> {
    Flat(Vec<T>),
    ByClient(Vec<Vec<T>>),
}

impl<T> TrainingSet<T> {
    /// Total number of items regardless of grouping
    pub fn total_len(&self) -> usize {
        match self {
            TrainingSet::Flat(items) => items.len(),
            TrainingSet::ByClient(groups) => groups.iter().map(Vec::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    /// Iterate every item in order, ignoring grouping
    pub fn iter_flat(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        match self {
            TrainingSet::Flat(items) => Box::new(items.iter()),
            TrainingSet::ByClient(groups) => Box::new(groups.iter().flatten()),
        }
    }

    /// Flatten into a single sequence
    pub fn into_flat(self) -> Vec<T> {
        match self {
            TrainingSet::Flat(items) => items,
            TrainingSet::ByClient(groups) => groups.into_iter().flatten().collect(),
        }
    }

    /// Transform every item, keeping the grouping
    pub fn try_map<U, F>(self, mut f: F) -> Result<TrainingSet<U>>
    where
        F: FnMut(T) -> Result<U>,
    {
        Ok(match self {
            TrainingSet::Flat(items) => {
                TrainingSet::Flat(items.into_iter().map(&mut f).collect::<Result<_>>()?)
            }
            TrainingSet::ByClient(groups) => TrainingSet::ByClient(
                groups
                    .into_iter()
                    .map(|g| g.into_iter().map(&mut f).collect::<Result<Vec<_>>>())
                    .collect::<Result<_>>()?,
            ),
        })
    }
}
