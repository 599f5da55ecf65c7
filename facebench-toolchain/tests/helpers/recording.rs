//! Recording and fault-injecting component wrappers

use facebench_toolchain::components::preprocessors::IdentityPreprocessor;
use facebench_toolchain::components::{Capabilities, Preprocessor, Tool};
use facebench_toolchain::types::{Annotations, Array, Model, TrainingSet};
use facebench_toolchain::{Result, ToolchainError};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Calls observed by a [`RecordingTool`]
#[derive(Debug, Default, Clone)]
pub struct Recording {
    pub projector_trainings: usize,
    /// Per-client group sizes of every `train_enroller` call
    pub enroller_trainings: Vec<Vec<usize>>,
    pub projections: usize,
    pub enrollments: usize,
    pub scores: usize,
}

/// Delegates to another tool and counts the calls
pub struct RecordingTool {
    inner: Box<dyn Tool>,
    recording: Arc<Mutex<Recording>>,
    transient_enroller_training: bool,
}

impl RecordingTool {
    pub fn new(inner: Box<dyn Tool>) -> (Self, Arc<Mutex<Recording>>) {
        let recording = Arc::new(Mutex::new(Recording::default()));
        (
            Self {
                inner,
                recording: Arc::clone(&recording),
                transient_enroller_training: false,
            },
            recording,
        )
    }

    /// Fail the first `train_enroller` call with a transient error
    pub fn with_transient_enroller_training(mut self) -> Self {
        self.transient_enroller_training = true;
        self
    }
}

impl Tool for RecordingTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn train_projector(&mut self, training: &TrainingSet<Array>) -> Result<Vec<u8>> {
        self.recording.lock().unwrap().projector_trainings += 1;
        self.inner.train_projector(training)
    }

    fn load_projector(&mut self, params: &[u8]) -> Result<()> {
        self.inner.load_projector(params)
    }

    fn project(&self, feature: &Array) -> Result<Array> {
        self.recording.lock().unwrap().projections += 1;
        self.inner.project(feature)
    }

    fn train_enroller(&mut self, training: &[Vec<Array>]) -> Result<Vec<u8>> {
        self.recording
            .lock()
            .unwrap()
            .enroller_trainings
            .push(training.iter().map(Vec::len).collect());
        if std::mem::take(&mut self.transient_enroller_training) {
            return Err(ToolchainError::Transient("enroller training contended".to_string()));
        }
        self.inner.train_enroller(training)
    }

    fn load_enroller(&mut self, params: &[u8]) -> Result<()> {
        self.inner.load_enroller(params)
    }

    fn enroll(&self, features: &[Array]) -> Result<Model> {
        self.recording.lock().unwrap().enrollments += 1;
        self.inner.enroll(features)
    }

    fn score(&self, model_part: &Array, probe: &Array) -> Result<f64> {
        self.recording.lock().unwrap().scores += 1;
        self.inner.score(model_part, probe)
    }

    fn score_for_multiple_models(&self, parts: &[Array], probe: &Array) -> Result<Option<f64>> {
        self.inner.score_for_multiple_models(parts, probe)
    }

    fn score_for_multiple_probes(&self, model: &Model, probes: &[Array]) -> Result<Option<f64>> {
        self.inner.score_for_multiple_probes(model, probes)
    }

    fn write_feature(&self, feature: &Array) -> Result<Vec<u8>> {
        self.inner.write_feature(feature)
    }

    fn read_feature(&self, bytes: &[u8]) -> Result<Array> {
        self.inner.read_feature(bytes)
    }

    fn write_model(&self, model: &Model) -> Result<Vec<u8>> {
        self.inner.write_model(model)
    }

    fn read_model(&self, bytes: &[u8]) -> Result<Model> {
        self.inner.read_model(bytes)
    }
}

/// Identity preprocessor that fails on chosen raw files
///
/// Files named in `transient_once` fail with a transient error on their
/// first read only; files named in `broken` always fail with a data error.
/// Names are matched against the raw file stem.
pub struct FaultyPreprocessor {
    inner: IdentityPreprocessor,
    transient_once: Mutex<HashSet<String>>,
    broken: HashSet<String>,
    pub reads: Arc<Mutex<Vec<String>>>,
}

impl FaultyPreprocessor {
    pub fn new(transient_once: &[&str], broken: &[&str]) -> Self {
        Self {
            inner: IdentityPreprocessor::new(),
            transient_once: Mutex::new(transient_once.iter().map(|s| s.to_string()).collect()),
            broken: broken.iter().map(|s| s.to_string()).collect(),
            reads: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Preprocessor for FaultyPreprocessor {
    fn name(&self) -> &str {
        "faulty"
    }

    fn read_original(&self, path: &Path) -> Result<Array> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        self.reads.lock().unwrap().push(stem.clone());
        if self.broken.contains(&stem) {
            return Err(ToolchainError::Data(format!("corrupt raw file {}", stem)));
        }
        if self.transient_once.lock().unwrap().remove(&stem) {
            return Err(ToolchainError::Transient(format!("contended raw file {}", stem)));
        }
        self.inner.read_original(path)
    }

    fn preprocess(&self, raw: Array, annotations: Option<&Annotations>) -> Result<Array> {
        self.inner.preprocess(raw, annotations)
    }
}
