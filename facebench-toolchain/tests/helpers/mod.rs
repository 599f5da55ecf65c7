//! Test Helper Utilities
//!
//! Shared utilities for facebench-toolchain integration tests

#![allow(dead_code)]

pub mod recording;
pub mod synthetic;

pub use recording::{FaultyPreprocessor, Recording, RecordingTool};
pub use synthetic::{list_files, SyntheticDb, SyntheticFile, SyntheticSpec};

use facebench_toolchain::components::extractors::FlattenExtractor;
use facebench_toolchain::components::preprocessors::IdentityPreprocessor;
use facebench_toolchain::components::tools::EuclideanTool;
use facebench_toolchain::grid::GridProfile;
use facebench_toolchain::registry::Params;
use facebench_toolchain::scoring::score_file::{parse_lines, ScoreLine};
use facebench_toolchain::types::{Group, Normalization};
use facebench_toolchain::{ExperimentConfig, ToolChain};

/// identity → flatten → euclidean chain over a synthetic database
pub fn euclidean_chain(db: &SyntheticDb, config: ExperimentConfig) -> ToolChain {
    ToolChain::new(
        config,
        db.database(),
        Box::new(IdentityPreprocessor::new()),
        Box::new(FlattenExtractor),
        Box::new(EuclideanTool::new()),
    )
    .expect("chain builds")
}

/// Parsed lines of a group's result file
pub fn read_scores(config: &ExperimentConfig, protocol: &str, norm: Normalization, group: Group) -> Vec<ScoreLine> {
    let path = config.layout.result_file(protocol, norm, group);
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("reading {}: {}", path.display(), e));
    parse_lines(&text).expect("score file parses")
}

/// The `grid` profile with TOML overrides, e.g. `units_per_job = { score = 2 }`
pub fn grid_profile(overrides: &str) -> GridProfile {
    let table: toml::Table = toml::from_str(overrides).expect("overrides parse");
    let params: Params = table.into_iter().collect();
    GridProfile::builtin("grid", &params).expect("profile builds")
}
