//! End-to-end experiment scenarios
//!
//! Full in-process runs over synthetic databases: minimal sequential run,
//! projection tools, client-split enroller training and capability-driven
//! stage skipping.

mod helpers;

use facebench_toolchain::capabilities::StageDecision;
use facebench_toolchain::components::extractors::FlattenExtractor;
use facebench_toolchain::components::preprocessors::IdentityPreprocessor;
use facebench_toolchain::components::tools::{EuclideanTool, WhitenTool, WithinClassTool};
use facebench_toolchain::registry::Params;
use facebench_toolchain::types::{Group, Normalization, Stage};
use facebench_toolchain::{SkipFlags, ToolChain};
use helpers::{euclidean_chain, list_files, read_scores, RecordingTool, SyntheticDb, SyntheticSpec};
use std::collections::BTreeMap;

#[tokio::test]
async fn test_minimal_sequential_run() {
    let db = SyntheticDb::create(SyntheticSpec::att());
    let mut config = db.config();
    config.zt_norm = false;
    let mut chain = euclidean_chain(&db, config.clone());

    let reports = chain.run_all().await.expect("experiment runs");
    assert!(reports.iter().all(|r| r.is_success()));

    let lines = read_scores(&config, "default", Normalization::NoNorm, Group::Dev);
    let probes = db.files_with("probe").len();
    assert_eq!(lines.len(), db.models.len() * probes);

    let mut per_model: BTreeMap<String, usize> = BTreeMap::new();
    for line in &lines {
        *per_model.entry(line.claimed_client_id.to_string()).or_default() += 1;
    }
    assert_eq!(per_model.len(), 40);
    assert!(per_model.values().all(|&n| n == probes));

    // Top-1: the best-scoring claimed client of each probe is its true client
    let mut best: BTreeMap<String, (f64, String, String)> = BTreeMap::new();
    for line in &lines {
        let entry = best
            .entry(line.probe_id.to_string())
            .or_insert((f64::NEG_INFINITY, String::new(), line.true_client_id.to_string()));
        if line.score > entry.0 {
            entry.0 = line.score;
            entry.1 = line.claimed_client_id.to_string();
        }
    }
    let correct = best.values().filter(|(_, claimed, truth)| claimed == truth).count();
    let rate = correct as f64 / best.len() as f64;
    assert!(rate >= 0.95, "top-1 rate {}", rate);

    // No cohort artifacts without ZT
    let layout = &config.layout;
    assert!(list_files(&layout.models_dir("default", facebench_toolchain::types::Cohort::TModels)).is_empty());
    assert!(!layout.result_file("default", Normalization::ZtNorm, Group::Dev).exists());
}

#[tokio::test]
async fn test_projection_tool_trains_projector_once() {
    let db = SyntheticDb::create(SyntheticSpec::small());
    let mut config = db.config();
    config.zt_norm = false;

    let (tool, recording) = RecordingTool::new(Box::new(WhitenTool::from_params(&Params::new()).unwrap()));
    let mut chain = ToolChain::new(
        config.clone(),
        db.database(),
        Box::new(IdentityPreprocessor::new()),
        Box::new(FlattenExtractor),
        Box::new(tool),
    )
    .unwrap();
    chain.run_all().await.expect("first run");

    let projector = config.layout.projector_file();
    assert!(projector.exists());
    let projector_written = std::fs::metadata(&projector).unwrap().modified().unwrap();
    let projected = list_files(&config.layout.projected_dir());
    assert_eq!(projected.len(), db.per_file_count(false));
    for path in &projected {
        let written = std::fs::metadata(path).unwrap().modified().unwrap();
        assert!(written >= projector_written, "{} predates the projector", path.display());
    }
    {
        let rec = recording.lock().unwrap();
        assert_eq!(rec.projector_trainings, 1);
        assert_eq!(rec.projections, projected.len());
    }

    // A second run reuses everything
    chain.run_all().await.expect("second run");
    assert_eq!(recording.lock().unwrap().projector_trainings, 1);

    // Deleting the projector and forcing only the projection stages rebuilds
    // the projector and the projected files, nothing else
    std::fs::remove_file(&projector).unwrap();
    let enrollments_before = recording.lock().unwrap().enrollments;
    let mut forced = config.clone();
    forced.force = true;
    forced.skip = SkipFlags {
        preprocessing: true,
        extractor_training: true,
        extraction: true,
        enroller_training: true,
        enrollment: true,
        score_computation: true,
        concatenation: true,
        ..SkipFlags::default()
    };
    let (tool, recording) = RecordingTool::new(Box::new(WhitenTool::from_params(&Params::new()).unwrap()));
    let mut chain = ToolChain::new(
        forced,
        db.database(),
        Box::new(IdentityPreprocessor::new()),
        Box::new(FlattenExtractor),
        Box::new(tool),
    )
    .unwrap();
    let reports = chain.run_all().await.expect("forced projection run");

    let rec = recording.lock().unwrap();
    assert_eq!(rec.projector_trainings, 1);
    assert_eq!(rec.projections, projected.len());
    assert_eq!(rec.enrollments, 0);
    assert!(enrollments_before > 0);
    assert!(projector.exists());
    let ran: Vec<&str> = reports
        .iter()
        .filter(|r| r.decision == StageDecision::Run)
        .map(|r| r.job.as_str())
        .collect();
    assert_eq!(ran, vec!["project-train", "project"]);
}

#[tokio::test]
async fn test_enroller_training_split_by_client() {
    let db = SyntheticDb::create(SyntheticSpec::small());
    let mut config = db.config();
    config.zt_norm = false;

    let (tool, recording) = RecordingTool::new(Box::new(WithinClassTool::new()));
    let mut chain = ToolChain::new(
        config.clone(),
        db.database(),
        Box::new(IdentityPreprocessor::new()),
        Box::new(FlattenExtractor),
        Box::new(tool),
    )
    .unwrap();
    chain.run_all().await.expect("experiment runs");

    let rec = recording.lock().unwrap();
    assert_eq!(rec.enroller_trainings.len(), 1);
    let groups = &rec.enroller_trainings[0];
    assert_eq!(groups.len(), db.spec.world_clients);
    assert!(groups.iter().all(|&n| n > 0));
    assert_eq!(groups.iter().sum::<usize>(), db.world_size());

    assert!(config.layout.enroller_file().exists());
    assert!(
        std::fs::read_to_string(facebench_toolchain::artifacts::signature_path(&config.layout.enroller_file()))
            .unwrap()
            .len()
            == 64
    );
}

#[tokio::test]
async fn test_no_projection_means_no_projection_artifacts() {
    let db = SyntheticDb::create(SyntheticSpec::small());
    let config = db.config();
    let (tool, recording) = RecordingTool::new(Box::new(EuclideanTool::new()));
    let mut chain = ToolChain::new(
        config.clone(),
        db.database(),
        Box::new(IdentityPreprocessor::new()),
        Box::new(FlattenExtractor),
        Box::new(tool),
    )
    .unwrap();

    assert_eq!(chain.plan().decision(Stage::Project), StageDecision::NotRequired);
    assert_eq!(chain.plan().decision(Stage::ProjectTrain), StageDecision::NotRequired);
    chain.run_all().await.expect("experiment runs");

    assert!(!config.layout.projector_file().exists());
    assert!(list_files(&config.layout.projected_dir()).is_empty());
    let rec = recording.lock().unwrap();
    assert_eq!(rec.projections, 0);
    assert_eq!(rec.enrollments, db.models.len() + db.t_models.len());

    // Both result files exist with ZT on
    let nonorm = helpers::read_scores(&config, "default", Normalization::NoNorm, Group::Dev);
    let ztnorm = helpers::read_scores(&config, "default", Normalization::ZtNorm, Group::Dev);
    assert_eq!(nonorm.len(), ztnorm.len());
    for (raw, norm) in nonorm.iter().zip(&ztnorm) {
        assert_eq!(raw.probe_id, norm.probe_id);
        assert_eq!(raw.claimed_client_id, norm.claimed_client_id);
    }
}
