//! Driver behavior: reuse, force, skip flags, unit failures, configuration
//! errors

mod helpers;

use facebench_toolchain::artifacts::signature_path;
use facebench_toolchain::components::extractors::FlattenExtractor;
use facebench_toolchain::components::preprocessors::IdentityPreprocessor;
use facebench_toolchain::components::tools::{EuclideanTool, WithinClassTool};
use facebench_toolchain::grid::graph::JobNode;
use facebench_toolchain::sharder::ShardSelection;
use facebench_toolchain::types::{Cohort, Group, Normalization};
use facebench_toolchain::{ErrorKind, ExperimentConfig, SkipFlags, ToolChain};
use helpers::{
    euclidean_chain, list_files, FaultyPreprocessor, RecordingTool, SyntheticDb, SyntheticSpec,
};
use std::path::PathBuf;
use std::time::SystemTime;

fn results(config: &ExperimentConfig) -> Vec<String> {
    config
        .normalizations()
        .into_iter()
        .map(|norm| std::fs::read_to_string(config.layout.result_file("default", norm, Group::Dev)).unwrap())
        .collect()
}

fn mtimes(paths: &[PathBuf]) -> Vec<SystemTime> {
    paths
        .iter()
        .map(|p| std::fs::metadata(p).unwrap().modified().unwrap())
        .collect()
}

fn faulty_chain(db: &SyntheticDb, config: ExperimentConfig, faulty: FaultyPreprocessor) -> ToolChain {
    ToolChain::new(
        config,
        db.database(),
        Box::new(faulty),
        Box::new(FlattenExtractor),
        Box::new(EuclideanTool::new()),
    )
    .expect("chain builds")
}

// ============================================================================
// Reuse and force
// ============================================================================

#[tokio::test]
async fn test_rerun_reuses_every_artifact() {
    let db = SyntheticDb::create(SyntheticSpec::small());
    let config = db.config();
    let mut chain = euclidean_chain(&db, config.clone());

    let first = chain.run_all().await.unwrap();
    assert!(first.iter().all(|r| r.reused == 0 && r.produced == r.attempted));
    let before = results(&config);

    let second = chain.run_all().await.unwrap();
    assert_eq!(first.len(), second.len());
    for report in &second {
        assert_eq!(report.produced, 0, "{} recomputed", report.job);
        assert_eq!(report.reused, report.attempted);
    }
    assert_eq!(before, results(&config));
}

#[tokio::test]
async fn test_force_recomputes_with_identical_output() {
    let db = SyntheticDb::create(SyntheticSpec::small());
    let config = db.config();
    euclidean_chain(&db, config.clone()).run_all().await.unwrap();
    let before = results(&config);

    let mut forced = config.clone();
    forced.force = true;
    let reports = euclidean_chain(&db, forced).run_all().await.unwrap();
    for report in &reports {
        assert_eq!(report.reused, 0, "{} reused under force", report.job);
        assert_eq!(report.produced, report.attempted);
    }
    assert_eq!(before, results(&config));
}

#[tokio::test]
async fn test_models_without_probes_are_reused() {
    let mut spec = SyntheticSpec::small();
    spec.probe_images = 0;
    let db = SyntheticDb::create(spec);
    let mut config = db.config();
    config.zt_norm = false;
    let mut chain = euclidean_chain(&db, config.clone());

    chain.run_all().await.unwrap();
    let result = config.layout.result_file("default", Normalization::NoNorm, Group::Dev);
    assert_eq!(std::fs::read_to_string(&result).unwrap(), "");

    let second = chain.run_all().await.unwrap();
    for report in &second {
        assert_eq!(report.produced, 0, "{} recomputed", report.job);
        assert_eq!(report.reused, report.attempted);
    }
}

// ============================================================================
// Trained parameters
// ============================================================================

fn within_class_chain(db: &SyntheticDb, config: ExperimentConfig, tool: RecordingTool) -> ToolChain {
    ToolChain::new(
        config,
        db.database(),
        Box::new(IdentityPreprocessor::new()),
        Box::new(FlattenExtractor),
        Box::new(tool),
    )
    .expect("chain builds")
}

#[tokio::test]
async fn test_stale_training_signature_retrains() {
    let db = SyntheticDb::create(SyntheticSpec::small());
    let mut config = db.config();
    config.zt_norm = false;
    let (tool, recording) = RecordingTool::new(Box::new(WithinClassTool::new()));
    let mut chain = within_class_chain(&db, config.clone(), tool);
    chain.run_all().await.unwrap();

    let signature = signature_path(&config.layout.enroller_file());
    let stored = std::fs::read_to_string(&signature).unwrap();

    // Signature of some other training set
    std::fs::write(&signature, "deadbeef").unwrap();
    let report = chain.run_job(JobNode::EnrollTrain, ShardSelection::All).await.unwrap();
    assert_eq!((report.produced, report.reused), (1, 0));
    assert_eq!(std::fs::read_to_string(&signature).unwrap(), stored);

    // Blob without a signature
    std::fs::remove_file(&signature).unwrap();
    let report = chain.run_job(JobNode::EnrollTrain, ShardSelection::All).await.unwrap();
    assert_eq!((report.produced, report.reused), (1, 0));

    let report = chain.run_job(JobNode::EnrollTrain, ShardSelection::All).await.unwrap();
    assert_eq!((report.produced, report.reused), (0, 1));
    assert_eq!(recording.lock().unwrap().enroller_trainings.len(), 3);
}

#[tokio::test]
async fn test_transient_trainer_failure_is_retried() {
    let db = SyntheticDb::create(SyntheticSpec::small());
    let mut config = db.config();
    config.zt_norm = false;
    let (tool, recording) = RecordingTool::new(Box::new(WithinClassTool::new()));
    let mut chain = within_class_chain(&db, config.clone(), tool.with_transient_enroller_training());

    let reports = chain.run_all().await.unwrap();
    let train = reports.iter().find(|r| r.job == "enroll-train").unwrap();
    assert_eq!((train.attempted, train.produced), (1, 1));
    assert!(train.failed.is_empty());
    assert_eq!(recording.lock().unwrap().enroller_trainings.len(), 2);
    assert!(config.layout.enroller_file().exists());
}

// ============================================================================
// Skip flags
// ============================================================================

#[tokio::test]
async fn test_skipped_stage_writes_nothing() {
    let db = SyntheticDb::create(SyntheticSpec::small());
    let mut config = db.config();
    config.skip = SkipFlags {
        enrollment: true,
        score_computation: true,
        concatenation: true,
        ..SkipFlags::default()
    };
    euclidean_chain(&db, config.clone()).run_all().await.unwrap();

    assert_eq!(list_files(&config.layout.features_dir()).len(), db.per_file_count(true));
    assert!(list_files(&config.layout.models_dir("default", Cohort::Models)).is_empty());
    assert!(list_files(&config.layout.models_dir("default", Cohort::TModels)).is_empty());
    assert!(!config.layout.result_file("default", Normalization::NoNorm, Group::Dev).exists());
}

#[tokio::test]
async fn test_skipped_stage_leaves_existing_artifacts_alone() {
    let db = SyntheticDb::create(SyntheticSpec::small());
    let config = db.config();
    euclidean_chain(&db, config.clone()).run_all().await.unwrap();
    let models = list_files(&config.layout.models_dir("default", Cohort::Models));
    assert_eq!(models.len(), db.models.len());
    let written = mtimes(&models);
    let before = results(&config);

    // Everything downstream of enrollment recomputes against the kept models
    let mut forced = config.clone();
    forced.force = true;
    forced.skip.enrollment = true;
    let reports = euclidean_chain(&db, forced).run_all().await.unwrap();

    assert!(reports.iter().all(|r| !r.job.starts_with("enroll")));
    assert_eq!(written, mtimes(&models));
    assert_eq!(before, results(&config));
}

#[tokio::test]
async fn test_scoring_without_models_fails_with_data_error() {
    let db = SyntheticDb::create(SyntheticSpec::small());
    let mut config = db.config();
    config.zt_norm = false;
    config.skip.enrollment = true;

    let err = euclidean_chain(&db, config).run_all().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
    assert!(err.to_string().contains("score-A-dev"), "{}", err);
}

// ============================================================================
// Unit failures
// ============================================================================

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let db = SyntheticDb::create(SyntheticSpec::small());
    let config = db.config();
    let faulty = FaultyPreprocessor::new(&["enroll0"], &[]);
    let reads = faulty.reads.clone();

    let reports = faulty_chain(&db, config.clone(), faulty).run_all().await.unwrap();
    assert!(reports.iter().all(|r| r.is_success()));

    // One extra read for the retried file
    let enroll0 = reads.lock().unwrap().iter().filter(|s| *s == "enroll0").count();
    assert_eq!(enroll0, db.spec.dev_clients + 1);
    assert!(config.layout.result_file("default", Normalization::ZtNorm, Group::Dev).exists());
}

#[tokio::test]
async fn test_broken_unit_is_reported_and_others_complete() {
    let db = SyntheticDb::create(SyntheticSpec::small());
    let config = db.config();
    let faulty = FaultyPreprocessor::new(&[], &["probe1"]);

    let err = faulty_chain(&db, config.clone(), faulty).run_all().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
    let message = err.to_string();
    assert!(message.contains("preprocess"), "{}", message);
    for d in 0..db.spec.dev_clients {
        let key = format!("c{:02}/probe1", d);
        assert!(message.contains(&key), "{} missing from {}", key, message);
    }

    // Every other file was still preprocessed
    let preprocessed = list_files(&config.layout.preprocessed_dir());
    assert_eq!(preprocessed.len(), db.per_file_count(true) - db.spec.dev_clients);
    assert!(list_files(&config.layout.features_dir()).is_empty());
}

#[tokio::test]
async fn test_abort_on_unit_failure_stops_the_job() {
    let db = SyntheticDb::create(SyntheticSpec::small());
    let mut config = db.config();
    config.retry.abort_on_unit_failure = true;
    let faulty = FaultyPreprocessor::new(&[], &["probe1"]);
    let reads = faulty.reads.clone();

    let err = faulty_chain(&db, config.clone(), faulty).run_all().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
    assert!(err.to_string().contains("aborted"), "{}", err);

    let probe1_reads = reads.lock().unwrap().iter().filter(|s| *s == "probe1").count();
    assert_eq!(probe1_reads, 1);
    assert!(list_files(&config.layout.preprocessed_dir()).len() < db.per_file_count(true) - db.spec.dev_clients);
}

// ============================================================================
// Configuration errors
// ============================================================================

#[tokio::test]
async fn test_unknown_protocol_is_config_error() {
    let db = SyntheticDb::create(SyntheticSpec::small());
    let mut config = db.config();
    config.protocol = Some("no-such-protocol".to_string());

    let err = ToolChain::new(
        config,
        db.database(),
        Box::new(FaultyPreprocessor::new(&[], &[])),
        Box::new(FlattenExtractor),
        Box::new(EuclideanTool::new()),
    )
    .err()
    .expect("unknown protocol rejected");
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[tokio::test]
async fn test_world_group_cannot_be_scored() {
    let db = SyntheticDb::create(SyntheticSpec::small());
    let mut config = db.config();
    config.groups = vec![Group::Dev, Group::World];

    let err = ToolChain::new(
        config,
        db.database(),
        Box::new(FaultyPreprocessor::new(&[], &[])),
        Box::new(FlattenExtractor),
        Box::new(EuclideanTool::new()),
    )
    .err()
    .expect("world group rejected");
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[tokio::test]
async fn test_job_for_unselected_group_is_config_error() {
    let db = SyntheticDb::create(SyntheticSpec::small());
    let mut chain = euclidean_chain(&db, db.config());

    let err = chain
        .run_job(JobNode::Concatenate { group: Group::Eval }, ShardSelection::All)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[tokio::test]
async fn test_cohort_jobs_are_noops_without_zt() {
    let db = SyntheticDb::create(SyntheticSpec::small());
    let mut config = db.config();
    config.zt_norm = false;
    let mut chain = euclidean_chain(&db, config.clone());

    let report = chain
        .run_job(
            JobNode::Enroll { cohort: Cohort::TModels, group: Group::Dev },
            ShardSelection::All,
        )
        .await
        .unwrap();
    assert_eq!(report.attempted, 0);
    assert!(list_files(&config.layout.models_dir("default", Cohort::TModels)).is_empty());
}
