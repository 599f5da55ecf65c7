//! facebench-verify - biometric verification experiment driver
//!
//! Three modes:
//! - local run (default): every job of the experiment in-process, in
//!   dependency order
//! - submission (`--grid <profile>`): the job graph goes to the job manifest
//!   (or, with `--dry-run`, is only logged)
//! - job mode (`--execute-job <name>`): one job of the graph for the shard
//!   index found in the environment; this is what submitted jobs run

use anyhow::{bail, Context, Result};
use clap::Parser;
use facebench_common::config::{load_toml_config, DirectoryResolver, RootKind, TomlConfig};
use facebench_common::config::{TEMP_DIR_ENV, USER_DIR_ENV};
use facebench_common::logging::{init_logging, VERBOSITY_HELP};
use facebench_toolchain::components::ComponentKind;
use facebench_toolchain::grid::backend::{DryRunBackend, ManifestBackend};
use facebench_toolchain::grid::graph::JobNode;
use facebench_toolchain::sharder::{shard_index_from_env, SHARD_INDEX_ENV};
use facebench_toolchain::types::Group;
use facebench_toolchain::{ComponentRegistry, DirectoryLayout, ExperimentConfig, SkipFlags, StageReport, ToolChain};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

const MODULE_NAME: &str = "facebench-verify";

#[derive(Debug, Parser)]
#[command(name = "facebench-verify", version, about = "Run a biometric verification experiment")]
struct Cli {
    /// Database: config file, registered name or expression
    #[arg(short = 'd', long)]
    database: String,

    /// Preprocessor: config file, registered name or expression
    #[arg(short = 'p', long)]
    preprocessor: String,

    /// Feature extractor: config file, registered name or expression
    #[arg(short = 'f', long = "features")]
    features: String,

    /// Recognition tool: config file, registered name or expression
    #[arg(short = 't', long)]
    tool: String,

    /// Grid profile; submits the experiment instead of running it
    #[arg(short = 'g', long)]
    grid: Option<String>,

    /// Protocol of the database (default: its first protocol)
    #[arg(long)]
    protocol: Option<String>,

    /// Groups to score
    #[arg(long, value_delimiter = ',', default_value = "dev")]
    groups: Vec<Group>,

    /// Experiment sub-directory below the temp and user roots
    #[arg(short = 'b', long, default_value = "default")]
    sub_dir: String,

    /// Score sub-directory below the protocol directory
    #[arg(long, default_value = "scores")]
    score_sub_dir: String,

    #[arg(short = 'T', long, env = TEMP_DIR_ENV)]
    temp_dir: Option<PathBuf>,

    #[arg(short = 'U', long, env = USER_DIR_ENV)]
    user_dir: Option<PathBuf>,

    /// TOML configuration file (default: ~/.config/facebench/facebench-verify.toml)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Recompute artifacts even when present
    #[arg(long)]
    force: bool,

    /// Load all probe features of a score job once
    #[arg(long)]
    preload_probes: bool,

    /// Disable ZT score normalization
    #[arg(long)]
    no_zt_norm: bool,

    /// Probe columns per score work unit
    #[arg(long)]
    score_block_size: Option<usize>,

    #[arg(long)]
    skip_preprocessing: bool,
    #[arg(long)]
    skip_extractor_training: bool,
    #[arg(long)]
    skip_extraction: bool,
    #[arg(long)]
    skip_projection_training: bool,
    #[arg(long)]
    skip_projection: bool,
    #[arg(long)]
    skip_enroller_training: bool,
    #[arg(long)]
    skip_enrollment: bool,
    #[arg(long)]
    skip_score_computation: bool,
    #[arg(long)]
    skip_concatenation: bool,

    /// Log the submissions instead of writing the job manifest
    #[arg(long)]
    dry_run: bool,

    /// Run a single job of the graph (used by submitted jobs)
    #[arg(long, value_name = "JOB")]
    execute_job: Option<String>,

    /// Environment variable holding the 1-based shard index
    #[arg(long, default_value = SHARD_INDEX_ENV)]
    shard_index_env: String,

    #[arg(short, long, action = clap::ArgAction::Count, help = VERBOSITY_HELP)]
    verbose: u8,
}

impl Cli {
    fn skip_flags(&self) -> SkipFlags {
        SkipFlags {
            preprocessing: self.skip_preprocessing,
            extractor_training: self.skip_extractor_training,
            extraction: self.skip_extraction,
            projection_training: self.skip_projection_training,
            projection: self.skip_projection,
            enroller_training: self.skip_enroller_training,
            enrollment: self.skip_enrollment,
            score_computation: self.skip_score_computation,
            concatenation: self.skip_concatenation,
        }
    }

    fn experiment_config(&self, toml: &TomlConfig) -> ExperimentConfig {
        let resolver = DirectoryResolver::new(toml);
        let layout = DirectoryLayout::new(
            resolver.resolve(RootKind::Temp, self.temp_dir.as_deref()),
            resolver.resolve(RootKind::User, self.user_dir.as_deref()),
        )
        .with_sub_dir(&self.sub_dir)
        .with_score_sub_dir(&self.score_sub_dir);

        let mut config = ExperimentConfig::new(layout).apply_toml(toml);
        config.protocol = self.protocol.clone();
        config.groups = self.groups.clone();
        config.skip = self.skip_flags();
        config.force = self.force;
        config.preload_probes = self.preload_probes;
        config.zt_norm = !self.no_zt_norm;
        if let Some(size) = self.score_block_size {
            config.score_block_size = size;
        }
        config
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let toml = match load_toml_config(MODULE_NAME, cli.config.as_deref()) {
        Ok(toml) => toml,
        Err(e) => {
            eprintln!("facebench-verify: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(cli.verbose, &toml.logging) {
        eprintln!("facebench-verify: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli, toml).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, toml: TomlConfig) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting facebench-verify");

    let registry = ComponentRegistry::with_builtins();
    let database = registry
        .resolve(ComponentKind::Database, &cli.database)?
        .into_database()?;
    let preprocessor = registry
        .resolve(ComponentKind::Preprocessor, &cli.preprocessor)?
        .into_preprocessor()?;
    let extractor = registry
        .resolve(ComponentKind::Extractor, &cli.features)?
        .into_extractor()?;
    let tool = registry.resolve(ComponentKind::Tool, &cli.tool)?.into_tool()?;
    let grid = cli
        .grid
        .as_deref()
        .map(|spec| registry.resolve(ComponentKind::Grid, spec)?.into_grid())
        .transpose()?;

    let config = cli.experiment_config(&toml);
    info!(
        temp = %config.layout.experiment_temp().display(),
        user = %config.layout.experiment_user().display(),
        "Experiment directories"
    );

    let mut chain = ToolChain::new(config, database, preprocessor, extractor, tool)?;
    let submitting = grid.is_some();
    if let Some(profile) = grid {
        chain = chain.with_grid(profile);
    }

    if let Some(job) = cli.execute_job.as_deref() {
        let node: JobNode = job.parse()?;
        let shard = shard_index_from_env(&cli.shard_index_env)?;
        let report = chain.run_job(node, shard).await?;
        print_summary(std::slice::from_ref(&report));
        report.check()?;
        return Ok(());
    }

    if submitting {
        let base_command: Vec<String> = std::env::args().collect();
        if cli.dry_run {
            let mut backend = DryRunBackend::new();
            let ids = chain.submit(&mut backend, &base_command)?;
            println!("dry run: {} jobs", ids.len());
            for (id, request) in &backend.submitted {
                println!(
                    "  {} {} tasks={} deps=[{}]",
                    id,
                    request.name,
                    request.array_size.unwrap_or(1),
                    request
                        .dependencies
                        .iter()
                        .map(|d| d.to_string())
                        .collect::<Vec<_>>()
                        .join(",")
                );
            }
        } else {
            let manifest = chain.config().layout.job_manifest();
            let mut backend = ManifestBackend::open(&manifest)
                .with_context(|| format!("opening job manifest {}", manifest.display()))?;
            let ids = chain.submit(&mut backend, &base_command)?;
            println!("submitted {} jobs to {}", ids.len(), manifest.display());
        }
        return Ok(());
    }

    if cli.dry_run {
        bail!("--dry-run needs a grid profile (--grid)");
    }

    let reports = chain.run_all().await?;
    print_summary(&reports);
    Ok(())
}

fn print_summary(reports: &[StageReport]) {
    for report in reports {
        println!(
            "{:<20} {:<13} attempted={} produced={} reused={} failed={}",
            report.job,
            report.decision.to_string(),
            report.attempted,
            report.produced,
            report.reused,
            report.failed.len()
        );
    }
}
