//! Stages: PROJECT_TRAIN, PROJECT
//!
//! Only reached when the tool performs projection. The projector is trained
//! on extracted world features and applied to every extracted feature.

use super::{require_training, StageReport, ToolChain};
use crate::artifacts;
use crate::capabilities::FeatureSource;
use crate::error::Result;
use crate::grid::graph::JobNode;
use crate::sharder::ShardSelection;
use crate::types::{File, Stage, TrainingSet};
use std::path::{Path, PathBuf};
use tracing::info;

impl ToolChain {
    /// Train the projector once, writing its parameter blob
    pub(super) async fn stage_project_train(&mut self) -> Result<StageReport> {
        self.load_extractor().await?;

        let selector = self.selector()?;
        let artifact = selector.trainer_artifact(Stage::ProjectTrain)?;
        let training = selector.training_files(self.plan.projection_split_by_client)?;

        let mut report = StageReport::new(JobNode::ProjectTrain);
        self.run_trainer(&mut report, Stage::ProjectTrain, &artifact, &training)
            .await?;
        Ok(report)
    }

    pub(super) async fn train_projector(&mut self, artifact: &Path, training: &TrainingSet<File>) -> Result<()> {
        require_training(training, "projector")?;
        info!(files = training.total_len(), "Training projector");
        let features = self
            .read_training_features(FeatureSource::Extracted, training)
            .await?;
        let blob = self.tool.train_projector(&features)?;
        self.write_trained(artifact, blob, training).await
    }

    /// Project every extracted feature (this shard's slice)
    pub(super) async fn stage_project(&mut self, shard: ShardSelection) -> Result<StageReport> {
        self.load_extractor().await?;
        self.load_projector().await?;

        let selector = self.selector()?;
        let files = selector.all_files(&self.config.groups, self.plan.zt_norm)?;
        let mine = self.my_units(&files, Stage::Project, shard)?;
        info!(total = files.len(), shard_units = mine.len(), "Projecting features");

        let mut report = StageReport::new(JobNode::Project);
        for file in mine {
            let out: PathBuf = selector.file_artifact(Stage::Project, file)?;
            self.run_unit(&mut report, &file.path, &[out.clone()], || {
                self.project_file(file, &out)
            })
            .await?;
        }
        Ok(report)
    }

    async fn project_file(&self, file: &File, out: &Path) -> Result<()> {
        let feature = self.read_feature(FeatureSource::Extracted, file).await?;
        let projected = self.tool.project(&feature)?;
        artifacts::write_atomic(out, self.tool.write_feature(&projected)?).await
    }
}
