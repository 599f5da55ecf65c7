//! Stages: EXTRACT_TRAIN, EXTRACT
//!
//! The extractor is trained on the preprocessed world files (grouped by
//! client when it asks for that) and then applied to every preprocessed
//! file.

use super::{require_training, StageReport, ToolChain};
use crate::artifacts;
use crate::error::Result;
use crate::grid::graph::JobNode;
use crate::retry::retry_transient;
use crate::sharder::ShardSelection;
use crate::types::{Array, File, Stage, TrainingSet};
use std::path::{Path, PathBuf};
use tracing::info;

impl ToolChain {
    /// Train the extractor once, writing its parameter blob
    pub(super) async fn stage_extract_train(&mut self) -> Result<StageReport> {
        let selector = self.selector()?;
        let artifact = selector.trainer_artifact(Stage::ExtractTrain)?;
        let training = selector.training_files(self.plan.extractor_split_by_client)?;

        let mut report = StageReport::new(JobNode::ExtractTrain);
        self.run_trainer(&mut report, Stage::ExtractTrain, &artifact, &training)
            .await?;
        Ok(report)
    }

    pub(super) async fn train_extractor(&mut self, artifact: &Path, training: &TrainingSet<File>) -> Result<()> {
        require_training(training, "extractor")?;
        info!(files = training.total_len(), "Training extractor");
        let data = self.read_training_data(training).await?;
        let blob = self.extractor.train(&data)?;
        self.write_trained(artifact, blob, training).await
    }

    /// Read preprocessed samples of a training set, keeping its grouping
    async fn read_training_data(&self, training: &TrainingSet<File>) -> Result<TrainingSet<Array>> {
        Ok(match training {
            TrainingSet::Flat(files) => TrainingSet::Flat(self.read_preprocessed_all(files).await?),
            TrainingSet::ByClient(groups) => {
                let mut loaded = Vec::with_capacity(groups.len());
                for group in groups {
                    loaded.push(self.read_preprocessed_all(group).await?);
                }
                TrainingSet::ByClient(loaded)
            }
        })
    }

    async fn read_preprocessed_all(&self, files: &[File]) -> Result<Vec<Array>> {
        let mut data = Vec::with_capacity(files.len());
        for file in files {
            data.push(self.read_preprocessed(file).await?);
        }
        Ok(data)
    }

    async fn read_preprocessed(&self, file: &File) -> Result<Array> {
        let path = self.selector()?.file_artifact(Stage::Preprocess, file)?;
        let bytes = retry_transient(&file.path, self.config.retry.backoff_ms, || {
            artifacts::read(&path)
        })
        .await?;
        self.preprocessor.read_data(&bytes)
    }

    /// Extract features of every file (this shard's slice)
    pub(super) async fn stage_extract(&mut self, shard: ShardSelection) -> Result<StageReport> {
        self.load_extractor().await?;

        let selector = self.selector()?;
        let files = selector.all_files(&self.config.groups, self.plan.zt_norm)?;
        let mine = self.my_units(&files, Stage::Extract, shard)?;
        info!(total = files.len(), shard_units = mine.len(), "Extracting features");

        let mut report = StageReport::new(JobNode::Extract);
        for file in mine {
            let out: PathBuf = selector.file_artifact(Stage::Extract, file)?;
            self.run_unit(&mut report, &file.path, &[out.clone()], || {
                self.extract_file(file, &out)
            })
            .await?;
        }
        Ok(report)
    }

    async fn extract_file(&self, file: &File, out: &Path) -> Result<()> {
        let input = self.selector()?.file_artifact(Stage::Preprocess, file)?;
        let data = self.preprocessor.read_data(&artifacts::read(&input).await?)?;
        let feature = self.extractor.extract(&data)?;
        artifacts::write_atomic(out, self.extractor.write_feature(&feature)?).await
    }
}
