//! Stages: ENROLL_TRAIN, ENROLL
//!
//! Enroller training always receives world features partitioned by client.
//! Enrollment runs once per cohort and group: `enroll-N-<group>` for the
//! models under test, `enroll-T-<group>` for the T-norm cohort.

use super::{require_training, StageReport, ToolChain};
use crate::artifacts;
use crate::capabilities::FeatureSource;
use crate::error::Result;
use crate::grid::graph::JobNode;
use crate::sharder::ShardSelection;
use crate::types::{Cohort, File, Group, ModelId, Stage, TrainingSet};
use std::path::{Path, PathBuf};
use tracing::info;

impl ToolChain {
    /// Train the enroller once, writing its parameter blob
    pub(super) async fn stage_enroll_train(&mut self) -> Result<StageReport> {
        let selector = self.selector()?;
        let artifact = selector.trainer_artifact(Stage::EnrollTrain)?;
        let training = selector.training_files(true)?;

        let mut report = StageReport::new(JobNode::EnrollTrain);
        self.run_trainer(&mut report, Stage::EnrollTrain, &artifact, &training)
            .await?;
        Ok(report)
    }

    pub(super) async fn train_enroller(&mut self, artifact: &Path, training: &TrainingSet<File>) -> Result<()> {
        require_training(training, "enroller")?;
        self.load_feature_readers(self.plan.enroll_source).await?;
        if self.plan.load_projector_for_enroller_training {
            self.load_projector().await?;
        }

        let features = match self
            .read_training_features(self.plan.enroll_source, training)
            .await?
        {
            TrainingSet::ByClient(groups) => groups,
            TrainingSet::Flat(features) => vec![features],
        };
        info!(
            clients = features.len(),
            files = training.total_len(),
            "Training enroller"
        );
        let blob = self.tool.train_enroller(&features)?;
        self.write_trained(artifact, blob, training).await
    }

    /// Enroll every model of a cohort in a group (this shard's slice)
    pub(super) async fn stage_enroll(
        &mut self,
        cohort: Cohort,
        group: Group,
        shard: ShardSelection,
    ) -> Result<StageReport> {
        self.load_feature_readers(self.plan.enroll_source).await?;
        if self.plan.performs_projection {
            self.load_projector().await?;
        }
        self.load_enroller().await?;

        let selector = self.selector()?;
        let models = selector.cohort_models(cohort, group)?;
        let mine = self.my_units(&models, Stage::Enroll, shard)?;
        info!(
            cohort = cohort.letter(),
            group = %group,
            total = models.len(),
            shard_units = mine.len(),
            "Enrolling models"
        );

        let mut report = StageReport::new(JobNode::Enroll { cohort, group });
        for model in mine {
            let out: PathBuf = selector.model_artifact(cohort, model);
            self.run_unit(&mut report, model.as_str(), &[out.clone()], || {
                self.enroll_model(cohort, group, model, &out)
            })
            .await?;
        }
        Ok(report)
    }

    async fn enroll_model(&self, cohort: Cohort, group: Group, model: &ModelId, out: &Path) -> Result<()> {
        let files = self.selector()?.enrollment_files(cohort, model, group)?;
        let features = self.read_features(self.plan.enroll_source, &files).await?;
        let enrolled = self.tool.enroll(&features)?;
        artifacts::write_atomic(out, self.tool.write_model(&enrolled)?).await
    }

    /// Load whatever component parameters reading features from `source` needs
    pub(super) async fn load_feature_readers(&mut self, source: FeatureSource) -> Result<()> {
        match source {
            FeatureSource::Extracted => self.load_extractor().await,
            FeatureSource::Projected => Ok(()),
        }
    }
}
