//! Capability probe
//!
//! Turns the capability records of the resolved components and the skip
//! flags into an [`ExecutionPlan`]: which stages run, and which artifacts
//! feed enrollment and scoring.

use crate::components::Capabilities;
use crate::config::SkipFlags;
use crate::error::{Result, ToolchainError};
use crate::types::Stage;
use std::collections::BTreeMap;
use std::fmt;

/// Why a stage does or does not run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageDecision {
    Run,
    SkippedByFlag,
    /// The components do not need this stage
    NotRequired,
}

impl fmt::Display for StageDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageDecision::Run => "run",
            StageDecision::SkippedByFlag => "skipped",
            StageDecision::NotRequired => "not required",
        })
    }
}

/// Where a consumer reads feature artifacts from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSource {
    Extracted,
    Projected,
}

/// Stage decisions plus the data-flow choices derived from capabilities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    decisions: BTreeMap<Stage, StageDecision>,
    /// Extraction needs the trained extractor blob
    pub extractor_trained: bool,
    pub extractor_split_by_client: bool,
    pub performs_projection: bool,
    pub projector_trained: bool,
    pub projection_split_by_client: bool,
    pub enroller_trained: bool,
    pub load_projector_for_enroller_training: bool,
    /// Features used for enroller training and enrollment
    pub enroll_source: FeatureSource,
    /// Features used for probes and Z-files
    pub probe_source: FeatureSource,
    pub zt_norm: bool,
}

fn decide(required: bool, skipped: bool) -> StageDecision {
    match (required, skipped) {
        (false, _) => StageDecision::NotRequired,
        (true, true) => StageDecision::SkippedByFlag,
        (true, false) => StageDecision::Run,
    }
}

impl ExecutionPlan {
    /// Build the plan from the three algorithm components
    pub fn probe(
        preprocessor: &Capabilities,
        extractor: &Capabilities,
        tool: &Capabilities,
        skip: &SkipFlags,
        zt_norm: bool,
    ) -> Result<Self> {
        if preprocessor.requires_training {
            return Err(ToolchainError::Config(
                "preprocessor training is not supported".to_string(),
            ));
        }
        if tool.requires_projection_training && !tool.performs_projection {
            tracing::warn!("Tool requires projection training without projecting; ignored");
        }

        let performs_projection = tool.performs_projection;
        let projector_trained = performs_projection && tool.requires_projection_training;
        let enroll_source = if performs_projection && tool.use_projected_features_for_enrollment {
            FeatureSource::Projected
        } else {
            FeatureSource::Extracted
        };
        let probe_source = if performs_projection {
            FeatureSource::Projected
        } else {
            FeatureSource::Extracted
        };

        let mut decisions = BTreeMap::new();
        decisions.insert(Stage::Preprocess, decide(true, skip.preprocessing));
        decisions.insert(
            Stage::ExtractTrain,
            decide(extractor.requires_training, skip.extractor_training),
        );
        decisions.insert(Stage::Extract, decide(true, skip.extraction));
        decisions.insert(
            Stage::ProjectTrain,
            decide(projector_trained, skip.projection_training),
        );
        decisions.insert(Stage::Project, decide(performs_projection, skip.projection));
        decisions.insert(
            Stage::EnrollTrain,
            decide(tool.requires_enroller_training, skip.enroller_training),
        );
        decisions.insert(Stage::Enroll, decide(true, skip.enrollment));
        decisions.insert(Stage::Score, decide(true, skip.score_computation));
        decisions.insert(Stage::ZNormMerge, decide(true, skip.score_computation));
        decisions.insert(Stage::Concatenate, decide(true, skip.concatenation));

        Ok(Self {
            decisions,
            extractor_trained: extractor.requires_training,
            extractor_split_by_client: extractor.split_training_by_client,
            performs_projection,
            projector_trained,
            projection_split_by_client: tool.split_training_by_client,
            enroller_trained: tool.requires_enroller_training,
            load_projector_for_enroller_training: performs_projection
                && tool
                    .load_projector_for_enroller_training
                    .unwrap_or(performs_projection),
            enroll_source,
            probe_source,
            zt_norm,
        })
    }

    pub fn decision(&self, stage: Stage) -> StageDecision {
        self.decisions
            .get(&stage)
            .copied()
            .unwrap_or(StageDecision::NotRequired)
    }

    pub fn runs(&self, stage: Stage) -> bool {
        self.decision(stage) == StageDecision::Run
    }

    /// Stages that produce artifacts for this experiment, run or skipped
    pub fn required(&self, stage: Stage) -> bool {
        self.decision(stage) != StageDecision::NotRequired
    }

    /// Log the decision of every stage
    pub fn log(&self) {
        for stage in Stage::ALL {
            tracing::info!(stage = %stage, decision = %self.decision(stage), "Execution plan");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> Capabilities {
        Capabilities::default()
    }

    #[test]
    fn test_plain_tool_skips_projection_and_training() {
        let plan =
            ExecutionPlan::probe(&plain(), &plain(), &plain(), &SkipFlags::default(), true).unwrap();
        assert!(plan.runs(Stage::Preprocess));
        assert_eq!(plan.decision(Stage::ExtractTrain), StageDecision::NotRequired);
        assert_eq!(plan.decision(Stage::ProjectTrain), StageDecision::NotRequired);
        assert_eq!(plan.decision(Stage::Project), StageDecision::NotRequired);
        assert_eq!(plan.enroll_source, FeatureSource::Extracted);
        assert_eq!(plan.probe_source, FeatureSource::Extracted);
    }

    #[test]
    fn test_projection_gates_projection_training() {
        let tool = Capabilities {
            requires_projection_training: true,
            ..Default::default()
        };
        let plan =
            ExecutionPlan::probe(&plain(), &plain(), &tool, &SkipFlags::default(), true).unwrap();
        assert!(!plan.required(Stage::ProjectTrain));

        let tool = Capabilities {
            performs_projection: true,
            requires_projection_training: true,
            ..Default::default()
        };
        let plan =
            ExecutionPlan::probe(&plain(), &plain(), &tool, &SkipFlags::default(), true).unwrap();
        assert!(plan.runs(Stage::ProjectTrain));
        assert_eq!(plan.enroll_source, FeatureSource::Extracted);
        assert_eq!(plan.probe_source, FeatureSource::Projected);
    }

    #[test]
    fn test_skip_score_covers_merge() {
        let skip = SkipFlags {
            score_computation: true,
            ..Default::default()
        };
        let plan = ExecutionPlan::probe(&plain(), &plain(), &plain(), &skip, true).unwrap();
        assert_eq!(plan.decision(Stage::Score), StageDecision::SkippedByFlag);
        assert_eq!(plan.decision(Stage::ZNormMerge), StageDecision::SkippedByFlag);
        assert!(plan.runs(Stage::Concatenate));
    }

    #[test]
    fn test_projector_for_enroller_training_follows_projection() {
        let mut tool = Capabilities {
            performs_projection: true,
            requires_enroller_training: true,
            ..Default::default()
        };
        let plan =
            ExecutionPlan::probe(&plain(), &plain(), &tool, &SkipFlags::default(), true).unwrap();
        assert!(plan.load_projector_for_enroller_training);

        tool.load_projector_for_enroller_training = Some(false);
        let plan =
            ExecutionPlan::probe(&plain(), &plain(), &tool, &SkipFlags::default(), true).unwrap();
        assert!(!plan.load_projector_for_enroller_training);
    }

    #[test]
    fn test_trained_preprocessor_rejected() {
        let pre = Capabilities {
            requires_training: true,
            ..Default::default()
        };
        assert!(ExecutionPlan::probe(&pre, &plain(), &plain(), &SkipFlags::default(), true).is_err());
    }
}
