//! Stage: PREPROCESS
//!
//! Raw data → preprocessed sample, one unit per file. The unit key is the
//! file's relative path.

use super::{StageReport, ToolChain};
use crate::artifacts;
use crate::error::Result;
use crate::grid::graph::JobNode;
use crate::sharder::ShardSelection;
use crate::types::{File, Stage};
use std::path::{Path, PathBuf};
use tracing::info;

impl ToolChain {
    /// Preprocess every file of the selected groups (this shard's slice)
    pub(super) async fn stage_preprocess(&self, shard: ShardSelection) -> Result<StageReport> {
        let selector = self.selector()?;
        let files = selector.all_files(&self.config.groups, self.plan.zt_norm)?;
        let mine = self.my_units(&files, Stage::Preprocess, shard)?;
        info!(total = files.len(), shard_units = mine.len(), "Preprocessing");

        let mut report = StageReport::new(JobNode::Preprocess);
        for file in mine {
            let out: PathBuf = selector.file_artifact(Stage::Preprocess, file)?;
            self.run_unit(&mut report, &file.path, &[out.clone()], || {
                self.preprocess_file(file, &out)
            })
            .await?;
        }
        Ok(report)
    }

    async fn preprocess_file(&self, file: &File, out: &Path) -> Result<()> {
        let original = self.database.original_path(file);
        let raw = self.preprocessor.read_original(&original)?;
        let annotations = self.database.annotations(file);
        let data = self.preprocessor.preprocess(raw, annotations.as_ref())?;
        artifacts::write_atomic(out, self.preprocessor.write_data(&data)?).await
    }
}
