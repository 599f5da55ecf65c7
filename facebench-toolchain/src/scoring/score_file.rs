//! Text score files
//!
//! One whitespace-separated line per (model, probe) pair:
//!
//! ```text
//! claimed_client_id true_client_id probe_path probe_id score
//! ```

use crate::error::{Result, ToolchainError};
use crate::types::{ClientId, FileId};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreLine {
    /// Client of the model the probe was compared against
    pub claimed_client_id: ClientId,
    /// Client the probe actually belongs to
    pub true_client_id: ClientId,
    pub probe_path: String,
    pub probe_id: FileId,
    pub score: f64,
}

impl ScoreLine {
    pub fn is_genuine(&self) -> bool {
        self.claimed_client_id == self.true_client_id
    }
}

impl fmt::Display for ScoreLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.claimed_client_id, self.true_client_id, self.probe_path, self.probe_id, self.score
        )
    }
}

impl FromStr for ScoreLine {
    type Err = ToolchainError;

    fn from_str(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [claimed, truth, path, id, score] = fields.as_slice() else {
            return Err(ToolchainError::Data(format!(
                "score line needs 5 fields, got {}: '{}'",
                fields.len(),
                line
            )));
        };
        let score = score
            .parse::<f64>()
            .map_err(|e| ToolchainError::Data(format!("bad score '{}': {}", score, e)))?;
        Ok(Self {
            claimed_client_id: ClientId::from(*claimed),
            true_client_id: ClientId::from(*truth),
            probe_path: path.to_string(),
            probe_id: FileId::from(*id),
            score,
        })
    }
}

/// Render lines, newline-terminated
pub fn format_lines(lines: &[ScoreLine]) -> String {
    lines.iter().map(|l| format!("{}\n", l)).collect()
}

/// Parse every non-empty line of a score file
pub fn parse_lines(content: &str) -> Result<Vec<ScoreLine>> {
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::parse)
        .collect()
}
