//! Built-in preprocessors

use super::Preprocessor;
use crate::error::{Result, ToolchainError};
use crate::registry::{param_bool, Params};
use crate::types::{Annotations, Array};

/// Passes raw data through unchanged
///
/// With `require_annotations = true` the preprocessor rejects files the
/// database has no annotations for, which is how annotation-dependent
/// croppers behave.
pub struct IdentityPreprocessor {
    require_annotations: bool,
}

impl IdentityPreprocessor {
    pub fn new() -> Self {
        Self {
            require_annotations: false,
        }
    }

    pub fn from_params(params: &Params) -> Result<Self> {
        Ok(Self {
            require_annotations: param_bool(params, "require_annotations", false)?,
        })
    }
}

impl Default for IdentityPreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Preprocessor for IdentityPreprocessor {
    fn name(&self) -> &str {
        "identity"
    }

    fn preprocess(&self, raw: Array, annotations: Option<&Annotations>) -> Result<Array> {
        if self.require_annotations && annotations.is_none() {
            return Err(ToolchainError::Data(
                "identity preprocessor requires annotations".to_string(),
            ));
        }
        if raw.is_empty() {
            return Err(ToolchainError::Data("empty raw sample".to_string()));
        }
        Ok(raw)
    }
}
