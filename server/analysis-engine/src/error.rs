//! Structured error types for the analysis engine.
//!
//! Most parsing paths skip bad lines instead of erroring (bad telemetry must
//! never abort a batch); these variants exist for the boundary seams — CLI
//! input, the metrics source, and the external reasoning client.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
  #[error("validation: {field}: {reason}")]
  Validation { field: String, reason: String },

  #[error("parse: {0}")]
  Parse(String),

  #[error("external: {0}")]
  External(String),

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),
}

impl AnalysisError {
  pub fn validation(field: &str, reason: &str) -> Self {
    Self::Validation {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn parse(msg: impl Into<String>) -> Self {
    Self::Parse(msg.into())
  }

  pub fn external(msg: impl Into<String>) -> Self {
    Self::External(msg.into())
  }
}
