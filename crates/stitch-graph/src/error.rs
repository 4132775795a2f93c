use serde::{Deserialize, Serialize};

/// A single graph validation issue, with enough location context for a
/// canvas editor to highlight it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
  pub code: String,
  pub message: String,
  pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Location {
  Node { node_id: String },
  Edge { source: String, target: String },
  Graph,
}

/// Raised by `validate`/`compile` when one or more rules fail. Carries the
/// full ordered issue list; callers never persist on this error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("graph validation failed with {} issue(s)", issues.len())]
pub struct ValidationFailure {
  pub issues: Vec<ValidationIssue>,
}
