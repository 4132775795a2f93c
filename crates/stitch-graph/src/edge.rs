use serde::{Deserialize, Serialize};

/// Edge type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
  /// Gates entity movement and Collector fan-in; must form a DAG.
  Journey,
  /// Side channel; fired alongside journey edges but never gates movement
  /// and may loop.
  System,
  /// A journey edge whose traversal is additionally gated by `predicate`.
  Conditional,
}

impl EdgeType {
  /// Whether this edge type participates in the acyclic check and gates
  /// Collector fan-in / entity movement.
  pub fn is_journey_like(&self) -> bool {
    matches!(self, EdgeType::Journey | EdgeType::Conditional)
  }
}

/// A predicate evaluated against a Worker's JSON output to decide whether a
/// Splitter's outgoing edge fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
  /// Dot-separated path into the upstream output object, e.g. "flag" or
  /// "result.ok".
  pub path: String,
  /// When present, the edge fires only if the resolved value equals this.
  /// When absent, the edge fires when the resolved value is truthy.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub equals: Option<serde_json::Value>,
}

impl Predicate {
  pub fn evaluate(&self, output: &serde_json::Value) -> bool {
    let resolved = resolve_path(output, &self.path);
    match &self.equals {
      Some(expected) => resolved.as_ref() == Some(expected),
      None => resolved.is_some_and(is_truthy),
    }
  }
}

fn resolve_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
  path
    .split('.')
    .filter(|seg| !seg.is_empty())
    .try_fold(value, |cur, seg| cur.get(seg))
}

fn is_truthy(value: &serde_json::Value) -> bool {
  match value {
    serde_json::Value::Null => false,
    serde_json::Value::Bool(b) => *b,
    serde_json::Value::Number(n) => n.as_f64().is_none_or(|f| f != 0.0),
    serde_json::Value::String(s) => !s.is_empty(),
    serde_json::Value::Array(a) => !a.is_empty(),
    serde_json::Value::Object(o) => !o.is_empty(),
  }
}

/// An edge as authored on the visual canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualEdge {
  pub source: String,
  pub target: String,
  pub edge_type: EdgeType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub predicate: Option<Predicate>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub label: Option<String>,
}

/// Compiled edge attributes, keyed by `edge_key(source, target)` in the
/// execution graph's `edge_data` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeData {
  pub edge_type: EdgeType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub predicate: Option<Predicate>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub label: Option<String>,
}

/// `edgeKey = "{source}→{target}"`.
pub fn edge_key(source: &str, target: &str) -> String {
  format!("{source}\u{2192}{target}")
}
