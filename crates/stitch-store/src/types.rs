use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stitch_graph::{ExecutionGraph, VisualGraph};

/// `canvas_type` on [`Flow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum CanvasType {
  Bmc,
  Workflow,
}

/// A top-level or nested canvas. `current_version_id` is the version new
/// runs bind to when none is specified explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Flow {
  pub id: String,
  pub name: String,
  pub canvas_type: CanvasType,
  pub parent_id: Option<String>,
  pub current_version_id: Option<String>,
  pub created_at: DateTime<Utc>,
  pub deleted_at: Option<DateTime<Utc>>,
}

/// An immutable compiled version of a flow's graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FlowVersion {
  pub id: String,
  pub flow_id: String,
  pub commit_message: Option<String>,
  pub visual_graph: sqlx::types::Json<VisualGraph>,
  pub execution_graph: sqlx::types::Json<ExecutionGraph>,
  pub created_at: DateTime<Utc>,
}

/// Version metadata without the heavy graph blobs, for list views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FlowVersionMeta {
  pub id: String,
  pub flow_id: String,
  pub commit_message: Option<String>,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TriggerType {
  Webhook,
  Manual,
  Scheduled,
  Demo,
}

/// Metadata about what started a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
  #[serde(rename = "type")]
  pub trigger_type: TriggerType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub event_id: Option<String>,
  pub timestamp: DateTime<Utc>,
}

/// Node execution status, following the edge walker's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
  Pending,
  Running,
  Completed,
  Failed,
  WaitingForUser,
  Skipped,
}

impl NodeStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Skipped
    )
  }
}

/// Per-node state within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NodeState {
  pub status: NodeStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub output: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<DateTime<Utc>>,
}

impl Default for NodeStatus {
  fn default() -> Self {
    NodeStatus::Pending
  }
}

/// A single execution instance pinned to a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Run {
  pub id: String,
  pub flow_id: String,
  pub flow_version_id: String,
  pub entity_id: Option<String>,
  pub trigger: sqlx::types::Json<Trigger>,
  pub node_states: sqlx::types::Json<HashMap<String, NodeState>>,
  pub created_at: DateTime<Utc>,
}

/// A tracked identity moving through a canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Entity {
  pub id: String,
  pub canvas_id: String,
  pub name: String,
  pub email: Option<String>,
  pub avatar: Option<String>,
  pub entity_type: String,
  pub current_node_id: Option<String>,
  pub current_edge_id: Option<String>,
  pub edge_progress: Option<f64>,
  pub metadata: sqlx::types::Json<serde_json::Value>,
  pub created_at: DateTime<Utc>,
}

impl Entity {
  /// Invariant: `current_node_id` and `current_edge_id` are mutually
  /// exclusive, and `edge_progress` is only meaningful while on an edge.
  pub fn is_consistent(&self) -> bool {
    match (&self.current_node_id, &self.current_edge_id) {
      (Some(_), Some(_)) => false,
      (None, Some(_)) => self.edge_progress.is_some_and(|p| (0.0..=1.0).contains(&p) && p.is_finite()),
      _ => true,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JourneyEventType {
  EnteredNode,
  LeftNode,
  OnEdge,
  ArrivedVia,
  MovedByWorker,
}

/// Append-only event describing an entity's movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct JourneyEvent {
  pub id: String,
  pub entity_id: String,
  pub event_type: JourneyEventType,
  pub node_id: Option<String>,
  pub edge_id: Option<String>,
  pub timestamp: DateTime<Utc>,
  pub metadata: sqlx::types::Json<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum WebhookSource {
  Stripe,
  Typeform,
  Calendly,
  N8n,
  Custom,
}

/// Inbound webhook endpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookConfig {
  pub id: String,
  pub canvas_id: String,
  pub name: String,
  pub source: WebhookSource,
  pub endpoint_slug: String,
  pub secret: Option<String>,
  pub workflow_id: String,
  pub entry_edge_id: String,
  pub entity_mapping: sqlx::types::Json<serde_json::Value>,
  pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum WebhookEventStatus {
  Pending,
  Completed,
  Failed,
  SignatureInvalid,
  ConfigMissing,
}

/// Append-only audit log entry for an inbound webhook delivery. Retained
/// even if the run is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookEvent {
  pub id: String,
  pub webhook_config_id: String,
  pub received_at: DateTime<Utc>,
  pub raw_payload: sqlx::types::Json<serde_json::Value>,
  pub status: WebhookEventStatus,
  pub entity_id: Option<String>,
  pub run_id: Option<String>,
  pub error: Option<String>,
}
