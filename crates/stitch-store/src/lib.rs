//! Data model and storage trait for stitch (C3 "State Store Adapter").
//!
//! [`Store`] is the narrow interface every other component uses to read and
//! atomically mutate persisted state. Implementation details of the backing
//! store (SQLite here, via [`SqliteStore`]) are private to this crate; the
//! rest of the workspace only depends on the trait.

mod error;
mod sqlite;
mod types;

pub use error::StoreError;
pub use sqlite::SqliteStore;
pub use types::*;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use stitch_graph::{ExecutionGraph, VisualGraph};

/// Input for creating a [`Flow`].
#[derive(Debug, Clone)]
pub struct NewFlow {
  pub id: String,
  pub name: String,
  pub canvas_type: CanvasType,
  pub parent_id: Option<String>,
}

/// Input for creating an immutable [`FlowVersion`].
#[derive(Debug, Clone)]
pub struct NewFlowVersion {
  pub id: String,
  pub flow_id: String,
  pub commit_message: Option<String>,
  pub visual_graph: VisualGraph,
  pub execution_graph: ExecutionGraph,
}

/// Input for creating a [`Run`]. `node_states` is initialized by the caller
/// (edge walker) to `pending` for every node in the pinned version.
#[derive(Debug, Clone)]
pub struct NewRun {
  pub id: String,
  pub flow_id: String,
  pub flow_version_id: String,
  pub entity_id: Option<String>,
  pub trigger: Trigger,
  pub node_states: HashMap<String, NodeState>,
}

/// Fields used to upsert an [`Entity`], keyed by `(canvas_id, email)` when an
/// email is present.
#[derive(Debug, Clone)]
pub struct EntityUpsert {
  pub canvas_id: String,
  pub name: String,
  pub email: Option<String>,
  pub avatar: Option<String>,
  pub entity_type: String,
  pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct NewJourneyEvent {
  pub entity_id: String,
  pub event_type: JourneyEventType,
  pub node_id: Option<String>,
  pub edge_id: Option<String>,
  pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct NewWebhookConfig {
  pub id: String,
  pub canvas_id: String,
  pub name: String,
  pub source: WebhookSource,
  pub endpoint_slug: String,
  pub secret: Option<String>,
  pub workflow_id: String,
  pub entry_edge_id: String,
  pub entity_mapping: Value,
  pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
  pub webhook_config_id: String,
  pub raw_payload: Value,
}

/// A patch applied to a single node's state during a CAS write. Timestamps
/// are stamped by the store: `started_at` on entry to `running`,
/// `finished_at` on entry to any terminal status.
#[derive(Debug, Clone)]
pub struct NodeStatePatch {
  pub status: NodeStatus,
  pub output: Option<Value>,
  pub error: Option<String>,
}

/// One node's CAS request within a bulk write.
#[derive(Debug, Clone)]
pub struct NodeStateCas {
  pub node_id: String,
  pub expected: NodeStatus,
  pub patch: NodeStatePatch,
}

/// Result of a CAS write against a node's state.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
  /// The expected status matched; the patch was applied.
  Applied(NodeState),
  /// The node was already in the patch's target status with an identical
  /// output — an idempotent duplicate.
  NoOp(NodeState),
  /// The node's current status didn't match `expected`, and the current
  /// state isn't an idempotent duplicate of the requested patch.
  Conflict(NodeState),
}

/// Storage trait for all stitch persisted state (C3).
#[async_trait]
pub trait Store: Send + Sync {
  // -- Flow / Version --------------------------------------------------
  async fn create_flow(&self, flow: NewFlow) -> Result<Flow, StoreError>;
  async fn get_flow(&self, flow_id: &str) -> Result<Flow, StoreError>;
  async fn set_flow_current_version(
    &self,
    flow_id: &str,
    version_id: &str,
  ) -> Result<(), StoreError>;

  async fn create_flow_version(&self, version: NewFlowVersion) -> Result<FlowVersion, StoreError>;
  async fn get_flow_version(&self, version_id: &str) -> Result<FlowVersion, StoreError>;
  async fn list_flow_versions(&self, flow_id: &str) -> Result<Vec<FlowVersionMeta>, StoreError>;

  // -- Run --------------------------------------------------------------
  async fn create_run(&self, run: NewRun) -> Result<Run, StoreError>;
  /// Admin read: bypasses end-user visibility rules (webhook/callback paths
  /// have no user context).
  async fn get_run(&self, run_id: &str) -> Result<Run, StoreError>;

  /// Atomic compare-and-set on a single node's state.
  async fn cas_node_state(
    &self,
    run_id: &str,
    node_id: &str,
    expected: NodeStatus,
    patch: NodeStatePatch,
  ) -> Result<CasOutcome, StoreError>;

  /// Atomic bulk compare-and-set, single transaction.
  async fn cas_node_states(
    &self,
    run_id: &str,
    items: Vec<NodeStateCas>,
  ) -> Result<Vec<CasOutcome>, StoreError>;

  // -- Entity / Journey ---------------------------------------------------
  async fn upsert_entity(&self, upsert: EntityUpsert) -> Result<Entity, StoreError>;
  async fn get_entity(&self, entity_id: &str) -> Result<Entity, StoreError>;
  /// Moves an entity onto a node, clearing any edge position.
  async fn set_entity_node(
    &self,
    entity_id: &str,
    node_id: &str,
  ) -> Result<Entity, StoreError>;
  async fn append_journey_event(
    &self,
    event: NewJourneyEvent,
  ) -> Result<JourneyEvent, StoreError>;

  /// Most recent run where some node is `waiting_for_user` for this entity,
  /// together with that node's id.
  async fn find_latest_waiting_run(
    &self,
    entity_id: &str,
  ) -> Result<Option<(Run, String)>, StoreError>;

  // -- Webhook config / events -------------------------------------------
  async fn create_webhook_config(
    &self,
    config: NewWebhookConfig,
  ) -> Result<WebhookConfig, StoreError>;
  async fn get_webhook_config_by_slug(
    &self,
    slug: &str,
  ) -> Result<Option<WebhookConfig>, StoreError>;

  async fn create_webhook_event(
    &self,
    event: NewWebhookEvent,
  ) -> Result<WebhookEvent, StoreError>;
  async fn update_webhook_event_status(
    &self,
    event_id: &str,
    status: WebhookEventStatus,
    entity_id: Option<String>,
    run_id: Option<String>,
    error: Option<String>,
  ) -> Result<WebhookEvent, StoreError>;
}

pub(crate) fn now() -> DateTime<Utc> {
  Utc::now()
}
