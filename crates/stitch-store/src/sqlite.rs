use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::{
  CasOutcome, Entity, EntityUpsert, Flow, FlowVersion, FlowVersionMeta, JourneyEvent,
  NewFlow, NewFlowVersion, NewJourneyEvent, NewRun, NewWebhookConfig, NewWebhookEvent,
  NodeState, NodeStateCas, NodeStatePatch, NodeStatus, Run, Store, StoreError, WebhookConfig,
  WebhookEvent, WebhookEventStatus, now,
};

/// SQLite-backed implementation of [`Store`].
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Run the embedded migrations. Intended for binary startup and tests.
  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await
  }

  async fn cas_node_state_tx(
    tx: &mut Transaction<'_, Sqlite>,
    run_id: &str,
    node_id: &str,
    expected: NodeStatus,
    patch: NodeStatePatch,
  ) -> Result<(HashMap<String, NodeState>, CasOutcome), StoreError> {
    let row: (String,) = sqlx::query_as("SELECT node_states FROM runs WHERE id = ?")
      .bind(run_id)
      .fetch_optional(&mut **tx)
      .await?
      .ok_or_else(|| StoreError::NotFound(format!("run {run_id}")))?;

    let mut states: HashMap<String, NodeState> =
      serde_json::from_str(&row.0).map_err(|e| StoreError::Database(sqlx::Error::Decode(e.into())))?;

    let current = states.entry(node_id.to_string()).or_default().clone();

    let outcome = if current.status == expected {
      let mut next = current.clone();
      next.status = patch.status;
      next.output = patch.output.clone();
      next.error = patch.error.clone();
      if patch.status == NodeStatus::Running {
        next.started_at = Some(now());
      }
      if patch.status.is_terminal() {
        next.finished_at = Some(now());
      }
      states.insert(node_id.to_string(), next.clone());
      CasOutcome::Applied(next)
    } else if current.status == patch.status && current.output == patch.output {
      CasOutcome::NoOp(current)
    } else {
      return Ok((states, CasOutcome::Conflict(current)));
    };

    Ok((states, outcome))
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn create_flow(&self, flow: NewFlow) -> Result<Flow, StoreError> {
    let created_at = now();
    sqlx::query(
      r#"
      INSERT INTO flows (id, name, canvas_type, parent_id, current_version_id, created_at, deleted_at)
      VALUES (?, ?, ?, ?, NULL, ?, NULL)
      "#,
    )
    .bind(&flow.id)
    .bind(&flow.name)
    .bind(flow.canvas_type)
    .bind(&flow.parent_id)
    .bind(created_at)
    .execute(&self.pool)
    .await?;

    self.get_flow(&flow.id).await
  }

  async fn get_flow(&self, flow_id: &str) -> Result<Flow, StoreError> {
    sqlx::query_as(
      r#"
      SELECT id, name, canvas_type, parent_id, current_version_id, created_at, deleted_at
      FROM flows WHERE id = ?
      "#,
    )
    .bind(flow_id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("flow {flow_id}")))
  }

  async fn set_flow_current_version(
    &self,
    flow_id: &str,
    version_id: &str,
  ) -> Result<(), StoreError> {
    let result = sqlx::query("UPDATE flows SET current_version_id = ? WHERE id = ?")
      .bind(version_id)
      .bind(flow_id)
      .execute(&self.pool)
      .await?;
    if result.rows_affected() == 0 {
      return Err(StoreError::NotFound(format!("flow {flow_id}")));
    }
    Ok(())
  }

  async fn create_flow_version(&self, version: NewFlowVersion) -> Result<FlowVersion, StoreError> {
    let created_at = now();
    sqlx::query(
      r#"
      INSERT INTO flow_versions (id, flow_id, commit_message, visual_graph, execution_graph, created_at)
      VALUES (?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&version.id)
    .bind(&version.flow_id)
    .bind(&version.commit_message)
    .bind(sqlx::types::Json(&version.visual_graph))
    .bind(sqlx::types::Json(&version.execution_graph))
    .bind(created_at)
    .execute(&self.pool)
    .await?;

    self.get_flow_version(&version.id).await
  }

  async fn get_flow_version(&self, version_id: &str) -> Result<FlowVersion, StoreError> {
    sqlx::query_as(
      r#"
      SELECT id, flow_id, commit_message, visual_graph, execution_graph, created_at
      FROM flow_versions WHERE id = ?
      "#,
    )
    .bind(version_id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("flow version {version_id}")))
  }

  async fn list_flow_versions(&self, flow_id: &str) -> Result<Vec<FlowVersionMeta>, StoreError> {
    Ok(sqlx::query_as(
      r#"
      SELECT id, flow_id, commit_message, created_at
      FROM flow_versions WHERE flow_id = ?
      ORDER BY created_at DESC
      "#,
    )
    .bind(flow_id)
    .fetch_all(&self.pool)
    .await?)
  }

  async fn create_run(&self, run: NewRun) -> Result<Run, StoreError> {
    let created_at = now();
    sqlx::query(
      r#"
      INSERT INTO runs (id, flow_id, flow_version_id, entity_id, trigger, node_states, created_at)
      VALUES (?, ?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&run.id)
    .bind(&run.flow_id)
    .bind(&run.flow_version_id)
    .bind(&run.entity_id)
    .bind(sqlx::types::Json(&run.trigger))
    .bind(sqlx::types::Json(&run.node_states))
    .bind(created_at)
    .execute(&self.pool)
    .await?;

    self.get_run(&run.id).await
  }

  async fn get_run(&self, run_id: &str) -> Result<Run, StoreError> {
    sqlx::query_as(
      r#"
      SELECT id, flow_id, flow_version_id, entity_id, trigger, node_states, created_at
      FROM runs WHERE id = ?
      "#,
    )
    .bind(run_id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("run {run_id}")))
  }

  async fn cas_node_state(
    &self,
    run_id: &str,
    node_id: &str,
    expected: NodeStatus,
    patch: NodeStatePatch,
  ) -> Result<CasOutcome, StoreError> {
    let mut tx = self.pool.begin().await?;
    let (states, outcome) =
      Self::cas_node_state_tx(&mut tx, run_id, node_id, expected, patch).await?;

    if matches!(outcome, CasOutcome::Applied(_)) {
      let encoded = serde_json::to_string(&states)
        .map_err(|e| StoreError::Database(sqlx::Error::Encode(e.into())))?;
      sqlx::query("UPDATE runs SET node_states = ? WHERE id = ?")
        .bind(encoded)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(outcome)
  }

  async fn cas_node_states(
    &self,
    run_id: &str,
    items: Vec<NodeStateCas>,
  ) -> Result<Vec<CasOutcome>, StoreError> {
    let mut tx = self.pool.begin().await?;
    let mut outcomes = Vec::with_capacity(items.len());
    let mut applied_any = false;
    let mut states: Option<HashMap<String, NodeState>> = None;

    for item in items {
      let (next_states, outcome) = Self::cas_node_state_tx(
        &mut tx,
        run_id,
        &item.node_id,
        item.expected,
        item.patch,
      )
      .await?;
      if matches!(outcome, CasOutcome::Applied(_)) {
        applied_any = true;
      }
      states = Some(next_states);
      outcomes.push(outcome);
    }

    if applied_any {
      if let Some(states) = states {
        let encoded = serde_json::to_string(&states)
          .map_err(|e| StoreError::Database(sqlx::Error::Encode(e.into())))?;
        sqlx::query("UPDATE runs SET node_states = ? WHERE id = ?")
          .bind(encoded)
          .bind(run_id)
          .execute(&mut *tx)
          .await?;
      }
    }
    tx.commit().await?;
    Ok(outcomes)
  }

  async fn upsert_entity(&self, upsert: EntityUpsert) -> Result<Entity, StoreError> {
    if let Some(email) = upsert.email.as_deref() {
      let existing: Option<(String,)> =
        sqlx::query_as("SELECT id FROM entities WHERE canvas_id = ? AND email = ?")
          .bind(&upsert.canvas_id)
          .bind(email)
          .fetch_optional(&self.pool)
          .await?;

      if let Some((id,)) = existing {
        sqlx::query(
          r#"
          UPDATE entities SET name = ?, avatar = ?, entity_type = ?, metadata = ?
          WHERE id = ?
          "#,
        )
        .bind(&upsert.name)
        .bind(&upsert.avatar)
        .bind(&upsert.entity_type)
        .bind(sqlx::types::Json(&upsert.metadata))
        .bind(&id)
        .execute(&self.pool)
        .await?;
        return self.get_entity(&id).await;
      }
    }

    let id = Uuid::new_v4().to_string();
    let created_at = now();
    sqlx::query(
      r#"
      INSERT INTO entities
        (id, canvas_id, name, email, avatar, entity_type, current_node_id, current_edge_id, edge_progress, metadata, created_at)
      VALUES (?, ?, ?, ?, ?, ?, NULL, NULL, NULL, ?, ?)
      "#,
    )
    .bind(&id)
    .bind(&upsert.canvas_id)
    .bind(&upsert.name)
    .bind(&upsert.email)
    .bind(&upsert.avatar)
    .bind(&upsert.entity_type)
    .bind(sqlx::types::Json(&upsert.metadata))
    .bind(created_at)
    .execute(&self.pool)
    .await?;

    self.get_entity(&id).await
  }

  async fn get_entity(&self, entity_id: &str) -> Result<Entity, StoreError> {
    sqlx::query_as(
      r#"
      SELECT id, canvas_id, name, email, avatar, entity_type, current_node_id, current_edge_id, edge_progress, metadata, created_at
      FROM entities WHERE id = ?
      "#,
    )
    .bind(entity_id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("entity {entity_id}")))
  }

  async fn set_entity_node(&self, entity_id: &str, node_id: &str) -> Result<Entity, StoreError> {
    let result = sqlx::query(
      r#"
      UPDATE entities
      SET current_node_id = ?, current_edge_id = NULL, edge_progress = NULL
      WHERE id = ?
      "#,
    )
    .bind(node_id)
    .bind(entity_id)
    .execute(&self.pool)
    .await?;
    if result.rows_affected() == 0 {
      return Err(StoreError::NotFound(format!("entity {entity_id}")));
    }
    self.get_entity(entity_id).await
  }

  async fn append_journey_event(
    &self,
    event: NewJourneyEvent,
  ) -> Result<JourneyEvent, StoreError> {
    let id = Uuid::new_v4().to_string();
    let timestamp = now();
    sqlx::query(
      r#"
      INSERT INTO journey_events (id, entity_id, event_type, node_id, edge_id, timestamp, metadata)
      VALUES (?, ?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&id)
    .bind(&event.entity_id)
    .bind(event.event_type)
    .bind(&event.node_id)
    .bind(&event.edge_id)
    .bind(timestamp)
    .bind(sqlx::types::Json(&event.metadata))
    .execute(&self.pool)
    .await?;

    sqlx::query_as(
      r#"
      SELECT id, entity_id, event_type, node_id, edge_id, timestamp, metadata
      FROM journey_events WHERE id = ?
      "#,
    )
    .bind(&id)
    .fetch_one(&self.pool)
    .await
    .map_err(StoreError::from)
  }

  async fn find_latest_waiting_run(
    &self,
    entity_id: &str,
  ) -> Result<Option<(Run, String)>, StoreError> {
    let runs: Vec<Run> = sqlx::query_as(
      r#"
      SELECT id, flow_id, flow_version_id, entity_id, trigger, node_states, created_at
      FROM runs WHERE entity_id = ?
      ORDER BY created_at DESC
      "#,
    )
    .bind(entity_id)
    .fetch_all(&self.pool)
    .await?;

    for run in runs {
      if let Some((node_id, _)) = run
        .node_states
        .iter()
        .find(|(_, state)| state.status == NodeStatus::WaitingForUser)
      {
        let node_id = node_id.clone();
        return Ok(Some((run, node_id)));
      }
    }
    Ok(None)
  }

  async fn create_webhook_config(
    &self,
    config: NewWebhookConfig,
  ) -> Result<WebhookConfig, StoreError> {
    let existing: Option<(String,)> =
      sqlx::query_as("SELECT id FROM webhook_configs WHERE endpoint_slug = ?")
        .bind(&config.endpoint_slug)
        .fetch_optional(&self.pool)
        .await?;
    if existing.is_some() {
      return Err(StoreError::SlugConflict(config.endpoint_slug));
    }

    sqlx::query(
      r#"
      INSERT INTO webhook_configs
        (id, canvas_id, name, source, endpoint_slug, secret, workflow_id, entry_edge_id, entity_mapping, is_active)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&config.id)
    .bind(&config.canvas_id)
    .bind(&config.name)
    .bind(config.source)
    .bind(&config.endpoint_slug)
    .bind(&config.secret)
    .bind(&config.workflow_id)
    .bind(&config.entry_edge_id)
    .bind(sqlx::types::Json(&config.entity_mapping))
    .bind(config.is_active)
    .execute(&self.pool)
    .await?;

    self
      .get_webhook_config_by_slug(&config.endpoint_slug)
      .await?
      .ok_or_else(|| StoreError::NotFound(format!("webhook config {}", config.id)))
  }

  async fn get_webhook_config_by_slug(
    &self,
    slug: &str,
  ) -> Result<Option<WebhookConfig>, StoreError> {
    Ok(sqlx::query_as(
      r#"
      SELECT id, canvas_id, name, source, endpoint_slug, secret, workflow_id, entry_edge_id, entity_mapping, is_active
      FROM webhook_configs WHERE endpoint_slug = ?
      "#,
    )
    .bind(slug)
    .fetch_optional(&self.pool)
    .await?)
  }

  async fn create_webhook_event(
    &self,
    event: NewWebhookEvent,
  ) -> Result<WebhookEvent, StoreError> {
    let id = Uuid::new_v4().to_string();
    let received_at = now();
    sqlx::query(
      r#"
      INSERT INTO webhook_events (id, webhook_config_id, received_at, raw_payload, status, entity_id, run_id, error)
      VALUES (?, ?, ?, ?, ?, NULL, NULL, NULL)
      "#,
    )
    .bind(&id)
    .bind(&event.webhook_config_id)
    .bind(received_at)
    .bind(sqlx::types::Json(&event.raw_payload))
    .bind(WebhookEventStatus::Pending)
    .execute(&self.pool)
    .await?;

    sqlx::query_as(
      r#"
      SELECT id, webhook_config_id, received_at, raw_payload, status, entity_id, run_id, error
      FROM webhook_events WHERE id = ?
      "#,
    )
    .bind(&id)
    .fetch_one(&self.pool)
    .await
    .map_err(StoreError::from)
  }

  async fn update_webhook_event_status(
    &self,
    event_id: &str,
    status: WebhookEventStatus,
    entity_id: Option<String>,
    run_id: Option<String>,
    error: Option<String>,
  ) -> Result<WebhookEvent, StoreError> {
    let result = sqlx::query(
      r#"
      UPDATE webhook_events
      SET status = ?, entity_id = ?, run_id = ?, error = ?
      WHERE id = ?
      "#,
    )
    .bind(status)
    .bind(&entity_id)
    .bind(&run_id)
    .bind(&error)
    .bind(event_id)
    .execute(&self.pool)
    .await?;
    if result.rows_affected() == 0 {
      return Err(StoreError::NotFound(format!("webhook event {event_id}")));
    }

    sqlx::query_as(
      r#"
      SELECT id, webhook_config_id, received_at, raw_payload, status, entity_id, run_id, error
      FROM webhook_events WHERE id = ?
      "#,
    )
    .bind(event_id)
    .fetch_one(&self.pool)
    .await
    .map_err(StoreError::from)
  }
}
