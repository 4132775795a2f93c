//! Entity movement and journey bookkeeping (C8).
//!
//! A worker node may declare `entity_movement.on_success` / `on_failure`
//! to relocate the run's bound entity across canvas sections.
//! [`apply_movement`] is called by the node handler (`stitch-engine`) after
//! a Worker terminates; it is a no-op when the run has no bound entity or
//! the node declares no movement for that outcome.

use stitch_graph::MovementRule;
use stitch_store::{JourneyEventType, NewJourneyEvent, Store};

#[derive(Debug, thiserror::Error)]
pub enum EntityMovementError {
  #[error(transparent)]
  Store(#[from] stitch_store::StoreError),
}

/// Outcome of a Worker node's termination, for movement-rule selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
  Success,
  Failure,
}

/// Applies the declared movement rule (if any) for the given outcome, then
/// appends a journey event.
///
/// No-op when `entity_id` is `None`. `run_id` and `node_id` are
/// recorded in the journey event's metadata regardless of whether a
/// movement rule fired, so traversal without a declared rule still leaves
/// a trace.
pub async fn apply_movement(
  store: &dyn Store,
  entity_id: Option<&str>,
  run_id: &str,
  node_id: &str,
  outcome: WorkerOutcome,
  rule: Option<&MovementRule>,
) -> Result<(), EntityMovementError> {
  let Some(entity_id) = entity_id else {
    return Ok(());
  };

  match rule {
    Some(rule) => {
      if rule.mark_current_node.unwrap_or(true) {
        store.set_entity_node(entity_id, &rule.target_section_id).await?;
      }
      let event_type = rule
        .record_journey_as
        .as_deref()
        .and_then(parse_event_type)
        .unwrap_or(JourneyEventType::MovedByWorker);
      store
        .append_journey_event(NewJourneyEvent {
          entity_id: entity_id.to_string(),
          event_type,
          node_id: Some(node_id.to_string()),
          edge_id: None,
          metadata: serde_json::json!({
            "run_id": run_id,
            "node_id": node_id,
            "outcome": outcome_label(outcome),
            "target_section_id": rule.target_section_id,
          }),
        })
        .await?;
    }
    None => {
      store
        .append_journey_event(NewJourneyEvent {
          entity_id: entity_id.to_string(),
          event_type: JourneyEventType::LeftNode,
          node_id: Some(node_id.to_string()),
          edge_id: None,
          metadata: serde_json::json!({
            "run_id": run_id,
            "node_id": node_id,
            "outcome": outcome_label(outcome),
          }),
        })
        .await?;
    }
  }

  Ok(())
}

fn outcome_label(outcome: WorkerOutcome) -> &'static str {
  match outcome {
    WorkerOutcome::Success => "success",
    WorkerOutcome::Failure => "failure",
  }
}

fn parse_event_type(s: &str) -> Option<JourneyEventType> {
  match s {
    "entered_node" => Some(JourneyEventType::EnteredNode),
    "left_node" => Some(JourneyEventType::LeftNode),
    "on_edge" => Some(JourneyEventType::OnEdge),
    "arrived_via" => Some(JourneyEventType::ArrivedVia),
    "moved_by_worker" => Some(JourneyEventType::MovedByWorker),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use stitch_store::{CanvasType, EntityUpsert, NewFlow, SqliteStore};

  async fn test_store() -> SqliteStore {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    let store = SqliteStore::new(pool);
    store.migrate().await.unwrap();
    store
      .create_flow(NewFlow {
        id: "flow-1".into(),
        name: "f".into(),
        canvas_type: CanvasType::Workflow,
        parent_id: None,
      })
      .await
      .unwrap();
    store
  }

  #[tokio::test]
  async fn no_entity_is_noop() {
    let store = test_store().await;
    apply_movement(&store, None, "run-1", "node-1", WorkerOutcome::Success, None)
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn movement_rule_relocates_entity_and_records_journey() {
    let store = test_store().await;
    let entity = store
      .upsert_entity(EntityUpsert {
        canvas_id: "flow-1".into(),
        name: "Ada".into(),
        email: Some("ada@example.com".into()),
        avatar: None,
        entity_type: "lead".into(),
        metadata: serde_json::json!({}),
      })
      .await
      .unwrap();

    let rule = MovementRule {
      target_section_id: "won".into(),
      mark_current_node: Some(true),
      record_journey_as: Some("moved_by_worker".into()),
    };

    apply_movement(
      &store,
      Some(&entity.id),
      "run-1",
      "node-1",
      WorkerOutcome::Success,
      Some(&rule),
    )
    .await
    .unwrap();

    let updated = store.get_entity(&entity.id).await.unwrap();
    assert_eq!(updated.current_node_id.as_deref(), Some("won"));
    assert!(updated.current_edge_id.is_none());
  }

  #[tokio::test]
  async fn no_rule_records_left_node_event_without_moving() {
    let store = test_store().await;
    let entity = store
      .upsert_entity(EntityUpsert {
        canvas_id: "flow-1".into(),
        name: "Ada".into(),
        email: Some("ada@example.com".into()),
        avatar: None,
        entity_type: "lead".into(),
        metadata: serde_json::json!({}),
      })
      .await
      .unwrap();

    apply_movement(
      &store,
      Some(&entity.id),
      "run-1",
      "node-1",
      WorkerOutcome::Failure,
      None,
    )
    .await
    .unwrap();

    let updated = store.get_entity(&entity.id).await.unwrap();
    assert!(updated.current_node_id.is_none());
  }
}
