use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use serde_json::Value;
use stitch_entity::{WorkerOutcome, apply_movement};
use stitch_graph::{EdgeType, ExecutionGraph, NodeKind};
use stitch_store::{
  CasOutcome, NodeState, NodeStatePatch, NodeStatus, NewRun, Run, Store, Trigger,
};
use uuid::Uuid;

use crate::dispatch::{DispatchOutcome, WorkerDispatchRequest, WorkerDispatcher};
use crate::error::EngineError;
use crate::merge::{merge_callback_output, merge_objects};

/// Outcome reported by an external worker calling back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
  Completed,
  Failed,
}

/// The edge-walking execution engine (C4), worker/Splitter/Collector/UX
/// handlers (C5), and callback protocol (C6).
///
/// Cheap to clone: every field is an `Arc`, so spawned per-node tasks can
/// own a handle without lifetime gymnastics.
#[derive(Clone)]
pub struct Engine {
  store: Arc<dyn Store>,
  dispatcher: Arc<dyn WorkerDispatcher>,
  public_base_url: String,
}

impl Engine {
  pub fn new(
    store: Arc<dyn Store>,
    dispatcher: Arc<dyn WorkerDispatcher>,
    public_base_url: String,
  ) -> Self {
    Self {
      store,
      dispatcher,
      public_base_url,
    }
  }

  /// Starts a run from `flow_id`'s pinned version (explicit or current),
  /// initializes every node to `pending`, and fires each entry node.
  #[tracing::instrument(skip(self, trigger), fields(flow_id))]
  pub async fn start_run(
    &self,
    flow_id: &str,
    flow_version_id: Option<String>,
    entity_id: Option<String>,
    trigger: Trigger,
  ) -> Result<Run, EngineError> {
    let (run, graph) = self.new_run(flow_id, flow_version_id, entity_id, trigger).await?;
    let start_nodes = graph.entry_nodes.clone();
    self.fire_start_nodes(&run.id, &graph, start_nodes).await?;
    Ok(self.store.get_run(&run.id).await?)
  }

  /// Starts a run the same way as [`Engine::start_run`], but fires a single
  /// explicit starting node instead of the graph's entry nodes — used by
  /// webhook ingress, which is bound to a specific `entry_edge_id` rather
  /// than the graph's global entry points.
  #[tracing::instrument(skip(self, trigger), fields(flow_id, start_node_id))]
  pub async fn start_run_at(
    &self,
    flow_id: &str,
    flow_version_id: Option<String>,
    entity_id: Option<String>,
    trigger: Trigger,
    start_node_id: &str,
  ) -> Result<Run, EngineError> {
    let (run, graph) = self.new_run(flow_id, flow_version_id, entity_id, trigger).await?;
    self
      .fire_start_nodes(&run.id, &graph, vec![start_node_id.to_string()])
      .await?;
    Ok(self.store.get_run(&run.id).await?)
  }

  async fn new_run(
    &self,
    flow_id: &str,
    flow_version_id: Option<String>,
    entity_id: Option<String>,
    trigger: Trigger,
  ) -> Result<(Run, ExecutionGraph), EngineError> {
    let version_id = match flow_version_id {
      Some(id) => id,
      None => {
        let flow = self.store.get_flow(flow_id).await?;
        flow
          .current_version_id
          .ok_or_else(|| EngineError::NotFound(format!("flow {flow_id} has no current version")))?
      }
    };
    let version = self.store.get_flow_version(&version_id).await?;
    let graph = version.execution_graph.0.clone();

    let node_states: std::collections::HashMap<String, NodeState> = graph
      .node_ids()
      .map(|id| (id.to_string(), NodeState::default()))
      .collect();

    let run = self
      .store
      .create_run(NewRun {
        id: Uuid::new_v4().to_string(),
        flow_id: flow_id.to_string(),
        flow_version_id: version_id,
        entity_id,
        trigger,
        node_states,
      })
      .await?;

    tracing::info!(run_id = %run.id, "run created");
    Ok((run, graph))
  }

  async fn fire_start_nodes(
    &self,
    run_id: &str,
    graph: &ExecutionGraph,
    start_nodes: Vec<String>,
  ) -> Result<(), EngineError> {
    let mut handles = Vec::with_capacity(start_nodes.len());
    for node_id in start_nodes {
      let engine = self.clone();
      let graph = graph.clone();
      let run_id = run_id.to_string();
      handles.push(tokio::spawn(async move {
        engine.fire_node(&run_id, &node_id, &graph, false).await
      }));
    }
    for handle in handles {
      handle
        .await
        .map_err(|e| EngineError::NotFound(format!("start node task panicked: {e}")))??;
    }
    Ok(())
  }

  /// Advances the walk forward from `from`: for each outgoing edge,
  /// evaluates predicates and fan-in readiness, firing or skipping targets
  /// as appropriate.
  #[tracing::instrument(skip(self, graph), fields(run_id))]
  pub async fn walk_edges(
    &self,
    run_id: &str,
    graph: &ExecutionGraph,
    from: Vec<String>,
  ) -> Result<(), EngineError> {
    let mut queue: VecDeque<String> = from.into_iter().collect();
    let mut visited: HashSet<String> = HashSet::new();

    while !queue.is_empty() {
      let batch: Vec<String> = queue.drain(..).collect();
      let run = self.store.get_run(run_id).await?;

      let mut to_continue = Vec::new();
      let mut handles = Vec::new();

      for node_id in batch {
        if !visited.insert(node_id.clone()) {
          continue;
        }
        let output = run
          .node_states
          .get(&node_id)
          .and_then(|s| s.output.clone())
          .unwrap_or(Value::Null);

        for (target, edge) in graph.outgoing(&node_id) {
          let target = target.to_string();

          if edge.edge_type == EdgeType::System {
            if matches!(
              run.node_states.get(&target).map(|s| s.status),
              Some(NodeStatus::Pending)
            ) {
              let engine = self.clone();
              let graph = graph.clone();
              let run_id = run_id.to_string();
              handles.push(tokio::spawn(async move {
                let _ = engine.fire_node(&run_id, &target, &graph, true).await;
                None::<String>
              }));
            }
            continue;
          }

          let predicate_ok = edge
            .predicate
            .as_ref()
            .map(|p| p.evaluate(&output))
            .unwrap_or(true);

          if !predicate_ok {
            let outcome = self
              .store
              .cas_node_state(
                run_id,
                &target,
                NodeStatus::Pending,
                NodeStatePatch {
                  status: NodeStatus::Skipped,
                  output: None,
                  error: None,
                },
              )
              .await?;
            if matches!(outcome, CasOutcome::Applied(_)) {
              to_continue.push(target);
            }
            continue;
          }

          match journey_readiness(graph, &run, &target) {
            Readiness::Fire => {
              let engine = self.clone();
              let graph = graph.clone();
              let run_id = run_id.to_string();
              handles.push(tokio::spawn(async move {
                let _ = engine.fire_node(&run_id, &target, &graph, false).await;
                Some(target)
              }));
            }
            Readiness::Skip => {
              let outcome = self
                .store
                .cas_node_state(
                  run_id,
                  &target,
                  NodeStatus::Pending,
                  NodeStatePatch {
                    status: NodeStatus::Skipped,
                    output: None,
                    error: None,
                  },
                )
                .await?;
              if matches!(outcome, CasOutcome::Applied(_)) {
                to_continue.push(target);
              }
            }
            Readiness::Wait => {}
          }
        }
      }

      for handle in handles {
        if let Ok(Some(node_id)) = handle.await {
          let run_after = self.store.get_run(run_id).await?;
          if matches!(
            run_after.node_states.get(&node_id).map(|s| s.status),
            Some(NodeStatus::Completed) | Some(NodeStatus::Skipped)
          ) {
            to_continue.push(node_id);
          }
        }
      }

      queue.extend(to_continue);
    }

    Ok(())
  }

  /// Fires a single node: CAS `pending -> running`, then dispatches by node
  /// type.
  ///
  /// `via_system` marks a node reached only through a system edge
  /// (side-channel); entity movement never applies on that path.
  #[tracing::instrument(skip(self, graph), fields(run_id, node_id))]
  pub async fn fire_node(
    &self,
    run_id: &str,
    node_id: &str,
    graph: &ExecutionGraph,
    via_system: bool,
  ) -> Result<(), EngineError> {
    let kind = graph
      .get_node(node_id)
      .ok_or_else(|| EngineError::NotFound(format!("node {node_id}")))?
      .clone();

    if !kind.is_executable() {
      return Ok(());
    }

    let cas = self
      .store
      .cas_node_state(
        run_id,
        node_id,
        NodeStatus::Pending,
        NodeStatePatch {
          status: NodeStatus::Running,
          output: None,
          error: None,
        },
      )
      .await?;
    if !matches!(cas, CasOutcome::Applied(_)) {
      return Ok(());
    }
    tracing::info!(run_id, node_id, "node fired");

    match &kind {
      NodeKind::Worker {
        is_async,
        endpoint,
        entity_movement,
        timeout_ms,
        ..
      } => {
        let run = self.store.get_run(run_id).await?;
        let input = build_worker_input(graph, &run, node_id, &kind);
        let callback_url = format!("{}/callback/{run_id}/{node_id}", self.public_base_url);

        let outcome = self
          .dispatcher
          .dispatch(WorkerDispatchRequest {
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
            is_async: *is_async,
            endpoint: endpoint.clone(),
            input: input.clone(),
            callback_url,
            timeout_ms: *timeout_ms,
          })
          .await;

        match outcome {
          DispatchOutcome::Completed { output } => {
            let applied = self
              .store
              .cas_node_state(
                run_id,
                node_id,
                NodeStatus::Running,
                NodeStatePatch {
                  status: NodeStatus::Completed,
                  output: Some(output),
                  error: None,
                },
              )
              .await?;
            if matches!(applied, CasOutcome::Applied(_)) {
              if !via_system {
                apply_movement(
                  self.store.as_ref(),
                  run.entity_id.as_deref(),
                  run_id,
                  node_id,
                  WorkerOutcome::Success,
                  entity_movement.as_ref().and_then(|m| m.on_success.as_ref()),
                )
                .await?;
              }
              self
                .walk_edges(run_id, graph, vec![node_id.to_string()])
                .await?;
            }
          }
          DispatchOutcome::Failed { error } => {
            let applied = self
              .store
              .cas_node_state(
                run_id,
                node_id,
                NodeStatus::Running,
                NodeStatePatch {
                  status: NodeStatus::Failed,
                  output: None,
                  error: Some(error),
                },
              )
              .await?;
            if matches!(applied, CasOutcome::Applied(_)) && !via_system {
              apply_movement(
                self.store.as_ref(),
                run.entity_id.as_deref(),
                run_id,
                node_id,
                WorkerOutcome::Failure,
                entity_movement.as_ref().and_then(|m| m.on_failure.as_ref()),
              )
              .await?;
            }
          }
          DispatchOutcome::Dispatched => {
            // Pass-through input is stashed in the output slot; the
            // callback protocol merges over it on completion.
            self
              .store
              .cas_node_state(
                run_id,
                node_id,
                NodeStatus::Running,
                NodeStatePatch {
                  status: NodeStatus::Running,
                  output: Some(input),
                  error: None,
                },
              )
              .await?;
          }
        }
      }
      NodeKind::Splitter | NodeKind::Collector => {
        let run = self.store.get_run(run_id).await?;
        let merged = merged_predecessor_output(graph, &run, node_id);
        let applied = self
          .store
          .cas_node_state(
            run_id,
            node_id,
            NodeStatus::Running,
            NodeStatePatch {
              status: NodeStatus::Completed,
              output: Some(merged),
              error: None,
            },
          )
          .await?;
        if matches!(applied, CasOutcome::Applied(_)) {
          self
            .walk_edges(run_id, graph, vec![node_id.to_string()])
            .await?;
        }
      }
      NodeKind::Ux { .. } => {
        self
          .store
          .cas_node_state(
            run_id,
            node_id,
            NodeStatus::Running,
            NodeStatePatch {
              status: NodeStatus::WaitingForUser,
              output: None,
              error: None,
            },
          )
          .await?;
      }
      NodeKind::Section | NodeKind::Item | NodeKind::CostsSection | NodeKind::RevenueSection => {}
    }

    Ok(())
  }

  /// Resets a `failed` node to `pending` and, iff its upstream dependencies
  /// are all terminal, fires it directly (bypassing `walk_edges` so
  /// siblings aren't refired).
  #[tracing::instrument(skip(self), fields(run_id, node_id))]
  pub async fn retry(&self, run_id: &str, node_id: &str) -> Result<(), EngineError> {
    let run = self.store.get_run(run_id).await?;
    let current = run
      .node_states
      .get(node_id)
      .ok_or_else(|| EngineError::NotFound(format!("node {node_id}")))?;
    if current.status != NodeStatus::Failed {
      return Err(EngineError::NotFailed(node_id.to_string()));
    }

    let version = self.store.get_flow_version(&run.flow_version_id).await?;
    let graph = version.execution_graph.0.clone();

    let outcome = self
      .store
      .cas_node_state(
        run_id,
        node_id,
        NodeStatus::Failed,
        NodeStatePatch {
          status: NodeStatus::Pending,
          output: None,
          error: None,
        },
      )
      .await?;
    if !matches!(outcome, CasOutcome::Applied(_)) {
      return Err(EngineError::StateConflict(node_id.to_string()));
    }

    let run = self.store.get_run(run_id).await?;
    if matches!(journey_readiness(&graph, &run, node_id), Readiness::Fire) {
      self.fire_node(run_id, node_id, &graph, false).await?;
    }
    Ok(())
  }

  /// Processes an external worker's callback: merges output over any
  /// stashed pass-through input, transitions the node atomically, applies
  /// entity movement, and resumes the walk.
  #[tracing::instrument(skip(self, output, error), fields(run_id, node_id))]
  pub async fn handle_callback(
    &self,
    run_id: &str,
    node_id: &str,
    status: CallbackStatus,
    output: Option<Value>,
    error: Option<String>,
  ) -> Result<(), EngineError> {
    let run = self.store.get_run(run_id).await?;
    let version = self.store.get_flow_version(&run.flow_version_id).await?;
    let graph = version.execution_graph.0.clone();
    let kind = graph
      .get_node(node_id)
      .ok_or_else(|| EngineError::NotFound(format!("node {node_id}")))?
      .clone();

    let stored_input = run.node_states.get(node_id).and_then(|s| s.output.clone());

    let (target_status, patch_output, patch_error) = match status {
      CallbackStatus::Completed => {
        if output.as_ref().is_some_and(|o| !o.is_object()) {
          return Err(EngineError::InvalidCallback(
            "output must be an object when status=completed".to_string(),
          ));
        }
        let merged = merge_callback_output(stored_input.as_ref(), output.as_ref());
        (NodeStatus::Completed, Some(merged), None)
      }
      CallbackStatus::Failed => {
        let error = error.ok_or_else(|| {
          EngineError::InvalidCallback("error is required when status=failed".to_string())
        })?;
        (NodeStatus::Failed, None, Some(error))
      }
    };

    let outcome = self
      .store
      .cas_node_state(
        run_id,
        node_id,
        NodeStatus::Running,
        NodeStatePatch {
          status: target_status,
          output: patch_output,
          error: patch_error,
        },
      )
      .await?;

    match outcome {
      CasOutcome::Applied(_) => {
        if let NodeKind::Worker { entity_movement, .. } = &kind {
          let (outcome_kind, rule) = match status {
            CallbackStatus::Completed => (
              WorkerOutcome::Success,
              entity_movement.as_ref().and_then(|m| m.on_success.as_ref()),
            ),
            CallbackStatus::Failed => (
              WorkerOutcome::Failure,
              entity_movement.as_ref().and_then(|m| m.on_failure.as_ref()),
            ),
          };
          apply_movement(
            self.store.as_ref(),
            run.entity_id.as_deref(),
            run_id,
            node_id,
            outcome_kind,
            rule,
          )
          .await?;
        }
        if matches!(status, CallbackStatus::Completed) {
          self
            .walk_edges(run_id, &graph, vec![node_id.to_string()])
            .await?;
        }
        Ok(())
      }
      CasOutcome::NoOp(_) => {
        tracing::debug!(run_id, node_id, "duplicate callback, idempotent no-op");
        Ok(())
      }
      CasOutcome::Conflict(current) => Err(EngineError::StateConflict(format!(
        "node {node_id} is {:?}, callback rejected",
        current.status
      ))),
    }
  }

  /// Resolves an external reply (e.g. an inbound email) against the most
  /// recent run where some node is `waiting_for_user` for this entity.
  #[tracing::instrument(skip(self, reply_text), fields(entity_id))]
  pub async fn resolve_ux_reply(&self, entity_id: &str, reply_text: &str) -> Result<(), EngineError> {
    let (run, node_id) = self
      .store
      .find_latest_waiting_run(entity_id)
      .await?
      .ok_or_else(|| EngineError::NotFound(format!("no waiting run for entity {entity_id}")))?;

    let version = self.store.get_flow_version(&run.flow_version_id).await?;
    let graph = version.execution_graph.0.clone();
    let kind = graph
      .get_node(&node_id)
      .ok_or_else(|| EngineError::NotFound(format!("node {node_id}")))?;

    let lower = reply_text.to_lowercase();
    let intent = kind.ux_intents().and_then(|intents| {
      intents
        .iter()
        .find(|(keyword, _)| lower.contains(&keyword.to_lowercase()))
        .map(|(_, symbolic)| symbolic.clone())
    });

    let output = serde_json::json!({ "intent": intent, "reply": reply_text });

    let outcome = self
      .store
      .cas_node_state(
        &run.id,
        &node_id,
        NodeStatus::WaitingForUser,
        NodeStatePatch {
          status: NodeStatus::Completed,
          output: Some(output),
          error: None,
        },
      )
      .await?;
    if matches!(outcome, CasOutcome::Applied(_)) {
      self.walk_edges(&run.id, &graph, vec![node_id]).await?;
    }
    Ok(())
  }
}

/// Whether a journey-gated node is ready to fire, should be skipped (to
/// propagate a predicate-false/skip upstream further downstream), or
/// must still wait on an in-flight predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
  Fire,
  Skip,
  Wait,
}

/// A Collector fires only when every journey-predecessor is terminal
/// (`completed` or `skipped`) with at least one `completed`; it is skipped
/// (propagating the skip further downstream) if every predecessor is
/// terminal but none completed. Any other node fires only once every
/// predecessor has completed, and is skipped once all predecessors are
/// terminal but at least one was itself skipped. This carries a Splitter's
/// predicate-false branch (or any upstream skip) past intermediate
/// non-Collector nodes instead of firing them on empty input.
fn journey_readiness(graph: &ExecutionGraph, run: &Run, target: &str) -> Readiness {
  let preds = graph.journey_predecessors(target);
  let all_terminal = preds.iter().all(|p| {
    matches!(
      run.node_states.get(p).map(|s| s.status),
      Some(NodeStatus::Completed) | Some(NodeStatus::Skipped)
    )
  });
  if !all_terminal {
    return Readiness::Wait;
  }
  let any_completed = preds
    .iter()
    .any(|p| run.node_states.get(p).map(|s| s.status) == Some(NodeStatus::Completed));
  let all_completed = preds
    .iter()
    .all(|p| run.node_states.get(p).map(|s| s.status) == Some(NodeStatus::Completed));

  let fires = if matches!(graph.get_node(target), Some(NodeKind::Collector)) {
    any_completed
  } else {
    all_completed
  };
  if fires { Readiness::Fire } else { Readiness::Skip }
}

fn merged_predecessor_output(graph: &ExecutionGraph, run: &Run, node_id: &str) -> Value {
  let preds = graph.journey_predecessors(node_id);
  let outputs: Vec<Value> = preds
    .iter()
    .filter_map(|p| run.node_states.get(p).and_then(|s| s.output.clone()))
    .collect();
  merge_objects(outputs.iter())
}

fn build_worker_input(graph: &ExecutionGraph, run: &Run, node_id: &str, kind: &NodeKind) -> Value {
  let mut merged = merged_predecessor_output(graph, run, node_id);
  if let (Value::Object(map), Some(defaults)) = (&mut merged, kind.default_inputs()) {
    for (key, value) in defaults {
      map.entry(key.clone()).or_insert_with(|| value.clone());
    }
  }
  merged
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use stitch_graph::{EdgeType, NodeKind, Position, Predicate, VisualEdge, VisualGraph, VisualNode};
  use stitch_store::{CanvasType, NewFlow, SqliteStore, TriggerType};
  use tokio::sync::Mutex as AsyncMutex;

  fn worker(id: &str, is_async: bool, entity_movement: Option<stitch_graph::EntityMovement>) -> VisualNode {
    VisualNode {
      id: id.to_string(),
      kind: NodeKind::Worker {
        is_async,
        endpoint: Some(format!("http://workers.invalid/{id}")),
        required_inputs: vec![],
        default_inputs: Default::default(),
        entity_movement,
        timeout_ms: None,
      },
      position: Position { x: 0.0, y: 0.0 },
      style: None,
      label: None,
    }
  }

  fn node(id: &str, kind: NodeKind) -> VisualNode {
    VisualNode {
      id: id.to_string(),
      kind,
      position: Position { x: 0.0, y: 0.0 },
      style: None,
      label: None,
    }
  }

  fn edge(source: &str, target: &str, edge_type: EdgeType, predicate: Option<Predicate>) -> VisualEdge {
    VisualEdge {
      source: source.to_string(),
      target: target.to_string(),
      edge_type,
      predicate,
      label: None,
    }
  }

  fn journey(source: &str, target: &str) -> VisualEdge {
    edge(source, target, EdgeType::Journey, None)
  }

  async fn test_store() -> Arc<SqliteStore> {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    let store = SqliteStore::new(pool);
    store.migrate().await.unwrap();
    Arc::new(store)
  }

  fn trigger() -> Trigger {
    Trigger {
      trigger_type: TriggerType::Manual,
      source: None,
      event_id: None,
      timestamp: chrono::Utc::now(),
    }
  }

  /// A scripted dispatcher: synchronous workers succeed or fail per a fixed
  /// map keyed by node id; async workers are recorded for later callback
  /// simulation in the test body rather than actually dispatched.
  struct ScriptedDispatcher {
    sync_results: std::collections::HashMap<String, Result<Value, String>>,
    async_calls: AsyncMutex<Vec<WorkerDispatchRequest>>,
  }

  #[async_trait]
  impl WorkerDispatcher for ScriptedDispatcher {
    async fn dispatch(&self, request: WorkerDispatchRequest) -> DispatchOutcome {
      if request.is_async {
        self.async_calls.lock().await.push(request);
        return DispatchOutcome::Dispatched;
      }
      match self.sync_results.get(&request.node_id) {
        Some(Ok(output)) => DispatchOutcome::Completed {
          output: output.clone(),
        },
        Some(Err(error)) => DispatchOutcome::Failed {
          error: error.clone(),
        },
        None => DispatchOutcome::Failed {
          error: "no script".to_string(),
        },
      }
    }
  }

  async fn create_flow_and_version(store: &Arc<SqliteStore>, graph: VisualGraph) -> (String, String) {
    store
      .create_flow(NewFlow {
        id: "flow-1".into(),
        name: "f".into(),
        canvas_type: CanvasType::Workflow,
        parent_id: None,
      })
      .await
      .unwrap();
    let version = stitch_version::create_version(store.as_ref(), "flow-1", graph, None)
      .await
      .unwrap();
    ("flow-1".to_string(), version.id)
  }

  #[tokio::test]
  async fn splitter_fan_out_skips_false_predicate_branch() {
    let store = test_store().await;
    let graph = VisualGraph {
      nodes: vec![
        worker("entry", false, None),
        node("split", NodeKind::Splitter),
        worker("yes", false, None),
        worker("no", false, None),
      ],
      edges: vec![
        journey("entry", "split"),
        edge(
          "split",
          "yes",
          EdgeType::Conditional,
          Some(Predicate {
            path: "flag".to_string(),
            equals: None,
          }),
        ),
        edge(
          "split",
          "no",
          EdgeType::Conditional,
          Some(Predicate {
            path: "flag".to_string(),
            equals: Some(serde_json::json!(false)),
          }),
        ),
      ],
    };
    let (flow_id, _version_id) = create_flow_and_version(&store, graph).await;

    let mut sync_results = std::collections::HashMap::new();
    sync_results.insert("entry".to_string(), Ok(serde_json::json!({"flag": true})));
    sync_results.insert("yes".to_string(), Ok(serde_json::json!({"done": "yes"})));
    let dispatcher = Arc::new(ScriptedDispatcher {
      sync_results,
      async_calls: AsyncMutex::new(Vec::new()),
    });

    let engine = Engine::new(store.clone(), dispatcher, "http://engine.invalid".to_string());
    let run = engine
      .start_run(&flow_id, None, None, trigger())
      .await
      .unwrap();

    let run = store.get_run(&run.id).await.unwrap();
    assert_eq!(run.node_states.0["yes"].status, NodeStatus::Completed);
    assert_eq!(run.node_states.0["no"].status, NodeStatus::Skipped);
  }

  #[tokio::test]
  async fn skip_propagates_through_non_collector_nodes_to_collector() {
    let store = test_store().await;
    let graph = VisualGraph {
      nodes: vec![
        worker("entry", false, None),
        node("split", NodeKind::Splitter),
        worker("b", false, None),
        worker("c", false, None),
        worker("d", false, None),
        node("k", NodeKind::Collector),
      ],
      edges: vec![
        journey("entry", "split"),
        edge(
          "split",
          "b",
          EdgeType::Conditional,
          Some(Predicate {
            path: "flag".to_string(),
            equals: Some(serde_json::json!(true)),
          }),
        ),
        edge("split", "c", EdgeType::Conditional, None),
        journey("b", "d"),
        journey("c", "k"),
        journey("d", "k"),
      ],
    };
    let (flow_id, _version_id) = create_flow_and_version(&store, graph).await;

    let mut sync_results = std::collections::HashMap::new();
    sync_results.insert("entry".to_string(), Ok(serde_json::json!({"flag": false})));
    sync_results.insert("c".to_string(), Ok(serde_json::json!({"c": true})));
    // "d" is intentionally unscripted: if the skip did not propagate past
    // "b", firing "d" would hit this branch and fail the dispatcher's
    // `no script` fallback, surfacing the bug as a failed node instead of
    // a silently wrong one.
    let dispatcher = Arc::new(ScriptedDispatcher {
      sync_results,
      async_calls: AsyncMutex::new(Vec::new()),
    });

    let engine = Engine::new(store.clone(), dispatcher, "http://engine.invalid".to_string());
    let run = engine
      .start_run(&flow_id, None, None, trigger())
      .await
      .unwrap();

    let run = store.get_run(&run.id).await.unwrap();
    assert_eq!(run.node_states.0["b"].status, NodeStatus::Skipped);
    assert_eq!(run.node_states.0["d"].status, NodeStatus::Skipped);
    assert_eq!(run.node_states.0["c"].status, NodeStatus::Completed);
    assert_eq!(run.node_states.0["k"].status, NodeStatus::Completed);
  }

  #[tokio::test]
  async fn collector_fires_once_all_predecessors_terminal() {
    let store = test_store().await;
    let graph = VisualGraph {
      nodes: vec![
        worker("a", false, None),
        worker("b", false, None),
        node("k", NodeKind::Collector),
      ],
      edges: vec![journey("a", "k"), journey("b", "k")],
    };
    let (flow_id, _) = create_flow_and_version(&store, graph).await;

    let mut sync_results = std::collections::HashMap::new();
    sync_results.insert("a".to_string(), Ok(serde_json::json!({"a": 1})));
    sync_results.insert("b".to_string(), Ok(serde_json::json!({"b": 2})));
    let dispatcher = Arc::new(ScriptedDispatcher {
      sync_results,
      async_calls: AsyncMutex::new(Vec::new()),
    });

    let engine = Engine::new(store.clone(), dispatcher, "http://engine.invalid".to_string());
    let run = engine
      .start_run(&flow_id, None, None, trigger())
      .await
      .unwrap();

    let run = store.get_run(&run.id).await.unwrap();
    assert_eq!(run.node_states.0["k"].status, NodeStatus::Completed);
    assert_eq!(
      run.node_states.0["k"].output,
      Some(serde_json::json!({"a": 1, "b": 2}))
    );
  }

  #[tokio::test]
  async fn failed_worker_does_not_fire_downstream_and_retry_resumes() {
    let store = test_store().await;
    let graph = VisualGraph {
      nodes: vec![worker("a", false, None), worker("b", false, None)],
      edges: vec![journey("a", "b")],
    };
    let (flow_id, _) = create_flow_and_version(&store, graph).await;

    let mut sync_results = std::collections::HashMap::new();
    sync_results.insert("a".to_string(), Err("boom".to_string()));
    let dispatcher = Arc::new(ScriptedDispatcher {
      sync_results,
      async_calls: AsyncMutex::new(Vec::new()),
    });

    let engine = Engine::new(store.clone(), dispatcher, "http://engine.invalid".to_string());
    let run = engine
      .start_run(&flow_id, None, None, trigger())
      .await
      .unwrap();

    let run_state = store.get_run(&run.id).await.unwrap();
    assert_eq!(run_state.node_states.0["a"].status, NodeStatus::Failed);
    assert_eq!(run_state.node_states.0["b"].status, NodeStatus::Pending);

    let retry_dispatcher = Arc::new(ScriptedDispatcher {
      sync_results: {
        let mut m = std::collections::HashMap::new();
        m.insert("a".to_string(), Ok(serde_json::json!({"ok": true})));
        m.insert("b".to_string(), Ok(serde_json::json!({"ok": true})));
        m
      },
      async_calls: AsyncMutex::new(Vec::new()),
    });
    let engine = Engine::new(store.clone(), retry_dispatcher, "http://engine.invalid".to_string());
    engine.retry(&run.id, "a").await.unwrap();

    let run_state = store.get_run(&run.id).await.unwrap();
    assert_eq!(run_state.node_states.0["a"].status, NodeStatus::Completed);
    assert_eq!(run_state.node_states.0["b"].status, NodeStatus::Completed);
  }

  #[tokio::test]
  async fn async_worker_suspends_and_callback_resumes_with_idempotency() {
    let store = test_store().await;
    let graph = VisualGraph {
      nodes: vec![worker("a", true, None), worker("b", false, None)],
      edges: vec![journey("a", "b")],
    };
    let (flow_id, _) = create_flow_and_version(&store, graph).await;

    let mut sync_results = std::collections::HashMap::new();
    sync_results.insert("b".to_string(), Ok(serde_json::json!({"b": true})));
    let dispatcher = Arc::new(ScriptedDispatcher {
      sync_results,
      async_calls: AsyncMutex::new(Vec::new()),
    });

    let engine = Engine::new(store.clone(), dispatcher, "http://engine.invalid".to_string());
    let run = engine
      .start_run(&flow_id, None, Some("no-entity".to_string()), trigger())
      .await
      .unwrap();

    let run_state = store.get_run(&run.id).await.unwrap();
    assert_eq!(run_state.node_states.0["a"].status, NodeStatus::Running);

    engine
      .handle_callback(
        &run.id,
        "a",
        CallbackStatus::Completed,
        Some(serde_json::json!({"result": "ok"})),
        None,
      )
      .await
      .unwrap();

    let run_state = store.get_run(&run.id).await.unwrap();
    assert_eq!(run_state.node_states.0["a"].status, NodeStatus::Completed);
    assert_eq!(run_state.node_states.0["b"].status, NodeStatus::Completed);

    // Duplicate callback with identical output is an idempotent no-op.
    engine
      .handle_callback(
        &run.id,
        "a",
        CallbackStatus::Completed,
        Some(serde_json::json!({"result": "ok"})),
        None,
      )
      .await
      .unwrap();

    // Conflicting duplicate (different output) is rejected.
    let err = engine
      .handle_callback(
        &run.id,
        "a",
        CallbackStatus::Completed,
        Some(serde_json::json!({"result": "different"})),
        None,
      )
      .await
      .unwrap_err();
    assert!(matches!(err, EngineError::StateConflict(_)));
  }

  #[tokio::test]
  async fn worker_success_moves_entity_and_records_journey() {
    let store = test_store().await;
    let rule = stitch_graph::EntityMovement {
      on_success: Some(stitch_graph::MovementRule {
        target_section_id: "won".to_string(),
        mark_current_node: Some(true),
        record_journey_as: None,
      }),
      on_failure: None,
    };
    let graph = VisualGraph {
      nodes: vec![worker("a", false, Some(rule))],
      edges: vec![],
    };
    let (flow_id, _) = create_flow_and_version(&store, graph).await;

    let entity = store
      .upsert_entity(stitch_store::EntityUpsert {
        canvas_id: flow_id.clone(),
        name: "Ada".into(),
        email: Some("ada@example.com".into()),
        avatar: None,
        entity_type: "lead".into(),
        metadata: serde_json::json!({}),
      })
      .await
      .unwrap();

    let mut sync_results = std::collections::HashMap::new();
    sync_results.insert("a".to_string(), Ok(serde_json::json!({"ok": true})));
    let dispatcher = Arc::new(ScriptedDispatcher {
      sync_results,
      async_calls: AsyncMutex::new(Vec::new()),
    });

    let engine = Engine::new(store.clone(), dispatcher, "http://engine.invalid".to_string());
    engine
      .start_run(&flow_id, None, Some(entity.id.clone()), trigger())
      .await
      .unwrap();

    let updated = store.get_entity(&entity.id).await.unwrap();
    assert_eq!(updated.current_node_id.as_deref(), Some("won"));
  }
}
