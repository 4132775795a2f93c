//! `POST /flows/{id}/run`, `POST /flows/{id}/versions`,
//! `GET /flows/{id}/versions`, `GET /flows/{id}/versions/{vid}`.

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use stitch_graph::VisualGraph;
use stitch_store::{FlowVersion, FlowVersionMeta, Trigger, TriggerType};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateVersionRequest {
  pub visual_graph: VisualGraph,
  #[serde(default)]
  pub commit_message: Option<String>,
}

pub async fn create_version(
  State(state): State<AppState>,
  Path(flow_id): Path<String>,
  Json(request): Json<CreateVersionRequest>,
) -> Result<Json<FlowVersion>, ApiError> {
  let version = stitch_version::create_version(
    state.store.as_ref(),
    &flow_id,
    request.visual_graph,
    request.commit_message,
  )
  .await?;
  Ok(Json(version))
}

pub async fn list_versions(
  State(state): State<AppState>,
  Path(flow_id): Path<String>,
) -> Result<Json<Vec<FlowVersionMeta>>, ApiError> {
  let versions = stitch_version::list_versions(state.store.as_ref(), &flow_id).await?;
  Ok(Json(versions))
}

pub async fn get_version(
  State(state): State<AppState>,
  Path((_flow_id, version_id)): Path<(String, String)>,
) -> Result<Json<FlowVersion>, ApiError> {
  let version = stitch_version::get_version(state.store.as_ref(), &version_id).await?;
  Ok(Json(version))
}

#[derive(Deserialize)]
pub struct RunFlowRequest {
  /// Pins the run to an explicit version instead of the flow's current one.
  #[serde(default)]
  pub flow_version_id: Option<String>,
  /// Authors a fresh version from this graph and runs it, deduplicating
  /// against the current version when content is unchanged. Mutually
  /// exclusive with `flow_version_id`.
  #[serde(default)]
  pub visual_graph: Option<VisualGraph>,
  #[serde(default)]
  pub entity_id: Option<String>,
}

#[derive(Serialize)]
pub struct RunFlowResponse {
  pub run_id: String,
  pub version_id: String,
  pub status: &'static str,
}

pub async fn run_flow(
  State(state): State<AppState>,
  Path(flow_id): Path<String>,
  Json(request): Json<RunFlowRequest>,
) -> Result<Json<RunFlowResponse>, ApiError> {
  let flow_version_id = match (request.flow_version_id, request.visual_graph) {
    (Some(_), Some(_)) => {
      return Err(ApiError::BadRequest(
        "flow_version_id and visual_graph are mutually exclusive".to_string(),
      ));
    }
    (Some(id), None) => Some(id),
    (None, Some(graph)) => Some(
      stitch_version::auto_version_on_run(state.store.as_ref(), &flow_id, graph).await?,
    ),
    (None, None) => None,
  };

  let trigger = Trigger {
    trigger_type: TriggerType::Manual,
    source: None,
    event_id: None,
    timestamp: chrono::Utc::now(),
  };

  let run = state
    .engine
    .start_run(&flow_id, flow_version_id, request.entity_id, trigger)
    .await?;
  Ok(Json(RunFlowResponse {
    run_id: run.id,
    version_id: run.flow_version_id,
    status: "started",
  }))
}
