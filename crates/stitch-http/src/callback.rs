//! `POST /callback/{run_id}/{node_id}` and `POST /retry/{run_id}/{node_id}`
//! (C6).

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stitch_engine::CallbackStatus;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CallbackRequest {
  pub status: CallbackStatus,
  #[serde(default)]
  pub output: Option<Value>,
  #[serde(default)]
  pub error: Option<String>,
}

#[derive(Serialize)]
pub struct SuccessResponse {
  pub success: bool,
}

pub async fn callback(
  State(state): State<AppState>,
  Path((run_id, node_id)): Path<(String, String)>,
  Json(request): Json<CallbackRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
  state
    .engine
    .handle_callback(&run_id, &node_id, request.status, request.output, request.error)
    .await?;
  Ok(Json(SuccessResponse { success: true }))
}

pub async fn retry(
  State(state): State<AppState>,
  Path((run_id, node_id)): Path<(String, String)>,
) -> Result<Json<SuccessResponse>, ApiError> {
  state.engine.retry(&run_id, &node_id).await?;
  Ok(Json(SuccessResponse { success: true }))
}
