//! HTTP surface (C10): flow/version/run endpoints, webhook ingress, and the
//! callback/retry protocol, wired onto [`AppState`]'s shared engine/store
//! handles.

mod callback;
mod error;
mod flows;
mod state;
mod webhooks;

pub use error::ApiError;
pub use state::AppState;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Builds the full router. `/webhooks/:slug`'s rate
/// limiter needs the client's socket address, so the caller must serve this
/// with `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/webhooks/:slug", post(webhooks::ingest))
    .route("/callback/:run_id/:node_id", post(callback::callback))
    .route("/retry/:run_id/:node_id", post(callback::retry))
    .route("/flows/:id/run", post(flows::run_flow))
    .route(
      "/flows/:id/versions",
      post(flows::create_version).get(flows::list_versions),
    )
    .route("/flows/:id/versions/:vid", get(flows::get_version))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use axum::body::Body;
  use axum::extract::connect_info::ConnectInfo;
  use axum::http::{Request, StatusCode};
  use std::net::SocketAddr;
  use std::sync::Arc;
  use stitch_engine::{DispatchOutcome, Engine, WorkerDispatchRequest, WorkerDispatcher};
  use stitch_graph::{NodeKind, Position, VisualEdge, VisualGraph, VisualNode};
  use stitch_store::{CanvasType, NewFlow, SqliteStore, Store};
  use stitch_webhook::{RateLimiter, WebhookProcessor};
  use tower::ServiceExt;

  struct NoopDispatcher;

  #[async_trait]
  impl WorkerDispatcher for NoopDispatcher {
    async fn dispatch(&self, _request: WorkerDispatchRequest) -> DispatchOutcome {
      DispatchOutcome::Completed {
        output: serde_json::json!({}),
      }
    }
  }

  async fn test_state() -> (AppState, String) {
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

    let graph = VisualGraph {
      nodes: vec![VisualNode {
        id: "a".to_string(),
        kind: NodeKind::Item,
        position: Position { x: 0.0, y: 0.0 },
        style: None,
        label: None,
      }],
      edges: Vec::<VisualEdge>::new(),
    };
    stitch_version::create_version(&store, "flow-1", graph, None)
      .await
      .unwrap();

    let store: Arc<dyn stitch_store::Store> = Arc::new(store);
    let engine = Arc::new(Engine::new(
      store.clone(),
      Arc::new(NoopDispatcher),
      "http://localhost:8080".to_string(),
    ));
    let webhooks = Arc::new(WebhookProcessor::new(store.clone(), engine.clone()));
    let rate_limiter = Arc::new(RateLimiter::new(5.0, 10.0));

    (
      AppState {
        store,
        engine,
        webhooks,
        rate_limiter,
      },
      "flow-1".to_string(),
    )
  }

  fn request_with_peer(method: &str, uri: &str, body: Body) -> Request<Body> {
    let mut request = Request::builder().method(method).uri(uri).header("content-type", "application/json").body(body).unwrap();
    request
      .extensions_mut()
      .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 9999))));
    request
  }

  #[tokio::test]
  async fn run_flow_returns_completed_run() {
    let (state, flow_id) = test_state().await;
    let app = router(state);

    let response = app
      .oneshot(request_with_peer(
        "POST",
        &format!("/flows/{flow_id}/run"),
        Body::from("{}"),
      ))
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
  }

  #[tokio::test]
  async fn unknown_webhook_slug_is_not_found_with_rate_limit_headers() {
    let (state, _flow_id) = test_state().await;
    let app = router(state);

    let response = app
      .oneshot(request_with_peer(
        "POST",
        "/webhooks/does-not-exist",
        Body::from("{}"),
      ))
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().contains_key("x-ratelimit-remaining"));
  }

  #[tokio::test]
  async fn callback_on_unknown_run_is_not_found() {
    let (state, _flow_id) = test_state().await;
    let app = router(state);

    let response = app
      .oneshot(request_with_peer(
        "POST",
        "/callback/missing-run/node",
        Body::from(r#"{"status":"completed","output":{}}"#),
      ))
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
  }
}
