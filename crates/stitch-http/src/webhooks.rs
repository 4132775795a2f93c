//! `POST /webhooks/{slug}`. Rate limiting (step 1) runs
//! before the body is parsed; its decision's headers are attached to every
//! response from this route, success or failure.

use axum::Json;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::net::SocketAddr;

use crate::error::ApiError;
use crate::state::AppState;

struct AxumHeaders<'a>(&'a HeaderMap);

impl stitch_webhook::HeaderLookup for AxumHeaders<'_> {
  fn get(&self, name: &str) -> Option<&str> {
    self.0.get(name)?.to_str().ok()
  }
}

#[derive(Serialize)]
struct IngestResponse {
  success: bool,
  webhook_event_id: String,
  entity_id: String,
  run_id: String,
}

/// Client key for rate limiting: `X-Forwarded-For`'s first hop, falling
/// back to the socket's peer address.
fn client_key(headers: &HeaderMap, addr: &SocketAddr) -> String {
  headers
    .get("x-forwarded-for")
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.split(',').next())
    .map(|s| s.trim().to_string())
    .unwrap_or_else(|| addr.ip().to_string())
}

pub async fn ingest(
  State(state): State<AppState>,
  Path(slug): Path<String>,
  ConnectInfo(addr): ConnectInfo<SocketAddr>,
  headers: HeaderMap,
  body: axum::body::Bytes,
) -> Response {
  let decision = state.rate_limiter.check(&client_key(&headers, &addr)).await;
  let rate_limit_headers = [
    ("X-RateLimit-Limit", decision.limit.to_string()),
    ("X-RateLimit-Remaining", decision.remaining.to_string()),
    ("X-RateLimit-Reset", decision.reset_after_secs.to_string()),
  ];

  let result: Result<Json<IngestResponse>, ApiError> = if !decision.allowed {
    Err(ApiError::RateLimited {
      retry_after_secs: decision.reset_after_secs,
    })
  } else {
    state
      .webhooks
      .ingest(&slug, &body, &AxumHeaders(&headers))
      .await
      .map(|r| {
        Json(IngestResponse {
          success: true,
          webhook_event_id: r.webhook_event_id,
          entity_id: r.entity_id,
          run_id: r.run_id,
        })
      })
      .map_err(ApiError::from)
  };

  let mut response = match result {
    Ok(body) => body.into_response(),
    Err(err) => err.into_response(),
  };
  for (name, value) in rate_limit_headers {
    if let Ok(value) = value.parse() {
      response.headers_mut().insert(name, value);
    }
  }
  response
}
