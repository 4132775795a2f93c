//! Central API error type: every handler returns `Result<_, ApiError>`, and
//! `IntoResponse` maps each underlying crate's error variant onto one of a
//! handful of error kinds (`NotFound` 404, `ValidationFailed` 400,
//! `StateConflict` 409, `AuthFailure` 401, `RateLimited` 429).

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
  #[error("{0}")]
  NotFound(String),

  #[error(transparent)]
  Validation(#[from] stitch_graph::ValidationFailure),

  #[error("{0}")]
  StateConflict(String),

  #[error("{0}")]
  BadRequest(String),

  #[error("invalid webhook signature")]
  AuthFailure,

  #[error("rate limited, retry after {retry_after_secs}s")]
  RateLimited { retry_after_secs: u64 },

  #[error("internal storage error")]
  Internal,
}

impl From<stitch_version::VersionError> for ApiError {
  fn from(err: stitch_version::VersionError) -> Self {
    match err {
      stitch_version::VersionError::Validation(v) => ApiError::Validation(v),
      stitch_version::VersionError::Store(s) => ApiError::from(s),
    }
  }
}

impl From<stitch_engine::EngineError> for ApiError {
  fn from(err: stitch_engine::EngineError) -> Self {
    match err {
      stitch_engine::EngineError::NotFound(msg) => ApiError::NotFound(msg),
      stitch_engine::EngineError::StateConflict(msg) => ApiError::StateConflict(msg),
      stitch_engine::EngineError::InvalidCallback(msg) => ApiError::BadRequest(msg),
      stitch_engine::EngineError::NotFailed(msg) => ApiError::BadRequest(format!("node {msg} is not failed")),
      stitch_engine::EngineError::Store(s) => ApiError::from(s),
      stitch_engine::EngineError::EntityMovement(e) => ApiError::BadRequest(e.to_string()),
    }
  }
}

impl From<stitch_webhook::WebhookError> for ApiError {
  fn from(err: stitch_webhook::WebhookError) -> Self {
    match err {
      stitch_webhook::WebhookError::SignatureInvalid => ApiError::AuthFailure,
      stitch_webhook::WebhookError::ConfigMissing(slug) => {
        ApiError::NotFound(format!("webhook config not found: {slug}"))
      }
      stitch_webhook::WebhookError::RateLimited { retry_after_secs } => {
        ApiError::RateLimited { retry_after_secs }
      }
      stitch_webhook::WebhookError::MalformedPayload(msg) => ApiError::BadRequest(msg),
      stitch_webhook::WebhookError::Store(s) => ApiError::from(s),
      stitch_webhook::WebhookError::Engine(e) => ApiError::from(e),
    }
  }
}

impl From<stitch_store::StoreError> for ApiError {
  fn from(err: stitch_store::StoreError) -> Self {
    match err {
      stitch_store::StoreError::NotFound(msg) => ApiError::NotFound(msg),
      stitch_store::StoreError::SlugConflict(msg) => ApiError::StateConflict(msg),
      stitch_store::StoreError::Database(e) => {
        tracing::error!(error = %e, "database error");
        ApiError::Internal
      }
    }
  }
}

#[derive(Serialize)]
struct ErrorBody {
  error: String,
  message: String,
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, kind) = match &self {
      ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
      ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_failed"),
      ApiError::StateConflict(_) => (StatusCode::CONFLICT, "state_conflict"),
      ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
      ApiError::AuthFailure => (StatusCode::UNAUTHORIZED, "auth_failure"),
      ApiError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
      ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };

    let body = ErrorBody {
      error: kind.to_string(),
      message: self.to_string(),
    };

    let mut response = (status, Json(body)).into_response();
    if let ApiError::RateLimited { retry_after_secs } = &self {
      response
        .headers_mut()
        .insert("Retry-After", retry_after_secs.to_string().parse().unwrap());
    }
    response
  }
}
