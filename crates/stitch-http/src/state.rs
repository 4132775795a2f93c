use std::sync::Arc;

use stitch_engine::Engine;
use stitch_store::Store;
use stitch_webhook::{RateLimiter, WebhookProcessor};

/// Shared handles every axum handler reads through `State<AppState>`.
/// Cloning is cheap — every field is an `Arc`.
#[derive(Clone)]
pub struct AppState {
  pub store: Arc<dyn Store>,
  pub engine: Arc<Engine>,
  pub webhooks: Arc<WebhookProcessor>,
  pub rate_limiter: Arc<RateLimiter>,
}
