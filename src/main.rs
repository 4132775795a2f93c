use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use stitch_config::Config;
use stitch_engine::{Engine, HttpWorkerDispatcher};
use stitch_http::AppState;
use stitch_store::{SqliteStore, Store};
use stitch_webhook::{RateLimiter, WebhookProcessor};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
  let config = Config::from_env().context("invalid configuration")?;

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_new(&config.rust_log).unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let pool = sqlx::SqlitePool::connect(&config.database_url)
    .await
    .context("failed to connect to database")?;
  let store = SqliteStore::new(pool);
  store.migrate().await.context("failed to run migrations")?;
  let store: Arc<dyn Store> = Arc::new(store);

  let engine = Arc::new(Engine::new(
    store.clone(),
    Arc::new(HttpWorkerDispatcher::new()),
    config.public_base_url.clone(),
  ));
  let webhooks = Arc::new(WebhookProcessor::new(store.clone(), engine.clone()));
  let rate_limiter = Arc::new(RateLimiter::new(
    config.rate_limit_per_second,
    config.rate_limit_burst,
  ));

  let app = stitch_http::router(AppState {
    store,
    engine,
    webhooks,
    rate_limiter,
  });

  let addr: SocketAddr = config
    .bind_addr
    .parse()
    .with_context(|| format!("invalid BIND_ADDR: {}", config.bind_addr))?;
  let listener = tokio::net::TcpListener::bind(addr)
    .await
    .with_context(|| format!("failed to bind {addr}"))?;

  tracing::info!(%addr, "stitch listening");
  axum::serve(
    listener,
    app.into_make_service_with_connect_info::<SocketAddr>(),
  )
  .await
  .context("server error")?;

  Ok(())
}
