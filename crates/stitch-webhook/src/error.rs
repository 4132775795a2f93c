/// Errors from the webhook ingress pipeline (C7, C9), mapped by `stitch-http`
/// into's error kinds and the status codes lists.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
  /// Signature check failed, or was required (secret present) but the
  /// expected header was absent. 401.
  #[error("invalid webhook signature")]
  SignatureInvalid,

  /// Unknown or inactive `endpoint_slug`. Deliberately conflated with
  /// "not found" to resist slug enumeration. 404.
  #[error("webhook config not found or inactive: {0}")]
  ConfigMissing(String),

  /// Client exceeded its token bucket. 429.
  #[error("rate limited, retry after {retry_after_secs}s")]
  RateLimited { retry_after_secs: u64 },

  /// Raw body did not parse as JSON. 400.
  #[error("malformed payload: {0}")]
  MalformedPayload(String),

  #[error(transparent)]
  Store(#[from] stitch_store::StoreError),

  #[error(transparent)]
  Engine(#[from] stitch_engine::EngineError),
}
