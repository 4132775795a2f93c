/// Errors surfaced by the edge walker, node handlers, and callback protocol
/// (C4/C5/C6 error kinds `NotFound`/`StateConflict`/`AuthFailure`).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error("not found: {0}")]
  NotFound(String),

  /// CAS failure that isn't an idempotent duplicate.
  #[error("state conflict: {0}")]
  StateConflict(String),

  /// Malformed callback payload.
  #[error("invalid callback: {0}")]
  InvalidCallback(String),

  /// `retry` called on a node that isn't `failed`.
  #[error("node is not in a failed state: {0}")]
  NotFailed(String),

  #[error(transparent)]
  Store(#[from] stitch_store::StoreError),

  #[error(transparent)]
  EntityMovement(#[from] stitch_entity::EntityMovementError),
}
