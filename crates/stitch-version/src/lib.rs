//! Version manager (C2): compiles an authored [`VisualGraph`] into an
//! [`ExecutionGraph`] and persists both as an immutable [`FlowVersion`].
//!
//! The execution graph is cached on the version so every run reads
//! adjacency in O(1) with no re-parsing; once created, a version's content
//! never changes, so runs pinned to it stay reproducible.

use sha2::{Digest, Sha256};
use stitch_graph::{ValidationFailure, VisualGraph, compile};
use stitch_store::{FlowVersion, FlowVersionMeta, NewFlowVersion, Store};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum VersionError {
  #[error(transparent)]
  Validation(#[from] ValidationFailure),
  #[error(transparent)]
  Store(#[from] stitch_store::StoreError),
}

/// Creates a new version for `flow_id`: validates `visual_graph` (C1),
/// compiles it into an execution graph, persists both atomically, and
/// points the flow's `current_version_id` at it.
///
/// On validation failure nothing is written.
#[tracing::instrument(skip(store, visual_graph), fields(flow_id))]
pub async fn create_version(
  store: &dyn Store,
  flow_id: &str,
  visual_graph: VisualGraph,
  commit_message: Option<String>,
) -> Result<FlowVersion, VersionError> {
  let execution_graph = compile(&visual_graph)?;

  let version = store
    .create_flow_version(NewFlowVersion {
      id: Uuid::new_v4().to_string(),
      flow_id: flow_id.to_string(),
      commit_message,
      visual_graph,
      execution_graph,
    })
    .await?;

  store
    .set_flow_current_version(flow_id, &version.id)
    .await?;

  tracing::info!(version_id = %version.id, "created flow version");
  Ok(version)
}

/// Implicit version creation for a run requested with a fresh visual graph.
///
/// Deduplicates against the flow's current version when the canonicalized
/// visual graph content is
/// identical, returning the existing version id instead of writing a new
/// row. Canonicalization is `serde_json::to_vec` (its `Map` is a `BTreeMap`
/// by default, so object keys sort consistently) hashed with SHA-256.
#[tracing::instrument(skip(store, visual_graph), fields(flow_id))]
pub async fn auto_version_on_run(
  store: &dyn Store,
  flow_id: &str,
  visual_graph: VisualGraph,
) -> Result<String, VersionError> {
  let flow = store.get_flow(flow_id).await?;

  if let Some(current_id) = &flow.current_version_id {
    let current = store.get_flow_version(current_id).await?;
    if content_hash(&current.visual_graph) == content_hash(&visual_graph) {
      tracing::debug!(version_id = %current_id, "auto-version deduplicated, reusing current version");
      return Ok(current_id.clone());
    }
  }

  let version = create_version(store, flow_id, visual_graph, None).await?;
  Ok(version.id)
}

fn content_hash(graph: &VisualGraph) -> [u8; 32] {
  let bytes = serde_json::to_vec(graph).expect("VisualGraph always serializes");
  let mut hasher = Sha256::new();
  hasher.update(&bytes);
  hasher.finalize().into()
}

/// Version metadata list, newest first, without the heavy graph blobs.
pub async fn list_versions(
  store: &dyn Store,
  flow_id: &str,
) -> Result<Vec<FlowVersionMeta>, VersionError> {
  Ok(store.list_flow_versions(flow_id).await?)
}

pub async fn get_version(store: &dyn Store, version_id: &str) -> Result<FlowVersion, VersionError> {
  Ok(store.get_flow_version(version_id).await?)
}
