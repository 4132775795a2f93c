use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::edge::{EdgeData, edge_key};
use crate::node::NodeKind;

/// The compiled, immutable form of a graph: a dense adjacency representation
/// suitable for O(1) traversal.
///
/// Never mutated after creation — a `Version` embeds one and is never
/// rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionGraph {
  pub nodes: HashMap<String, NodeKind>,
  /// source node id -> ordered list of target node ids (declaration order).
  pub adjacency: HashMap<String, Vec<String>>,
  /// target node id -> ordered list of source node ids (declaration order),
  /// covering only `journey`/`conditional` edges. Populated at compile time
  /// so Collector fan-in evaluation has a stable, deterministic tie-break
  /// instead of relying on `HashMap` iteration order.
  pub reverse_journey_adjacency: HashMap<String, Vec<String>>,
  /// `edgeKey(source, target)` -> edge attributes.
  pub edge_data: HashMap<String, EdgeData>,
  /// Nodes with no incoming journey edges.
  pub entry_nodes: Vec<String>,
  /// Nodes with no outgoing journey edges.
  pub terminal_nodes: Vec<String>,
}

impl ExecutionGraph {
  pub fn get_node(&self, id: &str) -> Option<&NodeKind> {
    self.nodes.get(id)
  }

  /// Outgoing edges from `node_id`, in declaration order, with their data.
  pub fn outgoing(&self, node_id: &str) -> Vec<(&str, &EdgeData)> {
    self
      .adjacency
      .get(node_id)
      .into_iter()
      .flatten()
      .filter_map(|target| {
        let data = self.edge_data.get(&edge_key(node_id, target))?;
        Some((target.as_str(), data))
      })
      .collect()
  }

  /// Source nodes with a journey (or conditional) edge into `node_id`, in
  /// declaration order — used for Collector fan-in evaluation and
  /// deterministic tie-breaking.
  pub fn journey_predecessors(&self, node_id: &str) -> &[String] {
    self
      .reverse_journey_adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// All node ids known to this version's pinned graph (for `node_states`
  /// initialization Run invariant 6).
  pub fn node_ids(&self) -> impl Iterator<Item = &str> {
    self.nodes.keys().map(|s| s.as_str())
  }
}
