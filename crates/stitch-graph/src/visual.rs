use serde::{Deserialize, Serialize};

use crate::edge::VisualEdge;
use crate::node::VisualNode;

/// The authored form of a canvas: nodes with positions/styles, edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualGraph {
  pub nodes: Vec<VisualNode>,
  pub edges: Vec<VisualEdge>,
}

impl VisualGraph {
  pub fn get_node(&self, id: &str) -> Option<&VisualNode> {
    self.nodes.iter().find(|n| n.id == id)
  }
}
