use std::collections::HashMap;

use crate::edge::{EdgeData, edge_key};
use crate::error::ValidationFailure;
use crate::execution::ExecutionGraph;
use crate::validate::validate;
use crate::visual::VisualGraph;

/// Compiles an authored [`VisualGraph`] into a frozen [`ExecutionGraph`].
///
/// Validates first; on failure returns every issue found and
/// performs no partial compilation.
pub fn compile(graph: &VisualGraph) -> Result<ExecutionGraph, ValidationFailure> {
  let issues = validate(graph);
  if !issues.is_empty() {
    return Err(ValidationFailure { issues });
  }

  let nodes: HashMap<String, crate::node::NodeKind> = graph
    .nodes
    .iter()
    .map(|n| (n.id.clone(), n.kind.clone()))
    .collect();

  let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
  let mut reverse_journey_adjacency: HashMap<String, Vec<String>> = HashMap::new();
  let mut edge_data: HashMap<String, EdgeData> = HashMap::new();

  for id in nodes.keys() {
    adjacency.entry(id.clone()).or_default();
  }

  for edge in &graph.edges {
    adjacency
      .entry(edge.source.clone())
      .or_default()
      .push(edge.target.clone());

    if edge.edge_type.is_journey_like() {
      reverse_journey_adjacency
        .entry(edge.target.clone())
        .or_default()
        .push(edge.source.clone());
    }

    edge_data.insert(
      edge_key(&edge.source, &edge.target),
      EdgeData {
        edge_type: edge.edge_type,
        predicate: edge.predicate.clone(),
        label: edge.label.clone(),
      },
    );
  }

  let has_incoming_journey: std::collections::HashSet<&String> =
    reverse_journey_adjacency.keys().collect();
  let has_outgoing_journey: std::collections::HashSet<&str> = graph
    .edges
    .iter()
    .filter(|e| e.edge_type.is_journey_like())
    .map(|e| e.source.as_str())
    .collect();

  let entry_nodes: Vec<String> = nodes
    .keys()
    .filter(|id| !has_incoming_journey.contains(id))
    .cloned()
    .collect();

  let terminal_nodes: Vec<String> = nodes
    .keys()
    .filter(|id| !has_outgoing_journey.contains(id.as_str()))
    .cloned()
    .collect();

  Ok(ExecutionGraph {
    nodes,
    adjacency,
    reverse_journey_adjacency,
    edge_data,
    entry_nodes,
    terminal_nodes,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::edge::{EdgeType, VisualEdge};
  use crate::node::{NodeKind, Position, VisualNode};

  fn worker(id: &str) -> VisualNode {
    VisualNode {
      id: id.to_string(),
      kind: NodeKind::Worker {
        is_async: false,
        endpoint: None,
        required_inputs: vec![],
        default_inputs: Default::default(),
        entity_movement: None,
        timeout_ms: None,
      },
      position: Position { x: 0.0, y: 0.0 },
      style: None,
      label: None,
    }
  }

  fn journey(source: &str, target: &str) -> VisualEdge {
    VisualEdge {
      source: source.to_string(),
      target: target.to_string(),
      edge_type: EdgeType::Journey,
      predicate: None,
      label: None,
    }
  }

  #[test]
  fn compiles_simple_chain() {
    let graph = VisualGraph {
      nodes: vec![worker("a"), worker("b"), worker("c")],
      edges: vec![journey("a", "b"), journey("b", "c")],
    };
    let compiled = compile(&graph).unwrap();
    assert_eq!(compiled.entry_nodes, vec!["a".to_string()]);
    assert_eq!(compiled.terminal_nodes, vec!["c".to_string()]);
    assert_eq!(compiled.adjacency["a"], vec!["b".to_string()]);
    assert_eq!(compiled.journey_predecessors("c"), &["b".to_string()]);
  }

  #[test]
  fn fails_compile_on_invalid_graph() {
    let graph = VisualGraph {
      nodes: vec![worker("a")],
      edges: vec![journey("a", "missing")],
    };
    let err = compile(&graph).unwrap_err();
    assert!(!err.issues.is_empty());
  }

  #[test]
  fn collector_predecessors_in_declaration_order() {
    let nodes = vec![
      worker("a"),
      worker("b"),
      VisualNode {
        id: "k".to_string(),
        kind: NodeKind::Collector,
        position: Position { x: 0.0, y: 0.0 },
        style: None,
        label: None,
      },
    ];
    let graph = VisualGraph {
      nodes,
      edges: vec![journey("a", "k"), journey("b", "k")],
    };
    let compiled = compile(&graph).unwrap();
    assert_eq!(
      compiled.journey_predecessors("k"),
      &["a".to_string(), "b".to_string()]
    );
  }
}
