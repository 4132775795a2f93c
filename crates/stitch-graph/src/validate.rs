use std::collections::{HashMap, HashSet};

use crate::edge::EdgeType;
use crate::error::{Location, ValidationIssue};
use crate::node::NodeType;
use crate::visual::VisualGraph;

/// Runs every rule in and returns the full ordered issue list.
///
/// Node-type registration is enforced by the type system at deserialize
/// time (an unrecognized `type` tag fails to parse before `validate` is
/// ever reached), so it is not re-checked here.
pub fn validate(graph: &VisualGraph) -> Vec<ValidationIssue> {
  let mut issues = Vec::new();

  let node_ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();

  check_reachability(graph, &node_ids, &mut issues);
  check_acyclic_journey(graph, &mut issues);
  check_splitter_fanout(graph, &mut issues);
  check_collector_fanin(graph, &mut issues);
  check_required_inputs(graph, &mut issues);

  issues
}

fn check_reachability(
  graph: &VisualGraph,
  node_ids: &HashSet<&str>,
  issues: &mut Vec<ValidationIssue>,
) {
  for edge in &graph.edges {
    if !node_ids.contains(edge.source.as_str()) || !node_ids.contains(edge.target.as_str()) {
      issues.push(ValidationIssue {
        code: "unreachable_edge_endpoint".to_string(),
        message: format!(
          "edge {}→{} references a node that does not exist in this graph",
          edge.source, edge.target
        ),
        location: Location::Edge {
          source: edge.source.clone(),
          target: edge.target.clone(),
        },
      });
    }
  }
}

fn check_acyclic_journey(graph: &VisualGraph, issues: &mut Vec<ValidationIssue>) {
  let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
  for edge in &graph.edges {
    if edge.edge_type.is_journey_like() {
      adjacency
        .entry(edge.source.as_str())
        .or_default()
        .push(edge.target.as_str());
    }
  }

  #[derive(Clone, Copy, PartialEq)]
  enum Mark {
    Visiting,
    Done,
  }
  let mut marks: HashMap<&str, Mark> = HashMap::new();

  fn visit<'a>(
    node: &'a str,
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
    marks: &mut HashMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
    found_cycle: &mut bool,
  ) {
    if *found_cycle {
      return;
    }
    match marks.get(node) {
      Some(Mark::Done) => return,
      Some(Mark::Visiting) => {
        *found_cycle = true;
        return;
      }
      None => {}
    }
    marks.insert(node, Mark::Visiting);
    stack.push(node);
    if let Some(targets) = adjacency.get(node) {
      for target in targets {
        visit(target, adjacency, marks, stack, found_cycle);
        if *found_cycle {
          return;
        }
      }
    }
    stack.pop();
    marks.insert(node, Mark::Done);
  }

  for node in &graph.nodes {
    let mut found_cycle = false;
    let mut stack = Vec::new();
    visit(
      node.id.as_str(),
      &adjacency,
      &mut marks,
      &mut stack,
      &mut found_cycle,
    );
    if found_cycle {
      issues.push(ValidationIssue {
        code: "journey_cycle".to_string(),
        message: "journey edge subgraph contains a cycle".to_string(),
        location: Location::Node {
          node_id: node.id.clone(),
        },
      });
      break;
    }
  }
}

fn check_splitter_fanout(graph: &VisualGraph, issues: &mut Vec<ValidationIssue>) {
  for node in &graph.nodes {
    if node.kind.node_type() != NodeType::Splitter {
      continue;
    }
    let outgoing = graph.edges.iter().filter(|e| e.source == node.id).count();
    if outgoing < 2 {
      issues.push(ValidationIssue {
        code: "splitter_fanout".to_string(),
        message: format!(
          "splitter '{}' has {} outgoing edge(s), requires at least 2",
          node.id, outgoing
        ),
        location: Location::Node {
          node_id: node.id.clone(),
        },
      });
    }
  }
}

fn check_collector_fanin(graph: &VisualGraph, issues: &mut Vec<ValidationIssue>) {
  for node in &graph.nodes {
    if node.kind.node_type() != NodeType::Collector {
      continue;
    }
    let incoming = graph.edges.iter().filter(|e| e.target == node.id).count();
    if incoming < 2 {
      issues.push(ValidationIssue {
        code: "collector_fanin".to_string(),
        message: format!(
          "collector '{}' has {} incoming edge(s), requires at least 2",
          node.id, incoming
        ),
        location: Location::Node {
          node_id: node.id.clone(),
        },
      });
    }
  }
}

fn check_required_inputs(graph: &VisualGraph, issues: &mut Vec<ValidationIssue>) {
  for node in &graph.nodes {
    let unsatisfied = node.kind.unsatisfied_required_inputs();
    if unsatisfied.is_empty() {
      continue;
    }
    let has_upstream = graph.edges.iter().any(|e| e.target == node.id);
    if !has_upstream {
      issues.push(ValidationIssue {
        code: "missing_required_input".to_string(),
        message: format!(
          "node '{}' requires input(s) {:?} but has no upstream edge and no default",
          node.id, unsatisfied
        ),
        location: Location::Node {
          node_id: node.id.clone(),
        },
      });
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::edge::{EdgeType, VisualEdge};
  use crate::node::{NodeKind, Position, VisualNode};

  fn node(id: &str, kind: NodeKind) -> VisualNode {
    VisualNode {
      id: id.to_string(),
      kind,
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

  fn worker(id: &str) -> VisualNode {
    node(
      id,
      NodeKind::Worker {
        is_async: false,
        endpoint: None,
        required_inputs: vec![],
        default_inputs: Default::default(),
        entity_movement: None,
        timeout_ms: None,
      },
    )
  }

  #[test]
  fn accepts_valid_graph() {
    let graph = VisualGraph {
      nodes: vec![worker("a"), worker("b")],
      edges: vec![journey("a", "b")],
    };
    assert!(validate(&graph).is_empty());
  }

  #[test]
  fn rejects_dangling_edge() {
    let graph = VisualGraph {
      nodes: vec![worker("a")],
      edges: vec![journey("a", "missing")],
    };
    let issues = validate(&graph);
    assert!(issues.iter().any(|i| i.code == "unreachable_edge_endpoint"));
  }

  #[test]
  fn rejects_journey_cycle() {
    let graph = VisualGraph {
      nodes: vec![worker("a"), worker("b")],
      edges: vec![journey("a", "b"), journey("b", "a")],
    };
    let issues = validate(&graph);
    assert!(issues.iter().any(|i| i.code == "journey_cycle"));
  }

  #[test]
  fn allows_system_edge_cycle() {
    let graph = VisualGraph {
      nodes: vec![worker("a"), worker("b")],
      edges: vec![
        journey("a", "b"),
        VisualEdge {
          source: "b".to_string(),
          target: "a".to_string(),
          edge_type: EdgeType::System,
          predicate: None,
          label: None,
        },
      ],
    };
    assert!(validate(&graph).is_empty());
  }

  #[test]
  fn rejects_splitter_with_one_outgoing() {
    let graph = VisualGraph {
      nodes: vec![node("s", NodeKind::Splitter), worker("a")],
      edges: vec![journey("s", "a")],
    };
    let issues = validate(&graph);
    assert!(issues.iter().any(|i| i.code == "splitter_fanout"));
  }

  #[test]
  fn rejects_collector_with_one_incoming() {
    let graph = VisualGraph {
      nodes: vec![worker("a"), node("k", NodeKind::Collector)],
      edges: vec![journey("a", "k")],
    };
    let issues = validate(&graph);
    assert!(issues.iter().any(|i| i.code == "collector_fanin"));
  }

  #[test]
  fn rejects_missing_required_input_with_no_upstream_or_default() {
    let graph = VisualGraph {
      nodes: vec![node(
        "a",
        NodeKind::Worker {
          is_async: false,
          endpoint: None,
          required_inputs: vec!["email".to_string()],
          default_inputs: Default::default(),
          entity_movement: None,
          timeout_ms: None,
        },
      )],
      edges: vec![],
    };
    let issues = validate(&graph);
    assert!(issues.iter().any(|i| i.code == "missing_required_input"));
  }

  #[test]
  fn accepts_required_input_with_default() {
    let mut defaults = HashMap::new();
    defaults.insert("email".to_string(), serde_json::json!("a@x.com"));
    let graph = VisualGraph {
      nodes: vec![node(
        "a",
        NodeKind::Worker {
          is_async: false,
          endpoint: None,
          required_inputs: vec!["email".to_string()],
          default_inputs: defaults,
          entity_movement: None,
          timeout_ms: None,
        },
      )],
      edges: vec![],
    };
    assert!(validate(&graph).is_empty());
  }
}
