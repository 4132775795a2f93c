use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Discriminant for a node's type, independent of its attached data.
///
/// Used for registration checks and status-machine dispatch where the
/// attached data isn't needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
  Worker,
  Splitter,
  Collector,
  Ux,
  Section,
  Item,
  CostsSection,
  RevenueSection,
}

impl NodeType {
  /// Section/Item/financial-section nodes are structural only; the handler
  /// registry must never fire them.
  pub fn is_executable(&self) -> bool {
    matches!(
      self,
      NodeType::Worker | NodeType::Splitter | NodeType::Collector | NodeType::Ux
    )
  }
}

/// A node's type together with the data that type carries.
///
/// Shared between the authored (visual) and compiled (execution) graph —
/// the execution graph simply freezes a copy of whatever was authored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
  /// Dispatches to an external worker, synchronously or via callback.
  Worker {
    #[serde(default)]
    is_async: bool,
    /// Address of the external worker service. Required for async workers
    /// (the engine POSTs the declared input plus a callback_url here);
    /// unused for synchronous workers, which the handler registry executes
    /// inline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    /// Input keys this node's schema declares as required. Validated before
    /// the node fires: each must be satisfiable by an upstream output or
    /// have an entry in `default_inputs`.
    #[serde(default)]
    required_inputs: Vec<String>,
    /// Defaults for required inputs not satisfied by an upstream output.
    #[serde(default)]
    default_inputs: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entity_movement: Option<EntityMovement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
  },
  /// Fans out each outgoing journey edge independently.
  Splitter,
  /// Fires once every incoming journey edge's source is completed or
  /// skipped, with at least one completed.
  Collector,
  /// Suspends the run until an external reply is matched to it.
  Ux {
    /// Intent keyword -> symbolic outcome, used by reply adapters to
    /// interpret free-text replies (GLOSSARY "Intent keywords").
    #[serde(default)]
    intents: HashMap<String, String>,
  },
  /// BMC structural nodes. Never transition beyond `pending`.
  Section,
  Item,
  CostsSection,
  RevenueSection,
}

impl NodeKind {
  pub fn node_type(&self) -> NodeType {
    match self {
      NodeKind::Worker { .. } => NodeType::Worker,
      NodeKind::Splitter => NodeType::Splitter,
      NodeKind::Collector => NodeType::Collector,
      NodeKind::Ux { .. } => NodeType::Ux,
      NodeKind::Section => NodeType::Section,
      NodeKind::Item => NodeType::Item,
      NodeKind::CostsSection => NodeType::CostsSection,
      NodeKind::RevenueSection => NodeType::RevenueSection,
    }
  }

  pub fn is_executable(&self) -> bool {
    self.node_type().is_executable()
  }

  pub fn entity_movement(&self) -> Option<&EntityMovement> {
    match self {
      NodeKind::Worker { entity_movement, .. } => entity_movement.as_ref(),
      _ => None,
    }
  }

  /// Whether a Worker node is asynchronous (fire-and-wait-for-callback).
  /// `false` for every non-Worker node type.
  pub fn is_async_worker(&self) -> bool {
    matches!(self, NodeKind::Worker { is_async: true, .. })
  }

  pub fn endpoint(&self) -> Option<&str> {
    match self {
      NodeKind::Worker { endpoint, .. } => endpoint.as_deref(),
      _ => None,
    }
  }

  pub fn default_inputs(&self) -> Option<&HashMap<String, serde_json::Value>> {
    match self {
      NodeKind::Worker { default_inputs, .. } => Some(default_inputs),
      _ => None,
    }
  }

  pub fn timeout_ms(&self) -> Option<u64> {
    match self {
      NodeKind::Worker { timeout_ms, .. } => *timeout_ms,
      _ => None,
    }
  }

  pub fn ux_intents(&self) -> Option<&HashMap<String, String>> {
    match self {
      NodeKind::Ux { intents } => Some(intents),
      _ => None,
    }
  }

  /// Required input keys not covered by `default_inputs` — the set that
  /// must be satisfiable by an upstream output.
  pub fn unsatisfied_required_inputs(&self) -> Vec<&str> {
    match self {
      NodeKind::Worker {
        required_inputs,
        default_inputs,
        ..
      } => required_inputs
        .iter()
        .filter(|k| !default_inputs.contains_key(k.as_str()))
        .map(|k| k.as_str())
        .collect(),
      _ => Vec::new(),
    }
  }
}

/// A worker's declared post-completion entity movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMovement {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub on_success: Option<MovementRule>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub on_failure: Option<MovementRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementRule {
  pub target_section_id: String,
  #[serde(default)]
  pub mark_current_node: Option<bool>,
  #[serde(default)]
  pub record_journey_as: Option<String>,
}

/// A node as authored on the visual canvas: type/data plus display metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualNode {
  pub id: String,
  #[serde(flatten)]
  pub kind: NodeKind,
  pub position: Position,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub style: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
  pub x: f64,
  pub y: f64,
}
