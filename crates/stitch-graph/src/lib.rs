//! Graph model and validator for stitch workflows (C1).
//!
//! Two graph representations: [`VisualGraph`] is the authored form (node
//! positions, styles); [`ExecutionGraph`] is the compiled, immutable form a
//! [`Run`](#) walks at O(1) per step. `compile` validates a `VisualGraph`
//! and freezes it into an `ExecutionGraph`; the execution graph is never
//! mutated after creation, so in-flight runs are unaffected by later edits
//! to the visual graph.

mod compile;
mod edge;
mod error;
mod execution;
mod node;
mod validate;
mod visual;

pub use compile::compile;
pub use edge::{EdgeData, EdgeType, Predicate, VisualEdge, edge_key};
pub use error::{Location, ValidationFailure, ValidationIssue};
pub use execution::ExecutionGraph;
pub use node::{EntityMovement, MovementRule, NodeKind, NodeType, Position, VisualNode};
pub use validate::validate;
pub use visual::VisualGraph;
