//! Compute graph: arena DAG, operation set and declarative pattern matcher.
mod dag;
mod node;
pub mod pattern;

pub use dag::Graph;
pub use node::{ElementType, Node, NodeId, Op, OpKind};
pub use pattern::{Match, Matcher, Pattern};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Unknown or retired node {0}")]
    UnknownNode(NodeId),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Element type mismatch: {0:?} vs {1:?}")]
    ElementTypeMismatch(ElementType, ElementType),

    #[error("Constant holds {got} values, shape needs {expected}")]
    ConstantSize { expected: usize, got: usize },

    #[error("{kind} expects {expected} inputs, got {got}")]
    Arity {
        kind: OpKind,
        expected: usize,
        got: usize,
    },

    #[error("Replacing {old} with {new} would create a cycle")]
    Cycle { old: NodeId, new: NodeId },
}

pub type GraphResult<T> = Result<T, GraphError>;
