//! Graph execution over ciphertext and plaintext handles.
//!
//! [`HeBackend`] compiles a [`Graph`](crate::graph::Graph) with the HE pass
//! pipeline and interprets it node by node. Additions and multiplications
//! run homomorphically; ReLU-family nodes on ciphertexts are handed to a
//! [`NonlinearOracle`], the party holding the secret key.

mod backend;
mod oracle;
mod tensor;

pub use backend::{CompiledGraph, HeBackend};
pub use oracle::{LocalOracle, NonlinearOracle};
pub use tensor::HeTensor;

use crate::crypto::CkksError;
use crate::graph::{ElementType, GraphError, NodeId, OpKind};
use crate::kernel::KernelError;
use crate::pass::PassError;
use crate::protocol::SessionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Expected {expected} input tensors, got {got}")]
    InputCount { expected: usize, got: usize },

    #[error("Input {index}: expected {expected_type:?}{expected:?}, got {got_type:?}{got:?}")]
    InputMismatch {
        index: usize,
        expected_type: ElementType,
        expected: Vec<usize>,
        got_type: ElementType,
        got: Vec<usize>,
    },

    #[error("Invalid batching: {0}")]
    Batch(String),

    #[error("Batch of {batch} lanes exceeds capacity {capacity}")]
    LaneCapacity { batch: usize, capacity: usize },

    #[error("{0} elements given for the tensor")]
    ValueCount(usize),

    #[error("Element count of shape {0:?} overflows")]
    ShapeOverflow(Vec<usize>),

    #[error("No value computed for node {0}")]
    MissingValue(NodeId),

    #[error("{0} cannot be evaluated on ciphertexts")]
    UnsupportedOnCipher(OpKind),

    #[error("Reading ciphertexts requires the secret key")]
    MissingSecretKey,

    #[error("Oracle returned {got} ciphertexts for {expected}")]
    ResponseLength { expected: usize, got: usize },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Pass(#[from] PassError),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Ckks(#[from] CkksError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

pub type ExecResult<T> = Result<T, ExecError>;
