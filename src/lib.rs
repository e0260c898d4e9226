//! Encrypted execution of dataflow graphs with a toy leveled CKKS scheme.
//!
//! A [`graph::Graph`] is compiled by the [`pass`] pipeline, which fuses
//! `Minimum(Relu(x), alpha)` into `BoundedRelu` and places exactly one
//! `Rescale` after every multiplicative node, then interpreted by
//! [`exec::HeBackend`] over [`handle`]s. ReLU-family nodes on ciphertexts
//! are delegated to the secret-key holder through the [`protocol`]
//! session.

pub mod config;
pub mod crypto;
pub mod encoding;
pub mod exec;
pub mod graph;
pub mod handle;
pub mod kernel;
pub mod keys;
pub mod math;
pub mod pass;
pub mod protocol;
pub mod rings;
pub mod wire;

pub use config::{BackendConfig, SessionConfig};
pub use crypto::{CkksContext, CkksEvaluator, CkksParams, Evaluator, KeySet};
pub use exec::{CompiledGraph, HeBackend, HeTensor};
pub use graph::{ElementType, Graph, NodeId, OpKind};
pub use handle::{CipherState, CiphertextHandle, HeValue, Packing, PlaintextHandle};
pub use pass::PassManager;
pub use protocol::{ServerSession, Session};
