//! Graph rewrite passes and the fixpoint driver.
mod fusion;
mod insert_rescale;
mod merge_rescales;
mod rewrite;

pub use fusion::HeFusion;
pub use insert_rescale::{InsertRescale, ensure_rescale_after};
pub use merge_rescales::MergeRescales;

use crate::graph::{Graph, GraphError, NodeId, OpKind};
use log::{debug, info};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PassError {
    #[error("Node {node} ({kind}) has {outputs} outputs; rescale placement needs exactly one")]
    MultipleOutputs {
        node: NodeId,
        kind: OpKind,
        outputs: usize,
    },

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("No fixpoint after {0} iterations")]
    NoFixpoint(usize),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

pub type PassResult<T> = Result<T, PassError>;

/// A graph rewrite. Returns whether the graph changed.
pub trait GraphPass {
    fn name(&self) -> &'static str;

    fn run_on_graph(&self, graph: &mut Graph) -> PassResult<bool>;
}

/// Runs its passes in order, repeating until a full round changes nothing.
pub struct PassManager {
    passes: Vec<Box<dyn GraphPass>>,
    max_iterations: usize,
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PassManager {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            max_iterations: 32,
        }
    }

    /// Fusion, then rescale insertion, then rescale merging.
    pub fn he_pipeline() -> Self {
        let mut manager = Self::new();
        manager.register(HeFusion::new());
        manager.register(InsertRescale);
        manager.register(MergeRescales::new());
        manager
    }

    pub fn register<P: GraphPass + 'static>(&mut self, pass: P) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Returns the number of rounds that changed the graph.
    pub fn run(&self, graph: &mut Graph) -> PassResult<usize> {
        for round in 0..self.max_iterations {
            let mut changed = false;
            for pass in &self.passes {
                if pass.run_on_graph(graph)? {
                    info!("pass {} rewrote the graph (round {round})", pass.name());
                    changed = true;
                }
            }
            let pruned = graph.prune();
            if pruned > 0 {
                debug!("pruned {pruned} dead nodes");
            }
            if !changed {
                return Ok(round);
            }
        }
        Err(PassError::NoFixpoint(self.max_iterations))
    }
}
