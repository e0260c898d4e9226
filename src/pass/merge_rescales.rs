use super::rewrite::GraphRewrite;
use super::{GraphPass, PassError, PassResult};
use crate::graph::{Graph, Match, Matcher, OpKind, Pattern};
use log::info;

/// Collapses `Rescale(Rescale(x))` into `Rescale(x)`.
pub struct MergeRescales {
    rewrite: GraphRewrite,
}

impl Default for MergeRescales {
    fn default() -> Self {
        Self::new()
    }
}

impl MergeRescales {
    pub fn new() -> Self {
        let pattern = Pattern::op(
            OpKind::Rescale,
            vec![Pattern::op(OpKind::Rescale, vec![Pattern::label("x")])],
        );
        let mut rewrite = GraphRewrite::default();
        rewrite.add_matcher(Matcher::new("MergeRescales", pattern), merge);
        Self { rewrite }
    }
}

fn merge(graph: &mut Graph, m: &Match) -> PassResult<bool> {
    let x = m
        .get("x")
        .ok_or_else(|| PassError::InvariantViolation("label x unbound".into()))?;
    if graph.kind(x) == Some(OpKind::Rescale) {
        return Err(PassError::InvariantViolation(format!(
            "merged rescale input {x} is itself a rescale"
        )));
    }
    let merged = graph.rescale(x)?;
    graph.replace_node(m.root, merged)?;
    info!("merged rescales at {} into {merged}", m.root);
    Ok(true)
}

impl GraphPass for MergeRescales {
    fn name(&self) -> &'static str {
        "MergeRescales"
    }

    fn run_on_graph(&self, graph: &mut Graph) -> PassResult<bool> {
        self.rewrite.run(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ElementType;

    #[test]
    fn double_rescale_collapses() {
        let mut g = Graph::new();
        let a = g.parameter(ElementType::F32, vec![3]);
        let x = g.relu(a).unwrap();
        let r1 = g.rescale(x).unwrap();
        let r2 = g.rescale(r1).unwrap();
        g.add_result(r2).unwrap();

        let pass = MergeRescales::new();
        assert!(pass.run_on_graph(&mut g).unwrap());
        g.prune();
        assert_eq!(g.count_ops(OpKind::Rescale), 1);
        let root = g.results()[0];
        assert_eq!(g.node(root).unwrap().inputs, vec![x]);
        assert_eq!(g.kind(x), Some(OpKind::Relu));
        assert!(!pass.run_on_graph(&mut g).unwrap());
    }

    #[test]
    fn chains_collapse_bottom_up() {
        let mut g = Graph::new();
        let a = g.parameter(ElementType::F32, vec![3]);
        let r1 = g.rescale(a).unwrap();
        let r2 = g.rescale(r1).unwrap();
        let r3 = g.rescale(r2).unwrap();
        g.add_result(r3).unwrap();
        let pass = MergeRescales::new();
        pass.run_on_graph(&mut g).unwrap();
        g.prune();
        assert_eq!(g.count_ops(OpKind::Rescale), 1);
        assert_eq!(g.node(g.results()[0]).unwrap().inputs, vec![a]);
    }
}
