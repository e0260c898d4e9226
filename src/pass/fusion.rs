//! Pattern-driven fusion for encrypted execution.
//!
//! Two families of rewrites live here:
//!
//! * `Minimum(Relu(x), alpha)` with a uniform constant `alpha` becomes a
//!   single `BoundedRelu(x, alpha)`, which the client evaluates in one round
//!   trip instead of two.
//! * `Dot`, `Multiply` and `Convolution` get a `Rescale` placed directly
//!   after them, shared with [`InsertRescale`](super::InsertRescale).

use super::insert_rescale::ensure_rescale_after;
use super::rewrite::GraphRewrite;
use super::{GraphPass, PassError, PassResult};
use crate::graph::{Graph, Match, Matcher, Node, OpKind, Pattern};
use log::{debug, info};

pub struct HeFusion {
    rewrite: GraphRewrite,
}

impl Default for HeFusion {
    fn default() -> Self {
        Self::new()
    }
}

fn is_broadcast(node: &Node) -> bool {
    node.kind() == OpKind::Broadcast
}

fn is_constant(node: &Node) -> bool {
    node.kind() == OpKind::Constant
}

fn bound(m: &Match, label: &str) -> PassResult<crate::graph::NodeId> {
    m.get(label)
        .ok_or_else(|| PassError::InvariantViolation(format!("label {label} unbound")))
}

impl HeFusion {
    pub fn new() -> Self {
        let mut rewrite = GraphRewrite::default();

        let bounded_relu = Pattern::op(
            OpKind::Minimum,
            vec![
                Pattern::op(OpKind::Relu, vec![Pattern::label("x")]),
                Pattern::skip(Pattern::label_where("alpha", is_constant), is_broadcast),
            ],
        );
        rewrite.add_matcher(Matcher::new("BoundedRelu", bounded_relu), fuse_bounded_relu);

        for (name, kind) in [
            ("RescaleAfterDot", OpKind::Dot),
            ("RescaleAfterMultiply", OpKind::Multiply),
            ("RescaleAfterConvolution", OpKind::Convolution),
        ] {
            let pattern = Pattern::op(kind, vec![Pattern::label("a"), Pattern::label("b")]);
            rewrite.add_matcher(Matcher::new(name, pattern), rescale_after);
        }

        Self { rewrite }
    }
}

fn fuse_bounded_relu(graph: &mut Graph, m: &Match) -> PassResult<bool> {
    let x = bound(m, "x")?;
    let alpha = bound(m, "alpha")?;
    let root = graph.node(m.root)?;
    if !root.element_type.is_real() {
        debug!("{}: non-real element type {:?}", m.root, root.element_type);
        return Ok(false);
    }
    let x_node = graph.node(x)?;
    let alpha_node = graph.node(alpha)?;
    if alpha_node.element_type != x_node.element_type {
        debug!("{}: alpha type differs from input", m.root);
        return Ok(false);
    }
    if alpha_node.shape != x_node.shape {
        debug!(
            "{}: alpha shape {:?} does not match input {:?}",
            m.root, alpha_node.shape, x_node.shape
        );
        return Ok(false);
    }
    let Some(values) = alpha_node.constant_values() else {
        return Ok(false);
    };
    let Some(&first) = values.first() else {
        return Ok(false);
    };
    if values.iter().any(|&v| v != first) {
        debug!("{}: alpha is not uniform", m.root);
        return Ok(false);
    }

    let fused = graph.bounded_relu(x, first)?;
    graph.replace_node(m.root, fused)?;
    info!("fused {} into bounded relu {fused} (alpha = {first})", m.root);
    Ok(true)
}

fn rescale_after(graph: &mut Graph, m: &Match) -> PassResult<bool> {
    ensure_rescale_after(graph, m.root)
}

impl GraphPass for HeFusion {
    fn name(&self) -> &'static str {
        "HeFusion"
    }

    fn run_on_graph(&self, graph: &mut Graph) -> PassResult<bool> {
        self.rewrite.run(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ElementType, Op};

    fn relu_min(alpha_values: Vec<f64>, alpha_shape: Vec<usize>, et: ElementType) -> (Graph, usize) {
        let mut g = Graph::new();
        let x = g.parameter(et, vec![6]);
        let alpha = g.constant(et, alpha_shape.clone(), alpha_values).unwrap();
        let alpha = if alpha_shape == vec![6] {
            alpha
        } else {
            g.broadcast(alpha, vec![6]).unwrap()
        };
        let relu = g.relu(x).unwrap();
        let min = g.minimum(relu, alpha).unwrap();
        g.add_result(min).unwrap();
        (g, x.index())
    }

    #[test]
    fn fuses_uniform_bound() {
        let (mut g, x) = relu_min(vec![1.0; 6], vec![6], ElementType::F32);
        assert!(HeFusion::new().run_on_graph(&mut g).unwrap());
        g.prune();
        let root = g.node(g.results()[0]).unwrap();
        assert_eq!(root.op, Op::BoundedRelu { alpha: 1.0 });
        assert_eq!(root.inputs[0].index(), x);
        assert_eq!(g.count_ops(OpKind::Minimum), 0);
        assert_eq!(g.count_ops(OpKind::Relu), 0);
    }

    #[test]
    fn declines_scalar_broadcast_alpha() {
        let (mut g, _) = relu_min(vec![6.0], vec![], ElementType::F64);
        assert!(!HeFusion::new().run_on_graph(&mut g).unwrap());
        assert_eq!(g.count_ops(OpKind::BoundedRelu), 0);
        assert_eq!(g.count_ops(OpKind::Minimum), 1);
    }

    #[test]
    fn fuses_through_same_shape_broadcast() {
        let mut g = Graph::new();
        let x = g.parameter(ElementType::F32, vec![6]);
        let alpha = g.constant(ElementType::F32, vec![6], vec![2.0; 6]).unwrap();
        let alpha = g.broadcast(alpha, vec![6]).unwrap();
        let relu = g.relu(x).unwrap();
        let min = g.minimum(relu, alpha).unwrap();
        g.add_result(min).unwrap();
        assert!(HeFusion::new().run_on_graph(&mut g).unwrap());
        let root = g.node(g.results()[0]).unwrap();
        assert_eq!(root.op, Op::BoundedRelu { alpha: 2.0 });
    }

    #[test]
    fn declines_non_uniform_alpha() {
        let (mut g, _) = relu_min(vec![1.0, 1.0, 2.0, 1.0, 1.0, 1.0], vec![6], ElementType::F32);
        assert!(!HeFusion::new().run_on_graph(&mut g).unwrap());
        assert_eq!(g.count_ops(OpKind::Minimum), 1);
    }

    #[test]
    fn declines_integer_types() {
        let (mut g, _) = relu_min(vec![1.0; 6], vec![6], ElementType::I32);
        assert!(!HeFusion::new().run_on_graph(&mut g).unwrap());
        assert_eq!(g.count_ops(OpKind::BoundedRelu), 0);
    }

    #[test]
    fn declines_non_constant_alpha() {
        let mut g = Graph::new();
        let x = g.parameter(ElementType::F32, vec![3]);
        let y = g.parameter(ElementType::F32, vec![3]);
        let relu = g.relu(x).unwrap();
        let min = g.minimum(relu, y).unwrap();
        g.add_result(min).unwrap();
        assert!(!HeFusion::new().run_on_graph(&mut g).unwrap());
    }

    #[test]
    fn places_single_rescale_after_multiply() {
        let mut g = Graph::new();
        let a = g.parameter(ElementType::F32, vec![6]);
        let b = g.parameter(ElementType::F32, vec![6]);
        let m = g.multiply(a, b).unwrap();
        g.add_result(m).unwrap();

        let fusion = HeFusion::new();
        assert!(fusion.run_on_graph(&mut g).unwrap());
        assert!(!fusion.run_on_graph(&mut g).unwrap());
        assert_eq!(g.count_ops(OpKind::Rescale), 1);
        let root = g.results()[0];
        assert_eq!(g.kind(root), Some(OpKind::Rescale));
        assert_eq!(g.node(root).unwrap().inputs, vec![m]);
    }
}
