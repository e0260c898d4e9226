//! Declarative subgraph patterns.
//!
//! A [`Pattern`] is a template tree. Matching it against a root node binds
//! each `Label` to a concrete node in the match's `pattern_map`; a label used
//! twice must bind the same node both times.

use super::{Graph, Node, NodeId, OpKind};
use fnv::FnvHashMap;

pub type NodePredicate = fn(&Node) -> bool;

#[derive(Debug, Clone)]
pub enum Pattern {
    /// Binds any node accepted by the optional predicate.
    Label {
        name: &'static str,
        predicate: Option<NodePredicate>,
    },
    /// Node of `kind` whose inputs match `args` in order (either order for
    /// commutative binary kinds).
    Op { kind: OpKind, args: Vec<Pattern> },
    /// Steps through single-input nodes accepted by `predicate` before
    /// matching `inner`.
    Skip {
        inner: Box<Pattern>,
        predicate: NodePredicate,
    },
}

impl Pattern {
    pub fn label(name: &'static str) -> Self {
        Pattern::Label {
            name,
            predicate: None,
        }
    }

    pub fn label_where(name: &'static str, predicate: NodePredicate) -> Self {
        Pattern::Label {
            name,
            predicate: Some(predicate),
        }
    }

    pub fn op(kind: OpKind, args: Vec<Pattern>) -> Self {
        Pattern::Op { kind, args }
    }

    pub fn skip(inner: Pattern, predicate: NodePredicate) -> Self {
        Pattern::Skip {
            inner: Box::new(inner),
            predicate,
        }
    }
}

/// Result of a successful match.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub root: NodeId,
    pub pattern_map: FnvHashMap<&'static str, NodeId>,
    /// Nodes matched by `Op` patterns, root first.
    pub matched_nodes: Vec<NodeId>,
}

impl Match {
    pub fn get(&self, label: &str) -> Option<NodeId> {
        self.pattern_map.get(label).copied()
    }
}

#[derive(Debug, Clone)]
pub struct Matcher {
    name: &'static str,
    pattern: Pattern,
}

#[derive(Clone, Default)]
struct State {
    bindings: FnvHashMap<&'static str, NodeId>,
    matched: Vec<NodeId>,
}

impl Matcher {
    pub fn new(name: &'static str, pattern: Pattern) -> Self {
        Self { name, pattern }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn match_root(&self, graph: &Graph, root: NodeId) -> Option<Match> {
        let mut state = State::default();
        if match_pattern(graph, &self.pattern, root, &mut state) {
            Some(Match {
                root,
                pattern_map: state.bindings,
                matched_nodes: state.matched,
            })
        } else {
            None
        }
    }
}

fn match_pattern(graph: &Graph, pattern: &Pattern, id: NodeId, state: &mut State) -> bool {
    let Ok(node) = graph.node(id) else {
        return false;
    };
    match pattern {
        Pattern::Label { name, predicate } => {
            if predicate.is_some_and(|accept| !accept(node)) {
                return false;
            }
            match state.bindings.get(name) {
                Some(&bound) => bound == id,
                None => {
                    state.bindings.insert(*name, id);
                    true
                }
            }
        }
        Pattern::Skip { inner, predicate } => {
            if predicate(node) && node.inputs.len() == 1 {
                match_pattern(graph, inner, node.inputs[0], state)
            } else {
                match_pattern(graph, inner, id, state)
            }
        }
        Pattern::Op { kind, args } => {
            if node.kind() != *kind || node.inputs.len() != args.len() {
                return false;
            }
            state.matched.push(id);
            let snapshot = state.clone();
            if match_args(graph, args, &node.inputs, state) {
                return true;
            }
            if kind.is_commutative() && args.len() == 2 {
                *state = snapshot;
                let swapped = [node.inputs[1], node.inputs[0]];
                return match_args(graph, args, &swapped, state);
            }
            false
        }
    }
}

fn match_args(graph: &Graph, args: &[Pattern], inputs: &[NodeId], state: &mut State) -> bool {
    args.iter()
        .zip(inputs)
        .all(|(arg, &input)| match_pattern(graph, arg, input, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ElementType;

    fn is_broadcast(node: &Node) -> bool {
        node.kind() == OpKind::Broadcast
    }

    fn is_constant(node: &Node) -> bool {
        node.kind() == OpKind::Constant
    }

    fn min_relu() -> Matcher {
        Matcher::new(
            "min_relu",
            Pattern::op(
                OpKind::Minimum,
                vec![
                    Pattern::op(OpKind::Relu, vec![Pattern::label("x")]),
                    Pattern::skip(Pattern::label_where("alpha", is_constant), is_broadcast),
                ],
            ),
        )
    }

    #[test]
    fn binds_labels_through_skip_and_commutation() {
        let mut g = Graph::new();
        let x = g.parameter(ElementType::F32, vec![3]);
        let alpha = g.constant(ElementType::F32, vec![], vec![6.0]).unwrap();
        let b = g.broadcast(alpha, vec![3]).unwrap();
        let relu = g.relu(x).unwrap();
        let min = g.minimum(b, relu).unwrap();

        let m = min_relu().match_root(&g, min).unwrap();
        assert_eq!(m.get("x"), Some(x));
        assert_eq!(m.get("alpha"), Some(alpha));
        assert_eq!(m.matched_nodes, vec![min, relu]);
        assert!(min_relu().match_root(&g, relu).is_none());
    }

    #[test]
    fn predicate_failure_rejects_match() {
        let mut g = Graph::new();
        let x = g.parameter(ElementType::F32, vec![3]);
        let y = g.parameter(ElementType::F32, vec![3]);
        let relu = g.relu(x).unwrap();
        let min = g.minimum(relu, y).unwrap();
        assert!(min_relu().match_root(&g, min).is_none());
    }

    #[test]
    fn repeated_label_must_bind_same_node() {
        let square = Matcher::new(
            "square",
            Pattern::op(OpKind::Multiply, vec![Pattern::label("a"), Pattern::label("a")]),
        );
        let mut g = Graph::new();
        let x = g.parameter(ElementType::F32, vec![2]);
        let y = g.parameter(ElementType::F32, vec![2]);
        let xx = g.multiply(x, x).unwrap();
        let xy = g.multiply(x, y).unwrap();
        assert!(square.match_root(&g, xx).is_some());
        assert!(square.match_root(&g, xy).is_none());
    }
}
