//! Arena-backed compute DAG.
//!
//! Nodes are addressed by [`NodeId`]. Rewrites never mutate a node's
//! operation: they add a replacement node and point consumers at it, and the
//! old node is retired (its slot set to `None`).

use super::node::{ElementType, Node, NodeId, Op, OpKind};
use super::{GraphError, GraphResult};
use crate::kernel::{shape_size, window_shape};

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Option<Node>>,
    parameters: Vec<NodeId>,
    results: Vec<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: NodeId) -> GraphResult<&Node> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(GraphError::UnknownNode(id))
    }

    pub fn kind(&self, id: NodeId) -> Option<OpKind> {
        self.node(id).ok().map(Node::kind)
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    pub fn parameters(&self) -> &[NodeId] {
        &self.parameters
    }

    pub fn results(&self) -> &[NodeId] {
        &self.results
    }

    pub fn add_result(&mut self, id: NodeId) -> GraphResult<()> {
        self.node(id)?;
        self.results.push(id);
        Ok(())
    }

    /// Appends a raw node. Inputs must already exist.
    pub fn add_node(&mut self, node: Node) -> GraphResult<NodeId> {
        for &input in &node.inputs {
            self.node(input)?;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(node));
        Ok(id)
    }

    /// Node producing `outputs` values. Only the rescale passes look at
    /// the output count; they reject anything other than one.
    pub fn add_multi_output_node(
        &mut self,
        op: Op,
        inputs: Vec<NodeId>,
        outputs: usize,
    ) -> GraphResult<NodeId> {
        let first = *inputs
            .first()
            .ok_or_else(|| GraphError::Arity { kind: op.kind(), expected: 1, got: 0 })?;
        let template = self.node(first)?;
        let node = Node {
            element_type: template.element_type,
            shape: template.shape.clone(),
            op,
            inputs,
            outputs,
        };
        self.add_node(node)
    }

    fn push(&mut self, op: Op, element_type: ElementType, shape: Vec<usize>, inputs: Vec<NodeId>) -> GraphResult<NodeId> {
        self.add_node(Node {
            op,
            element_type,
            shape,
            inputs,
            outputs: 1,
        })
    }

    pub fn parameter(&mut self, element_type: ElementType, shape: Vec<usize>) -> NodeId {
        let index = self.parameters.len();
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(Node {
            op: Op::Parameter { index },
            element_type,
            shape,
            inputs: Vec::new(),
            outputs: 1,
        }));
        self.parameters.push(id);
        id
    }

    pub fn constant(
        &mut self,
        element_type: ElementType,
        shape: Vec<usize>,
        values: Vec<f64>,
    ) -> GraphResult<NodeId> {
        if values.len() != shape_size(&shape) {
            return Err(GraphError::ConstantSize {
                expected: shape_size(&shape),
                got: values.len(),
            });
        }
        self.push(Op::Constant { values }, element_type, shape, Vec::new())
    }

    pub fn broadcast(&mut self, input: NodeId, shape: Vec<usize>) -> GraphResult<NodeId> {
        let node = self.node(input)?;
        let in_shape = &node.shape;
        let compatible = in_shape.len() <= shape.len()
            && in_shape
                .iter()
                .rev()
                .zip(shape.iter().rev())
                .all(|(&d, &o)| d == 1 || d == o);
        if !compatible {
            return Err(GraphError::ShapeMismatch(format!(
                "cannot broadcast {in_shape:?} to {shape:?}"
            )));
        }
        let element_type = node.element_type;
        self.push(Op::Broadcast, element_type, shape, vec![input])
    }

    fn binary_elementwise(&mut self, op: Op, a: NodeId, b: NodeId) -> GraphResult<NodeId> {
        let (ta, sa) = self.type_and_shape(a)?;
        let (tb, sb) = self.type_and_shape(b)?;
        if ta != tb {
            return Err(GraphError::ElementTypeMismatch(ta, tb));
        }
        if sa != sb {
            return Err(GraphError::ShapeMismatch(format!(
                "{} operands {sa:?} and {sb:?}",
                op.kind()
            )));
        }
        self.push(op, ta, sa, vec![a, b])
    }

    pub fn add(&mut self, a: NodeId, b: NodeId) -> GraphResult<NodeId> {
        self.binary_elementwise(Op::Add, a, b)
    }

    pub fn multiply(&mut self, a: NodeId, b: NodeId) -> GraphResult<NodeId> {
        self.binary_elementwise(Op::Multiply, a, b)
    }

    pub fn minimum(&mut self, a: NodeId, b: NodeId) -> GraphResult<NodeId> {
        self.binary_elementwise(Op::Minimum, a, b)
    }

    pub fn dot(&mut self, a: NodeId, b: NodeId) -> GraphResult<NodeId> {
        let (ta, sa) = self.type_and_shape(a)?;
        let (tb, sb) = self.type_and_shape(b)?;
        if ta != tb {
            return Err(GraphError::ElementTypeMismatch(ta, tb));
        }
        match (sa.last(), sb.first()) {
            (Some(k), Some(kb)) if k == kb => {}
            _ => {
                return Err(GraphError::ShapeMismatch(format!(
                    "dot of {sa:?} and {sb:?}"
                )));
            }
        }
        let shape = sa[..sa.len() - 1].iter().chain(&sb[1..]).copied().collect();
        self.push(Op::Dot, ta, shape, vec![a, b])
    }

    pub fn convolution(
        &mut self,
        data: NodeId,
        filter: NodeId,
        strides: [usize; 2],
    ) -> GraphResult<NodeId> {
        let (td, sd) = self.type_and_shape(data)?;
        let (tf, sf) = self.type_and_shape(filter)?;
        if td != tf {
            return Err(GraphError::ElementTypeMismatch(td, tf));
        }
        let [n, c, h, w] = rank4(&sd)?;
        let [o, fc, kh, kw] = rank4(&sf)?;
        if c != fc {
            return Err(GraphError::ShapeMismatch(format!(
                "convolution channels {sd:?} vs filter {sf:?}"
            )));
        }
        let shape = window_shape(n, o, [h, w], [kh, kw], strides)
            .map_err(|e| GraphError::ShapeMismatch(e.to_string()))?;
        self.push(Op::Convolution { strides }, td, shape.to_vec(), vec![data, filter])
    }

    pub fn avg_pool(
        &mut self,
        data: NodeId,
        window: [usize; 2],
        strides: [usize; 2],
    ) -> GraphResult<NodeId> {
        let (td, sd) = self.type_and_shape(data)?;
        let [n, c, h, w] = rank4(&sd)?;
        let shape = window_shape(n, c, [h, w], window, strides)
            .map_err(|e| GraphError::ShapeMismatch(e.to_string()))?;
        self.push(Op::AvgPool { window, strides }, td, shape.to_vec(), vec![data])
    }

    fn unary(&mut self, op: Op, x: NodeId) -> GraphResult<NodeId> {
        let (t, s) = self.type_and_shape(x)?;
        self.push(op, t, s, vec![x])
    }

    pub fn relu(&mut self, x: NodeId) -> GraphResult<NodeId> {
        self.unary(Op::Relu, x)
    }

    pub fn bounded_relu(&mut self, x: NodeId, alpha: f64) -> GraphResult<NodeId> {
        self.unary(Op::BoundedRelu { alpha }, x)
    }

    /// Rescale node: same type and shape as its input.
    pub fn rescale(&mut self, x: NodeId) -> GraphResult<NodeId> {
        self.unary(Op::Rescale, x)
    }

    fn type_and_shape(&self, id: NodeId) -> GraphResult<(ElementType, Vec<usize>)> {
        let node = self.node(id)?;
        Ok((node.element_type, node.shape.clone()))
    }

    /// Live nodes that take `id` as an input, in arena order, without
    /// duplicates.
    pub fn consumers(&self, id: NodeId) -> Vec<NodeId> {
        self.live()
            .filter(|(_, node)| node.inputs.contains(&id))
            .map(|(cid, _)| cid)
            .collect()
    }

    pub fn is_result(&self, id: NodeId) -> bool {
        self.results.contains(&id)
    }

    /// Points every use of `old` (node inputs and graph results) at `new`,
    /// except the inputs of the nodes in `except`. Returns whether any edge
    /// moved.
    pub fn redirect_uses(&mut self, old: NodeId, new: NodeId, except: &[NodeId]) -> bool {
        let mut moved = false;
        for (index, slot) in self.nodes.iter_mut().enumerate() {
            let Some(node) = slot else { continue };
            if except.contains(&NodeId(index)) {
                continue;
            }
            for input in node.inputs.iter_mut().filter(|i| **i == old) {
                *input = new;
                moved = true;
            }
        }
        for result in self.results.iter_mut().filter(|r| **r == old) {
            *result = new;
            moved = true;
        }
        moved
    }

    /// Moves the inputs of `consumer` that point at `old` to `new`.
    pub fn redirect_consumer(&mut self, consumer: NodeId, old: NodeId, new: NodeId) -> GraphResult<bool> {
        let node = self
            .nodes
            .get_mut(consumer.0)
            .and_then(Option::as_mut)
            .ok_or(GraphError::UnknownNode(consumer))?;
        let mut moved = false;
        for input in node.inputs.iter_mut().filter(|i| **i == old) {
            *input = new;
            moved = true;
        }
        Ok(moved)
    }

    /// Redirects all uses of `old` to `new` and retires `old`.
    pub fn replace_node(&mut self, old: NodeId, new: NodeId) -> GraphResult<()> {
        self.node(old)?;
        self.node(new)?;
        if self.reaches(new, old) {
            return Err(GraphError::Cycle { old, new });
        }
        self.redirect_uses(old, new, &[new]);
        self.retire(old);
        Ok(())
    }

    fn retire(&mut self, id: NodeId) {
        if !self.parameters.contains(&id) {
            if let Some(slot) = self.nodes.get_mut(id.0) {
                *slot = None;
            }
        }
    }

    /// Whether `to` is reachable from `from` through input edges.
    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = vec![false; self.nodes.len()];
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if std::mem::replace(&mut seen[id.0], true) {
                continue;
            }
            if let Ok(node) = self.node(id) {
                stack.extend(&node.inputs);
            }
        }
        false
    }

    fn live(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|n| (NodeId(i), n)))
    }

    /// Nodes reachable from the results, inputs before consumers.
    pub fn ordered_ops(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut state = vec![0u8; self.nodes.len()];
        for &root in &self.results {
            // Iterative post-order DFS; state 1 = expanded, 2 = emitted.
            let mut stack = vec![(root, false)];
            while let Some((id, expanded)) = stack.pop() {
                if expanded {
                    if state[id.0] != 2 {
                        state[id.0] = 2;
                        order.push(id);
                    }
                    continue;
                }
                if state[id.0] != 0 {
                    continue;
                }
                state[id.0] = 1;
                stack.push((id, true));
                if let Ok(node) = self.node(id) {
                    for &input in node.inputs.iter().rev() {
                        if state[input.0] == 0 {
                            stack.push((input, false));
                        }
                    }
                }
            }
        }
        order
    }

    /// Number of live nodes of `kind` reachable from the results.
    pub fn count_ops(&self, kind: OpKind) -> usize {
        self.ordered_ops()
            .into_iter()
            .filter(|&id| self.kind(id) == Some(kind))
            .count()
    }

    /// Retires nodes no result depends on. Parameters are kept.
    pub fn prune(&mut self) -> usize {
        let mut reachable = vec![false; self.nodes.len()];
        for id in self.ordered_ops() {
            reachable[id.0] = true;
        }
        let mut removed = 0;
        for (index, slot) in self.nodes.iter_mut().enumerate() {
            if slot.is_some() && !reachable[index] && !self.parameters.contains(&NodeId(index)) {
                *slot = None;
                removed += 1;
            }
        }
        removed
    }
}

fn rank4(shape: &[usize]) -> GraphResult<[usize; 4]> {
    shape
        .try_into()
        .map_err(|_| GraphError::ShapeMismatch(format!("expected rank 4, got {shape:?}")))
}
