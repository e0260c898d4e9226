use super::{ExecError, ExecResult, HeTensor, LocalOracle, NonlinearOracle};
use crate::config::BackendConfig;
use crate::crypto::{CkksContext, CkksEvaluator, CkksParams, Evaluator, KeySet};
use crate::graph::{ElementType, Graph, Node, NodeId, Op, OpKind};
use crate::handle::{CiphertextHandle, HeValue, Packing, PlaintextHandle};
use crate::kernel::{
    self, NonlinearOp, avg_pool, broadcast, convolution, dot, elementwise, nonlinear_plain,
    rescale_values,
};
use crate::keys::{PublicKey, RelinearizationKey, SecretKey};
use crate::pass::PassManager;
use fnv::FnvHashMap;
use log::{debug, info};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::sync::Arc;

/// A graph that went through the HE pass pipeline.
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    graph: Graph,
    rounds: usize,
}

impl CompiledGraph {
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Pipeline rounds that changed the graph.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn count_ops(&self, kind: OpKind) -> usize {
        self.graph.count_ops(kind)
    }
}

/// Executes graphs homomorphically under one CKKS context.
pub struct HeBackend {
    evaluator: CkksEvaluator,
    secret_key: Option<SecretKey>,
    config: BackendConfig,
}

impl HeBackend {
    /// Backend with locally generated keys, seeded from `config.seed`.
    pub fn new(params: CkksParams, config: BackendConfig) -> ExecResult<Self> {
        let context = Arc::new(CkksContext::new(params)?);
        let mut rng = ChaCha20Rng::seed_from_u64(config.seed);
        let keys = KeySet::generate(&context, &mut rng)?;
        let evaluator =
            CkksEvaluator::new(context, keys.public, keys.relin, config.seed.wrapping_add(1))?;
        Ok(Self {
            evaluator,
            secret_key: Some(keys.secret),
            config,
        })
    }

    /// Backend holding only a peer's public material.
    pub fn from_keys(
        context: Arc<CkksContext>,
        public_key: PublicKey,
        relin_key: RelinearizationKey,
        config: BackendConfig,
    ) -> ExecResult<Self> {
        let evaluator = CkksEvaluator::new(context, public_key, relin_key, config.seed)?;
        Ok(Self {
            evaluator,
            secret_key: None,
            config,
        })
    }

    pub fn context(&self) -> &CkksContext {
        self.evaluator.context()
    }

    pub fn shared_context(&self) -> &Arc<CkksContext> {
        self.evaluator.shared_context()
    }

    pub fn evaluator(&self) -> &dyn Evaluator {
        &self.evaluator
    }

    pub fn packing(&self) -> Packing {
        self.config.packing()
    }

    pub fn secret_key(&self) -> Option<&SecretKey> {
        self.secret_key.as_ref()
    }

    /// Runs fusion, rescale insertion and rescale merging to a fixpoint.
    pub fn compile(&self, mut graph: Graph) -> ExecResult<CompiledGraph> {
        let rounds = PassManager::he_pipeline().run(&mut graph)?;
        info!(
            "compiled graph in {rounds} rounds: {} rescales, {} bounded relus",
            graph.count_ops(OpKind::Rescale),
            graph.count_ops(OpKind::BoundedRelu)
        );
        Ok(CompiledGraph { graph, rounds })
    }

    pub fn create_plain_tensor(
        &self,
        element_type: ElementType,
        shape: Vec<usize>,
        batch_size: usize,
        data: &[f64],
    ) -> ExecResult<HeTensor> {
        HeTensor::plain(element_type, shape, batch_size, data)
    }

    pub fn create_cipher_tensor(
        &self,
        element_type: ElementType,
        shape: Vec<usize>,
        batch_size: usize,
        data: &[f64],
    ) -> ExecResult<HeTensor> {
        HeTensor::encrypt(
            element_type,
            shape,
            batch_size,
            data,
            self.packing(),
            &self.evaluator,
        )
    }

    pub fn read_tensor(&self, tensor: &HeTensor) -> ExecResult<Vec<f64>> {
        tensor.decrypt(self.secret_key.as_ref(), self.context())
    }

    /// Evaluates with this backend's own secret key for nonlinear nodes.
    pub fn call_local(
        &self,
        compiled: &CompiledGraph,
        inputs: &[HeTensor],
    ) -> ExecResult<Vec<HeTensor>> {
        let secret_key = self.secret_key.as_ref().ok_or(ExecError::MissingSecretKey)?;
        let mut oracle = LocalOracle::new(secret_key, &self.evaluator);
        self.call(compiled, inputs, &mut oracle)
    }

    pub fn call(
        &self,
        compiled: &CompiledGraph,
        inputs: &[HeTensor],
        oracle: &mut dyn NonlinearOracle,
    ) -> ExecResult<Vec<HeTensor>> {
        let graph = &compiled.graph;
        if inputs.len() != graph.parameters().len() {
            return Err(ExecError::InputCount {
                expected: graph.parameters().len(),
                got: inputs.len(),
            });
        }
        let mut values: FnvHashMap<NodeId, HeTensor> = FnvHashMap::default();
        for id in graph.ordered_ops() {
            let node = graph.node(id)?;
            debug!("evaluating {id} ({})", node.kind());
            let tensor = self.evaluate_node(node, &values, inputs, oracle)?;
            values.insert(id, tensor);
        }
        graph
            .results()
            .iter()
            .map(|id| values.get(id).cloned().ok_or(ExecError::MissingValue(*id)))
            .collect()
    }

    fn evaluate_node(
        &self,
        node: &Node,
        values: &FnvHashMap<NodeId, HeTensor>,
        inputs: &[HeTensor],
        oracle: &mut dyn NonlinearOracle,
    ) -> ExecResult<HeTensor> {
        let arg = |i: usize| input_value(node, values, i);
        let ev: &dyn Evaluator = &self.evaluator;
        let (batch, out) = match &node.op {
            Op::Parameter { index } => return self.bind_parameter(node, *index, inputs),
            Op::Constant { values } => {
                let out = values
                    .iter()
                    .map(|&v| HeValue::Plain(PlaintextHandle::scalar(v)))
                    .collect();
                (1, out)
            }
            Op::Broadcast => {
                let x = arg(0)?;
                let b = x.batch_size();
                let out_packed = HeTensor::packed_shape_of(&node.shape, b)?;
                (b, broadcast(x.values(), &x.packed_shape(), &out_packed)?)
            }
            Op::Add => binary(arg(0)?, arg(1)?, kernel::add, ev)?,
            Op::Multiply => binary(arg(0)?, arg(1)?, kernel::multiply, ev)?,
            Op::Minimum => {
                let (a, b) = (arg(0)?, arg(1)?);
                if a.is_encrypted() || b.is_encrypted() {
                    return Err(ExecError::UnsupportedOnCipher(OpKind::Minimum));
                }
                binary(a, b, plain_minimum, ev)?
            }
            Op::Dot => {
                let (a, b) = (arg(0)?, arg(1)?);
                let batch = leading_batch(a, b)?;
                let out = dot(a.values(), &a.packed_shape(), b.values(), b.shape(), ev)?;
                (batch, out)
            }
            Op::Convolution { strides } => {
                let (data, filter) = (arg(0)?, arg(1)?);
                let batch = leading_batch(data, filter)?;
                let out = convolution(
                    data.values(),
                    &data.packed_shape(),
                    filter.values(),
                    filter.shape(),
                    *strides,
                    ev,
                )?;
                (batch, out)
            }
            Op::AvgPool { window, strides } => {
                let x = arg(0)?;
                let out = avg_pool(x.values(), &x.packed_shape(), *window, *strides, ev)?;
                (x.batch_size(), out)
            }
            Op::Relu => {
                let x = arg(0)?;
                (x.batch_size(), self.nonlinear(x, NonlinearOp::Relu, oracle)?)
            }
            Op::BoundedRelu { alpha } => {
                let x = arg(0)?;
                let op = NonlinearOp::BoundedRelu { alpha: *alpha };
                (x.batch_size(), self.nonlinear(x, op, oracle)?)
            }
            Op::Rescale => {
                let x = arg(0)?;
                (x.batch_size(), rescale_values(x.values(), ev)?)
            }
        };
        HeTensor::new(node.element_type, node.shape.clone(), batch, out)
    }

    fn bind_parameter(&self, node: &Node, index: usize, inputs: &[HeTensor]) -> ExecResult<HeTensor> {
        let input = inputs.get(index).ok_or(ExecError::InputCount {
            expected: index + 1,
            got: inputs.len(),
        })?;
        if input.element_type() != node.element_type || input.shape() != node.shape {
            return Err(ExecError::InputMismatch {
                index,
                expected_type: node.element_type,
                expected: node.shape.clone(),
                got_type: input.element_type(),
                got: input.shape().to_vec(),
            });
        }
        Ok(input.clone())
    }

    /// Plaintext elements are evaluated directly; ciphertext elements go to
    /// the oracle in one request.
    fn nonlinear(
        &self,
        x: &HeTensor,
        op: NonlinearOp,
        oracle: &mut dyn NonlinearOracle,
    ) -> ExecResult<Vec<HeValue>> {
        let handles: Vec<CiphertextHandle> = x
            .values()
            .iter()
            .filter_map(|v| match v {
                HeValue::Cipher(c) => Some(c.clone()),
                HeValue::Plain(_) => None,
            })
            .collect();
        let response = if handles.is_empty() {
            Vec::new()
        } else {
            oracle.evaluate(op, x.batch_size(), &handles)?
        };
        let (expected, got) = (handles.len(), response.len());
        if got != expected {
            return Err(ExecError::ResponseLength { expected, got });
        }
        let mut response = response.into_iter();
        x.values()
            .iter()
            .map(|v| match v {
                HeValue::Plain(p) => Ok(HeValue::Plain(nonlinear_plain(p, op))),
                HeValue::Cipher(_) => response
                    .next()
                    .map(HeValue::Cipher)
                    .ok_or(ExecError::ResponseLength { expected, got }),
            })
            .collect()
    }
}

fn input_value<'a>(
    node: &Node,
    values: &'a FnvHashMap<NodeId, HeTensor>,
    i: usize,
) -> ExecResult<&'a HeTensor> {
    let id = node.inputs[i];
    values.get(&id).ok_or(ExecError::MissingValue(id))
}

type ElementKernel = fn(&HeValue, &HeValue, &dyn Evaluator) -> kernel::KernelResult<HeValue>;

fn binary(
    a: &HeTensor,
    b: &HeTensor,
    kernel: ElementKernel,
    ev: &dyn Evaluator,
) -> ExecResult<(usize, Vec<HeValue>)> {
    if a.batch_size() != b.batch_size() {
        return Err(ExecError::Batch(format!(
            "operands batched {} and {}",
            a.batch_size(),
            b.batch_size()
        )));
    }
    Ok((a.batch_size(), elementwise(a.values(), b.values(), kernel, ev)?))
}

/// Only the first operand of a contraction may be batched.
fn leading_batch(a: &HeTensor, b: &HeTensor) -> ExecResult<usize> {
    if b.batch_size() != 1 {
        return Err(ExecError::Batch(format!(
            "second operand batched {}",
            b.batch_size()
        )));
    }
    Ok(a.batch_size())
}

fn plain_minimum(a: &HeValue, b: &HeValue, _: &dyn Evaluator) -> kernel::KernelResult<HeValue> {
    match (a, b) {
        (HeValue::Plain(x), HeValue::Plain(y)) => Ok(HeValue::Plain(x.zip_with(y, f64::min))),
        _ => Err(kernel::KernelError::ShapeMismatch(
            "minimum needs plaintext operands".into(),
        )),
    }
}
