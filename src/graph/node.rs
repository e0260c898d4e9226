use std::fmt;

/// Stable index of a node in a [`Graph`](super::Graph) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    F32,
    F64,
    I32,
    I64,
}

impl ElementType {
    pub fn is_real(self) -> bool {
        matches!(self, ElementType::F32 | ElementType::F64)
    }

    /// Tag used in session payloads.
    pub fn code(self) -> u8 {
        match self {
            ElementType::F32 => 0,
            ElementType::F64 => 1,
            ElementType::I32 => 2,
            ElementType::I64 => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ElementType::F32),
            1 => Some(ElementType::F64),
            2 => Some(ElementType::I32),
            3 => Some(ElementType::I64),
            _ => None,
        }
    }
}

/// Closed set of operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Parameter,
    Constant,
    Broadcast,
    Add,
    Multiply,
    Dot,
    Convolution,
    AvgPool,
    Relu,
    Minimum,
    BoundedRelu,
    Rescale,
}

impl OpKind {
    /// Kinds whose two operands may be swapped.
    pub fn is_commutative(self) -> bool {
        matches!(self, OpKind::Add | OpKind::Multiply | OpKind::Minimum)
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Operation with its attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Parameter { index: usize },
    /// Row-major values; the node's shape gives their layout.
    Constant { values: Vec<f64> },
    Broadcast,
    Add,
    Multiply,
    /// Contracts the last axis of the first input with the first axis of
    /// the second.
    Dot,
    /// NCHW data, OIHW filter, no padding.
    Convolution { strides: [usize; 2] },
    AvgPool { window: [usize; 2], strides: [usize; 2] },
    Relu,
    Minimum,
    /// `clamp(x, 0, alpha)`.
    BoundedRelu { alpha: f64 },
    Rescale,
}

impl Op {
    pub fn kind(&self) -> OpKind {
        match self {
            Op::Parameter { .. } => OpKind::Parameter,
            Op::Constant { .. } => OpKind::Constant,
            Op::Broadcast => OpKind::Broadcast,
            Op::Add => OpKind::Add,
            Op::Multiply => OpKind::Multiply,
            Op::Dot => OpKind::Dot,
            Op::Convolution { .. } => OpKind::Convolution,
            Op::AvgPool { .. } => OpKind::AvgPool,
            Op::Relu => OpKind::Relu,
            Op::Minimum => OpKind::Minimum,
            Op::BoundedRelu { .. } => OpKind::BoundedRelu,
            Op::Rescale => OpKind::Rescale,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub op: Op,
    pub element_type: ElementType,
    pub shape: Vec<usize>,
    pub inputs: Vec<NodeId>,
    /// Number of outputs. Every operation built through the graph API has
    /// exactly one.
    pub outputs: usize,
}

impl Node {
    pub fn kind(&self) -> OpKind {
        self.op.kind()
    }

    pub fn constant_values(&self) -> Option<&[f64]> {
        match &self.op {
            Op::Constant { values } => Some(values),
            _ => None,
        }
    }
}
