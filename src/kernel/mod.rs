//! Per-element kernels over handles. Ciphertext work goes through an
//! [`Evaluator`](crate::crypto::Evaluator); formally-zero ciphertexts are
//! resolved here without touching it.
mod arith;
mod nonlinear;
mod rescale;
mod tensor;

pub use arith::{add, multiply, plain_scale};
pub use nonlinear::{NonlinearOp, nonlinear_plain, nonlinear_with_key};
pub use rescale::{rescale_ciphertexts, rescale_handle, rescale_plaintexts, rescale_values};
pub use tensor::{
    avg_pool, broadcast, checked_shape_size, convolution, dot, elementwise, shape_size,
    window_shape,
};

use crate::crypto::CkksError;
use crate::handle::Packing;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    #[error("Length mismatch: argument has {arg} elements, output has {out}")]
    LengthMismatch { arg: usize, out: usize },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Packing mismatch: {left} vs {right}")]
    PackingMismatch { left: Packing, right: Packing },

    #[error("Unsupported under {packing} packing: {operation}")]
    UnsupportedPacking {
        packing: Packing,
        operation: &'static str,
    },

    #[error(transparent)]
    Ckks(#[from] CkksError),
}

pub type KernelResult<T> = Result<T, KernelError>;
