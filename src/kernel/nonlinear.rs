//! The ReLU family. Plaintext elements are evaluated in place; ciphertext
//! elements can only be evaluated by the secret-key holder.

use super::KernelResult;
use crate::crypto::{Evaluator, decrypt};
use crate::handle::{CipherState, CiphertextHandle, PlaintextHandle};
use crate::keys::SecretKey;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NonlinearOp {
    Relu,
    /// `min(max(x, 0), alpha)`
    BoundedRelu { alpha: f64 },
}

impl NonlinearOp {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            NonlinearOp::Relu => x.max(0.0),
            NonlinearOp::BoundedRelu { alpha } => x.max(0.0).min(alpha),
        }
    }
}

impl fmt::Display for NonlinearOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NonlinearOp::Relu => write!(f, "Relu"),
            NonlinearOp::BoundedRelu { alpha } => write!(f, "BoundedRelu({alpha})"),
        }
    }
}

pub fn nonlinear_plain(value: &PlaintextHandle, op: NonlinearOp) -> PlaintextHandle {
    value.map(|x| op.apply(x))
}

/// Decrypts `handle`, applies `op` to its first `lanes` lanes and encrypts
/// the result afresh at the handle's scale and level.
///
/// A zero handle stays zero when `op(0) == 0`.
pub fn nonlinear_with_key(
    handle: &CiphertextHandle,
    op: NonlinearOp,
    lanes: usize,
    secret_key: &SecretKey,
    evaluator: &dyn Evaluator,
) -> KernelResult<CiphertextHandle> {
    let packing = handle.packing();
    let values = match handle.state() {
        CipherState::Zero { .. } if op.apply(0.0) == 0.0 => return Ok(handle.clone()),
        CipherState::Zero { .. } => vec![0.0; lanes],
        CipherState::Encrypted(ct) => {
            let pt = decrypt(ct, secret_key)?;
            evaluator.context().decode(&pt, packing, lanes)?
        }
    };
    let out: Vec<f64> = values.into_iter().map(|x| op.apply(x)).collect();
    let ct = evaluator.encrypt(&out, packing, handle.scale(), handle.level())?;
    Ok(CiphertextHandle::encrypted(ct, packing))
}
