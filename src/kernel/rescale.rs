use super::{KernelError, KernelResult};
use crate::crypto::{CkksError, Evaluator};
use crate::handle::{CipherState, CiphertextHandle, HeValue, PlaintextHandle};
use rayon::prelude::*;

/// Rescales one handle. A zero handle only has its bookkeeping updated.
pub fn rescale_handle(
    handle: &CiphertextHandle,
    evaluator: &dyn Evaluator,
) -> KernelResult<CiphertextHandle> {
    match handle.state() {
        CipherState::Zero { scale, level } => {
            let q = evaluator
                .rescale_modulus(*level)
                .ok_or(CkksError::ModulusChainExhausted)?;
            Ok(CiphertextHandle::zero(
                handle.packing(),
                scale / q as f64,
                level - 1,
            ))
        }
        CipherState::Encrypted(ct) => Ok(CiphertextHandle::encrypted(
            evaluator.rescale_to_next(ct)?,
            handle.packing(),
        )),
    }
}

/// `out[i] = rescale(arg[i])`, elements processed on the rayon pool.
pub fn rescale_ciphertexts(
    arg: &[CiphertextHandle],
    out: &mut [CiphertextHandle],
    evaluator: &dyn Evaluator,
) -> KernelResult<()> {
    if arg.len() != out.len() {
        return Err(KernelError::LengthMismatch {
            arg: arg.len(),
            out: out.len(),
        });
    }
    arg.par_iter()
        .zip(out.par_iter_mut())
        .try_for_each(|(a, o)| {
            *o = rescale_handle(a, evaluator)?;
            Ok(())
        })
}

/// Plaintexts carry no scale, so rescaling copies.
pub fn rescale_plaintexts(arg: &[PlaintextHandle], out: &mut [PlaintextHandle]) -> KernelResult<()> {
    if arg.len() != out.len() {
        return Err(KernelError::LengthMismatch {
            arg: arg.len(),
            out: out.len(),
        });
    }
    out.clone_from_slice(arg);
    Ok(())
}

/// Rescale over tensor elements of either kind.
pub fn rescale_values(arg: &[HeValue], evaluator: &dyn Evaluator) -> KernelResult<Vec<HeValue>> {
    arg.par_iter()
        .map(|value| match value {
            HeValue::Plain(p) => Ok(HeValue::Plain(p.clone())),
            HeValue::Cipher(c) => rescale_handle(c, evaluator).map(HeValue::Cipher),
        })
        .collect()
}
