use super::{KernelError, KernelResult};
use crate::crypto::{CkksError, Evaluator, errors::scales_match};
use crate::handle::{CipherState, CiphertextHandle, HeValue, Packing, PlaintextHandle};

/// Scale a plaintext multiplier is encoded at for a ciphertext at `level`.
///
/// Using the prime the next rescale divides out makes multiply-then-rescale
/// return the ciphertext to its original scale.
pub fn plain_scale(evaluator: &dyn Evaluator, level: usize) -> f64 {
    evaluator
        .rescale_modulus(level)
        .map_or_else(|| evaluator.context().default_scale(), |q| q as f64)
}

fn check_operands(a: &CiphertextHandle, b: &CiphertextHandle) -> KernelResult<()> {
    if a.packing() != b.packing() {
        return Err(KernelError::PackingMismatch {
            left: a.packing(),
            right: b.packing(),
        });
    }
    if a.level() != b.level() {
        return Err(CkksError::LevelMismatch {
            expected: a.level(),
            actual: b.level(),
        }
        .into());
    }
    if !scales_match(a.scale(), b.scale()) {
        return Err(CkksError::ScaleMismatch {
            expected: a.scale(),
            actual: b.scale(),
        }
        .into());
    }
    Ok(())
}

pub fn add(a: &HeValue, b: &HeValue, evaluator: &dyn Evaluator) -> KernelResult<HeValue> {
    match (a, b) {
        (HeValue::Plain(x), HeValue::Plain(y)) => Ok(HeValue::Plain(x.zip_with(y, |p, q| p + q))),
        (HeValue::Cipher(c), HeValue::Plain(p)) | (HeValue::Plain(p), HeValue::Cipher(c)) => {
            add_plain(c, p, evaluator).map(HeValue::Cipher)
        }
        (HeValue::Cipher(x), HeValue::Cipher(y)) => {
            check_operands(x, y)?;
            let sum = match (x.state(), y.state()) {
                (CipherState::Zero { .. }, _) => y.clone(),
                (_, CipherState::Zero { .. }) => x.clone(),
                (CipherState::Encrypted(l), CipherState::Encrypted(r)) => {
                    CiphertextHandle::encrypted(evaluator.add(l, r)?, x.packing())
                }
            };
            Ok(HeValue::Cipher(sum))
        }
    }
}

fn add_plain(
    c: &CiphertextHandle,
    p: &PlaintextHandle,
    evaluator: &dyn Evaluator,
) -> KernelResult<CiphertextHandle> {
    if p.is_all_zero() {
        return Ok(c.clone());
    }
    let ct = match c.state() {
        CipherState::Zero { scale, level } => {
            evaluator.encrypt(p.values(), c.packing(), *scale, *level)?
        }
        CipherState::Encrypted(ct) => {
            let encoded = evaluator
                .context()
                .encode(p.values(), c.packing(), ct.scale, ct.level)?;
            evaluator.add_plain(ct, &encoded)?
        }
    };
    Ok(CiphertextHandle::encrypted(ct, c.packing()))
}

pub fn multiply(a: &HeValue, b: &HeValue, evaluator: &dyn Evaluator) -> KernelResult<HeValue> {
    match (a, b) {
        (HeValue::Plain(x), HeValue::Plain(y)) => Ok(HeValue::Plain(x.zip_with(y, |p, q| p * q))),
        (HeValue::Cipher(c), HeValue::Plain(p)) | (HeValue::Plain(p), HeValue::Cipher(c)) => {
            multiply_plain(c, p, evaluator).map(HeValue::Cipher)
        }
        (HeValue::Cipher(x), HeValue::Cipher(y)) => {
            if x.packing().is_complex() || y.packing().is_complex() {
                return Err(KernelError::UnsupportedPacking {
                    packing: Packing::Complex,
                    operation: "ciphertext-ciphertext multiply",
                });
            }
            check_operands(x, y)?;
            let product = match (x.state(), y.state()) {
                (CipherState::Encrypted(l), CipherState::Encrypted(r)) => {
                    CiphertextHandle::encrypted(evaluator.multiply(l, r)?, x.packing())
                }
                _ => CiphertextHandle::zero(x.packing(), x.scale() * y.scale(), x.level()),
            };
            Ok(HeValue::Cipher(product))
        }
    }
}

fn multiply_plain(
    c: &CiphertextHandle,
    p: &PlaintextHandle,
    evaluator: &dyn Evaluator,
) -> KernelResult<CiphertextHandle> {
    let level = c.level();
    let p_scale = plain_scale(evaluator, level);
    let ct = match c.state() {
        CipherState::Encrypted(ct) if !p.is_all_zero() => ct,
        _ => return Ok(CiphertextHandle::zero(c.packing(), c.scale() * p_scale, level)),
    };
    let encoded = match c.packing() {
        Packing::Real => evaluator.context().encode(p.values(), Packing::Real, p_scale, level)?,
        // (a + ib) * r only separates lanes when r is real and shared by both.
        Packing::Complex => {
            let r = p.uniform_value().ok_or(KernelError::UnsupportedPacking {
                packing: Packing::Complex,
                operation: "multiply by a non-uniform plaintext",
            })?;
            evaluator.context().encode(&[r], Packing::Real, p_scale, level)?
        }
    };
    Ok(CiphertextHandle::encrypted(
        evaluator.multiply_plain(ct, &encoded)?,
        c.packing(),
    ))
}
