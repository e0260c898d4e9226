//! Public-key encryption and secret-key decryption.
use super::{Ciphertext, CkksContext, CkksResult, Plaintext};
use crate::keys::{PublicKey, SecretKey};
use crate::rings::RnsPoly;
use rand::Rng;
use std::sync::Arc;

/// Encrypts `plaintext` at its own level:
/// `c0 = b*u + e0 + m`, `c1 = a*u + e1` with `(b, a)` dropped to that level.
pub fn encrypt<R: Rng + ?Sized>(
    plaintext: &Plaintext,
    public_key: &PublicKey,
    context: &CkksContext,
    rng: &mut R,
) -> CkksResult<Ciphertext> {
    let basis = context.basis(plaintext.level)?;
    let params = context.params();
    let (b, a) = public_key.at_basis(basis)?;

    let u = RnsPoly::sample_ternary(Arc::clone(basis), params.hamming_weight, rng);
    let e0 = RnsPoly::sample_gaussian(Arc::clone(basis), params.error_std, rng);
    let e1 = RnsPoly::sample_gaussian(Arc::clone(basis), params.error_std, rng);

    let c0 = (&b * &u).add_checked(&e0)?.add_checked(&plaintext.poly)?;
    let c1 = (&a * &u).add_checked(&e1)?;
    Ok(Ciphertext {
        components: vec![c0, c1],
        scale: plaintext.scale,
        level: plaintext.level,
    })
}

/// Evaluates `sum_i c_i * s^i` by Horner's rule.
pub fn decrypt(ciphertext: &Ciphertext, secret_key: &SecretKey) -> CkksResult<Plaintext> {
    let Some(first) = ciphertext.components.first() else {
        return Err(super::CkksError::UnsupportedSize(0));
    };
    let s = secret_key.at_basis(first.basis())?;
    let mut acc = RnsPoly::zero(Arc::clone(first.basis()));
    for component in ciphertext.components.iter().rev() {
        acc = acc.mul_checked(&s)?.add_checked(component)?;
    }
    Ok(Plaintext {
        poly: acc,
        scale: ciphertext.scale,
        level: ciphertext.level,
    })
}
