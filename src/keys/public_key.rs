//! RLWE public key `(b, a)` with `b = -a*s + e`.
use super::{KeyError, KeyResult, SecretKey, validate_error_std};
use crate::rings::{RnsBasis, RnsPoly};
use rand::Rng;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    b: RnsPoly,
    a: RnsPoly,
}

impl PublicKey {
    pub fn generate<R: Rng + ?Sized>(
        secret_key: &SecretKey,
        error_std: f64,
        rng: &mut R,
    ) -> KeyResult<Self> {
        validate_error_std(error_std)?;
        let basis = Arc::clone(secret_key.poly().basis());
        let a = RnsPoly::sample_uniform(Arc::clone(&basis), rng);
        let e = RnsPoly::sample_gaussian(basis, error_std, rng);
        let b = &e - &(&a * secret_key.poly());
        Ok(Self { b, a })
    }

    /// Reassembles a key received from a peer.
    pub fn from_parts(b: RnsPoly, a: RnsPoly) -> KeyResult<Self> {
        if b.basis().primes() != a.basis().primes() {
            return Err(KeyError::ComponentBasisMismatch);
        }
        Ok(Self { b, a })
    }

    pub fn b(&self) -> &RnsPoly {
        &self.b
    }

    pub fn a(&self) -> &RnsPoly {
        &self.a
    }

    pub fn basis(&self) -> &Arc<RnsBasis> {
        self.b.basis()
    }

    /// Both components dropped to `basis`.
    pub fn at_basis(&self, basis: &Arc<RnsBasis>) -> KeyResult<(RnsPoly, RnsPoly)> {
        Ok((self.b.mod_drop_to(basis)?, self.a.mod_drop_to(basis)?))
    }
}
