//! Secret key: a sparse ternary polynomial `s` over the top-level basis.
use super::{KeyError, KeyResult};
use crate::rings::{RnsBasis, RnsPoly};
use rand::Rng;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SecretKey {
    s: RnsPoly,
}

impl SecretKey {
    /// Samples `s` with exactly `hamming_weight` nonzero coefficients.
    pub fn generate<R: Rng + ?Sized>(
        basis: Arc<RnsBasis>,
        hamming_weight: usize,
        rng: &mut R,
    ) -> KeyResult<Self> {
        if hamming_weight > basis.degree() {
            return Err(KeyError::InvalidHammingWeight(
                hamming_weight,
                basis.degree(),
            ));
        }
        Ok(Self {
            s: RnsPoly::sample_ternary(basis, hamming_weight, rng),
        })
    }

    pub fn poly(&self) -> &RnsPoly {
        &self.s
    }

    /// `s` restricted to a lower level of the chain.
    pub fn at_basis(&self, basis: &Arc<RnsBasis>) -> KeyResult<RnsPoly> {
        Ok(self.s.mod_drop_to(basis)?)
    }
}
