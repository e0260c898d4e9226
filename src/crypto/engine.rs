//! Homomorphic evaluation over the modulus chain.

use super::errors::{check_level, check_scale};
use super::operations::encrypt;
use super::{Ciphertext, CkksContext, CkksError, CkksResult, Plaintext};
use crate::encoding::Packing;
use crate::keys::{PublicKey, RelinearizationKey, SecretKey};
use crate::rings::RnsPoly;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::sync::{Arc, Mutex, PoisonError};

/// The cryptographic capability the graph layer runs on.
///
/// Implementations must be shareable across the rescale worker pool.
pub trait Evaluator: Send + Sync {
    fn context(&self) -> &CkksContext;

    /// Fresh encryption of `lanes` at `scale` and `level`.
    fn encrypt(
        &self,
        lanes: &[f64],
        packing: Packing,
        scale: f64,
        level: usize,
    ) -> CkksResult<Ciphertext>;

    fn add(&self, a: &Ciphertext, b: &Ciphertext) -> CkksResult<Ciphertext>;

    fn add_plain(&self, a: &Ciphertext, p: &Plaintext) -> CkksResult<Ciphertext>;

    /// Ciphertext product, relinearized back to two components.
    fn multiply(&self, a: &Ciphertext, b: &Ciphertext) -> CkksResult<Ciphertext>;

    fn multiply_plain(&self, a: &Ciphertext, p: &Plaintext) -> CkksResult<Ciphertext>;

    /// Divides by the current level's prime and moves one level down.
    fn rescale_to_next(&self, a: &Ciphertext) -> CkksResult<Ciphertext>;

    /// Drops primes down to `level` without touching the scale.
    fn mod_switch_to(&self, a: &Ciphertext, level: usize) -> CkksResult<Ciphertext>;

    fn rescale_modulus(&self, level: usize) -> Option<u64> {
        self.context().rescale_modulus(level)
    }
}

/// Secret, public and relinearization key for one context.
#[derive(Debug, Clone)]
pub struct KeySet {
    pub secret: SecretKey,
    pub public: PublicKey,
    pub relin: RelinearizationKey,
}

impl KeySet {
    pub fn generate<R: Rng + ?Sized>(context: &CkksContext, rng: &mut R) -> CkksResult<Self> {
        let params = context.params();
        let secret = SecretKey::generate(
            Arc::clone(context.top_basis()),
            params.hamming_weight,
            rng,
        )?;
        let public = PublicKey::generate(&secret, params.error_std, rng)?;
        let relin = RelinearizationKey::generate(&secret, params.error_std, rng)?;
        Ok(Self {
            secret,
            public,
            relin,
        })
    }
}

/// Evaluator holding only public material.
pub struct CkksEvaluator {
    context: Arc<CkksContext>,
    public_key: PublicKey,
    relin_key: RelinearizationKey,
    rng: Mutex<ChaCha20Rng>,
}

impl CkksEvaluator {
    pub fn new(
        context: Arc<CkksContext>,
        public_key: PublicKey,
        relin_key: RelinearizationKey,
        seed: u64,
    ) -> CkksResult<Self> {
        let top = context.top_basis();
        if public_key.basis().primes() != top.primes() {
            return Err(CkksError::InvalidParameter {
                message: "public key does not belong to this context".into(),
            });
        }
        if relin_key.digits().len() != top.channel_count() {
            return Err(CkksError::InvalidParameter {
                message: "relinearization key does not belong to this context".into(),
            });
        }
        Ok(Self {
            context,
            public_key,
            relin_key,
            rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
        })
    }

    pub fn shared_context(&self) -> &Arc<CkksContext> {
        &self.context
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn relin_key(&self) -> &RelinearizationKey {
        &self.relin_key
    }

    fn relinearize(
        &self,
        d0: RnsPoly,
        d1: RnsPoly,
        d2: &RnsPoly,
    ) -> CkksResult<(RnsPoly, RnsPoly)> {
        let digits = self.relin_key.digits_at(d2.basis())?;
        let mut c0 = d0;
        let mut c1 = d1;
        for (i, (b, a)) in digits.iter().enumerate() {
            let digit = d2.channel_digit(i);
            c0 = c0.add_checked(&digit.mul_checked(b)?)?;
            c1 = c1.add_checked(&digit.mul_checked(a)?)?;
        }
        Ok((c0, c1))
    }
}

impl Evaluator for CkksEvaluator {
    fn context(&self) -> &CkksContext {
        &self.context
    }

    fn encrypt(
        &self,
        lanes: &[f64],
        packing: Packing,
        scale: f64,
        level: usize,
    ) -> CkksResult<Ciphertext> {
        let plaintext = self.context.encode(lanes, packing, scale, level)?;
        // A poisoned lock only means another encryption panicked; the RNG
        // state is still valid.
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        encrypt(&plaintext, &self.public_key, &self.context, &mut *rng)
    }

    fn add(&self, a: &Ciphertext, b: &Ciphertext) -> CkksResult<Ciphertext> {
        check_level(a.level, b.level)?;
        check_scale(a.scale, b.scale)?;
        let (long, short) = if a.size() >= b.size() { (a, b) } else { (b, a) };
        let mut components = long.components.clone();
        for (acc, c) in components.iter_mut().zip(&short.components) {
            *acc = acc.add_checked(c)?;
        }
        Ok(Ciphertext {
            components,
            scale: a.scale,
            level: a.level,
        })
    }

    fn add_plain(&self, a: &Ciphertext, p: &Plaintext) -> CkksResult<Ciphertext> {
        check_level(a.level, p.level)?;
        check_scale(a.scale, p.scale)?;
        let mut components = a.components.clone();
        components[0] = components[0].add_checked(&p.poly)?;
        Ok(Ciphertext {
            components,
            scale: a.scale,
            level: a.level,
        })
    }

    fn multiply(&self, a: &Ciphertext, b: &Ciphertext) -> CkksResult<Ciphertext> {
        check_level(a.level, b.level)?;
        check_scale(a.scale, b.scale)?;
        let ([a0, a1], [b0, b1]) = (a.components.as_slice(), b.components.as_slice()) else {
            return Err(CkksError::UnsupportedSize(a.size().max(b.size())));
        };
        let d0 = a0.mul_checked(b0)?;
        let d1 = a0.mul_checked(b1)?.add_checked(&a1.mul_checked(b0)?)?;
        let d2 = a1.mul_checked(b1)?;
        let (c0, c1) = self.relinearize(d0, d1, &d2)?;
        Ok(Ciphertext {
            components: vec![c0, c1],
            scale: a.scale * b.scale,
            level: a.level,
        })
    }

    fn multiply_plain(&self, a: &Ciphertext, p: &Plaintext) -> CkksResult<Ciphertext> {
        check_level(a.level, p.level)?;
        let components = a
            .components
            .iter()
            .map(|c| c.mul_checked(&p.poly))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Ciphertext {
            components,
            scale: a.scale * p.scale,
            level: a.level,
        })
    }

    fn rescale_to_next(&self, a: &Ciphertext) -> CkksResult<Ciphertext> {
        let q = self
            .context
            .rescale_modulus(a.level)
            .ok_or(CkksError::ModulusChainExhausted)?;
        let target = self.context.basis(a.level - 1)?;
        let components = a
            .components
            .iter()
            .map(|c| c.rescale_by_last(target))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Ciphertext {
            components,
            scale: a.scale / q as f64,
            level: a.level - 1,
        })
    }

    fn mod_switch_to(&self, a: &Ciphertext, level: usize) -> CkksResult<Ciphertext> {
        if level > a.level {
            return Err(CkksError::LevelMismatch {
                expected: a.level,
                actual: level,
            });
        }
        let target = self.context.basis(level)?;
        let components = a
            .components
            .iter()
            .map(|c| c.mod_drop_to(target))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Ciphertext {
            components,
            scale: a.scale,
            level,
        })
    }
}
