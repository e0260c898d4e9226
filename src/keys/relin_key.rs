//! Relinearization key with one RLWE sample per RNS channel.
//!
//! Digit `i` encrypts `s^2` masked to channel `i`:
//! `b_i = -a_i*s + e_i + g_i*s^2` where `g_i = 1 mod q_i` and `0 mod q_j`
//! for `j != i`. Splitting `d2` into its centered channel digits `D_i` then
//! gives `sum_i D_i*(b_i + a_i*s) = d2*s^2 + sum_i D_i*e_i`.
//!
//! Keys are generated at the top level. A ciphertext at level `l` uses
//! digits `0..=l` with trailing channels dropped.
use super::{KeyError, KeyResult, SecretKey, validate_error_std};
use crate::rings::{RnsBasis, RnsPoly};
use rand::Rng;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelinearizationKey {
    /// `(b_i, a_i)` per channel of the top-level basis.
    digits: Vec<(RnsPoly, RnsPoly)>,
}

impl RelinearizationKey {
    pub fn generate<R: Rng + ?Sized>(
        secret_key: &SecretKey,
        error_std: f64,
        rng: &mut R,
    ) -> KeyResult<Self> {
        validate_error_std(error_std)?;
        let s = secret_key.poly();
        let basis = Arc::clone(s.basis());
        let s_squared = s * s;

        let digits = (0..basis.channel_count())
            .map(|i| {
                let masked: Vec<Vec<u64>> = s_squared
                    .channels()
                    .iter()
                    .enumerate()
                    .map(|(j, ch)| {
                        if i == j {
                            ch.clone()
                        } else {
                            vec![0; ch.len()]
                        }
                    })
                    .collect();
                let masked = RnsPoly::from_channels(masked, Arc::clone(&basis))?;
                let a = RnsPoly::sample_uniform(Arc::clone(&basis), rng);
                let e = RnsPoly::sample_gaussian(Arc::clone(&basis), error_std, rng);
                let b = &(&e - &(&a * s)) + &masked;
                Ok((b, a))
            })
            .collect::<KeyResult<Vec<_>>>()?;
        Ok(Self { digits })
    }

    /// Reassembles a key received from a peer.
    pub fn from_digits(digits: Vec<(RnsPoly, RnsPoly)>) -> KeyResult<Self> {
        let Some((first, _)) = digits.first() else {
            return Err(KeyError::DigitCountMismatch {
                expected: 1,
                got: 0,
            });
        };
        let basis = Arc::clone(first.basis());
        if digits.len() != basis.channel_count() {
            return Err(KeyError::DigitCountMismatch {
                expected: basis.channel_count(),
                got: digits.len(),
            });
        }
        for (b, a) in &digits {
            if b.basis().primes() != basis.primes() || a.basis().primes() != basis.primes() {
                return Err(KeyError::ComponentBasisMismatch);
            }
        }
        Ok(Self { digits })
    }

    pub fn digits(&self) -> &[(RnsPoly, RnsPoly)] {
        &self.digits
    }

    /// Digits `0..basis.channel_count()` dropped to `basis`.
    pub fn digits_at(&self, basis: &Arc<RnsBasis>) -> KeyResult<Vec<(RnsPoly, RnsPoly)>> {
        let count = basis.channel_count();
        if count > self.digits.len() {
            return Err(KeyError::DigitCountMismatch {
                expected: count,
                got: self.digits.len(),
            });
        }
        self.digits[..count]
            .iter()
            .map(|(b, a)| Ok((b.mod_drop_to(basis)?, a.mod_drop_to(basis)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rings::RnsBasisBuilder;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn basis() -> Arc<RnsBasis> {
        RnsBasisBuilder::new(16)
            .with_custom_primes(vec![97, 193, 257])
            .build_shared()
            .unwrap()
    }

    #[test]
    fn digit_decryption_is_masked_square() {
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let sk = SecretKey::generate(basis(), 8, &mut rng).unwrap();
        let rk = RelinearizationKey::generate(&sk, 0.5, &mut rng).unwrap();
        let s = sk.poly();
        let s2 = s * s;
        for (i, (b, a)) in rk.digits().iter().enumerate() {
            // b + a*s - e = masked s^2; check the error is small in channel j != i.
            let dec = b + &(a * s);
            for (j, (ch, &q)) in dec.channels().iter().zip(s.basis().primes()).enumerate() {
                for (k, &c) in ch.iter().enumerate() {
                    let expected = if i == j { s2.channels()[j][k] } else { 0 };
                    let diff = crate::math::center((c + q - expected) % q, q);
                    assert!(diff.abs() <= 4, "digit {i} channel {j} noise {diff}");
                }
            }
        }
    }

    #[test]
    fn from_digits_checks_count() {
        let mut rng = ChaCha20Rng::seed_from_u64(12);
        let sk = SecretKey::generate(basis(), 8, &mut rng).unwrap();
        let rk = RelinearizationKey::generate(&sk, 1.0, &mut rng).unwrap();
        let mut digits = rk.digits().to_vec();
        digits.pop();
        assert_eq!(
            RelinearizationKey::from_digits(digits),
            Err(KeyError::DigitCountMismatch {
                expected: 3,
                got: 2
            })
        );
        let low = Arc::new(basis().prefix(2).unwrap());
        assert_eq!(rk.digits_at(&low).unwrap().len(), 2);
    }

    #[test]
    fn secret_key_rejects_heavy_weight() {
        let mut rng = ChaCha20Rng::seed_from_u64(13);
        assert_eq!(
            SecretKey::generate(basis(), 17, &mut rng).unwrap_err(),
            KeyError::InvalidHammingWeight(17, 16)
        );
    }
}
