//! Polynomials in `Z[X]/(X^n + 1)` stored as one residue channel per prime.

use super::basis::{RingError, RingResult, RnsBasis};
use crate::math::{
    center, gaussian_coefficients, mod_inverse, mul_mod, reduce_signed,
    ternary_coefficients, uniform_residues,
};
use rand::Rng;
use std::ops::{Add, Mul, Neg, Sub};
use std::sync::Arc;

/// RNS-encoded element of the negacyclic ring.
#[derive(Debug, Clone)]
pub struct RnsPoly {
    /// channels[c][i] = i-th coefficient residue mod basis.primes()[c]
    channels: Vec<Vec<u64>>,
    basis: Arc<RnsBasis>,
}

fn same_basis(a: &Arc<RnsBasis>, b: &Arc<RnsBasis>) -> bool {
    Arc::ptr_eq(a, b) || a.primes() == b.primes() && a.degree() == b.degree()
}

impl PartialEq for RnsPoly {
    fn eq(&self, other: &Self) -> bool {
        same_basis(&self.basis, &other.basis) && self.channels == other.channels
    }
}

impl Eq for RnsPoly {}

impl RnsPoly {
    pub fn zero(basis: Arc<RnsBasis>) -> Self {
        let channels = vec![vec![0; basis.degree()]; basis.channel_count()];
        Self { channels, basis }
    }

    /// Builds a polynomial from residue channels, checking their shape and
    /// that every residue is below its prime.
    pub fn from_channels(
        channels: Vec<Vec<u64>>,
        basis: Arc<RnsBasis>,
    ) -> RingResult<Self> {
        if channels.len() != basis.channel_count() {
            return Err(RingError::InvalidPrimeCount(channels.len()));
        }
        for (channel, &q) in channels.iter().zip(basis.primes()) {
            if channel.len() != basis.degree() {
                return Err(RingError::InvalidDegree(channel.len()));
            }
            if let Some(&bad) = channel.iter().find(|&&c| c >= q) {
                return Err(RingError::InvalidPrime(bad));
            }
        }
        Ok(Self { channels, basis })
    }

    pub fn from_signed_coeffs(coeffs: &[i64], basis: Arc<RnsBasis>) -> Self {
        assert_eq!(coeffs.len(), basis.degree(), "coefficient count must match degree");
        let channels = basis
            .primes()
            .iter()
            .map(|&q| coeffs.iter().map(|&c| reduce_signed(c, q)).collect())
            .collect();
        Self { channels, basis }
    }

    /// Reduces already-rounded real coefficients into every channel.
    ///
    /// Values beyond the `i64` range (high-scale plaintexts) are reduced
    /// through an exact floating-point remainder.
    pub fn from_rounded_f64(coeffs: &[f64], basis: Arc<RnsBasis>) -> Self {
        assert_eq!(coeffs.len(), basis.degree(), "coefficient count must match degree");
        let channels = basis
            .primes()
            .iter()
            .map(|&q| {
                coeffs
                    .iter()
                    .map(|&c| {
                        if c.abs() < 9.0e18 {
                            reduce_signed(c as i64, q)
                        } else {
                            let r = c.rem_euclid(q as f64) as u64;
                            r.min(q - 1)
                        }
                    })
                    .collect()
            })
            .collect();
        Self { channels, basis }
    }

    pub fn sample_uniform<R: Rng + ?Sized>(basis: Arc<RnsBasis>, rng: &mut R) -> Self {
        let channels = basis
            .primes()
            .iter()
            .map(|&q| uniform_residues(basis.degree(), q, rng))
            .collect();
        Self { channels, basis }
    }

    pub fn sample_gaussian<R: Rng + ?Sized>(
        basis: Arc<RnsBasis>,
        std_dev: f64,
        rng: &mut R,
    ) -> Self {
        let coeffs = gaussian_coefficients(basis.degree(), std_dev, rng);
        Self::from_signed_coeffs(&coeffs, basis)
    }

    pub fn sample_ternary<R: Rng + ?Sized>(
        basis: Arc<RnsBasis>,
        hamming_weight: usize,
        rng: &mut R,
    ) -> Self {
        let coeffs = ternary_coefficients(basis.degree(), hamming_weight, rng);
        Self::from_signed_coeffs(&coeffs, basis)
    }

    pub fn basis(&self) -> &Arc<RnsBasis> {
        &self.basis
    }

    pub fn degree(&self) -> usize {
        self.basis.degree()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> &[Vec<u64>] {
        &self.channels
    }

    pub fn add_checked(&self, rhs: &Self) -> RingResult<Self> {
        self.zip_with(rhs, |a, b, q| {
            let s = a + b;
            if s >= q { s - q } else { s }
        })
    }

    pub fn sub_checked(&self, rhs: &Self) -> RingResult<Self> {
        self.zip_with(rhs, |a, b, q| if a >= b { a - b } else { a + q - b })
    }

    /// Schoolbook multiplication with the `X^n = -1` wrap-around.
    pub fn mul_checked(&self, rhs: &Self) -> RingResult<Self> {
        if !same_basis(&self.basis, &rhs.basis) {
            return Err(RingError::BasisMismatch);
        }
        let n = self.degree();
        let channels = self
            .channels
            .iter()
            .zip(&rhs.channels)
            .zip(self.basis.primes())
            .map(|((lhs, rhs), &q)| {
                let mut acc = vec![0u64; n];
                for (i, &a) in lhs.iter().enumerate() {
                    if a == 0 {
                        continue;
                    }
                    for (j, &b) in rhs.iter().enumerate() {
                        let prod = mul_mod(a, b, q);
                        let k = i + j;
                        if k < n {
                            let s = acc[k] + prod;
                            acc[k] = if s >= q { s - q } else { s };
                        } else {
                            let slot = &mut acc[k - n];
                            *slot = if *slot >= prod { *slot - prod } else { *slot + q - prod };
                        }
                    }
                }
                acc
            })
            .collect();
        Ok(Self {
            channels,
            basis: Arc::clone(&self.basis),
        })
    }

    pub fn negate(&self) -> Self {
        let channels = self
            .channels
            .iter()
            .zip(self.basis.primes())
            .map(|(ch, &q)| ch.iter().map(|&c| if c == 0 { 0 } else { q - c }).collect())
            .collect();
        Self {
            channels,
            basis: Arc::clone(&self.basis),
        }
    }

    /// Drops trailing channels so the polynomial lives in `target`, which
    /// must be a prefix of the current basis.
    pub fn mod_drop_to(&self, target: &Arc<RnsBasis>) -> RingResult<Self> {
        let count = target.channel_count();
        if target.degree() != self.degree()
            || count > self.channel_count()
            || target.primes() != &self.basis.primes()[..count]
        {
            return Err(RingError::BasisMismatch);
        }
        Ok(Self {
            channels: self.channels[..count].to_vec(),
            basis: Arc::clone(target),
        })
    }

    /// Divides by the last prime `q_l` with rounding and drops its channel:
    /// `c' = (c - [c]_{q_l}) * q_l^{-1}` in every remaining channel.
    pub fn rescale_by_last(&self, target: &Arc<RnsBasis>) -> RingResult<Self> {
        let l = self.channel_count() - 1;
        if l == 0 {
            return Err(RingError::LastPrime);
        }
        if target.channel_count() != l
            || target.degree() != self.degree()
            || target.primes() != &self.basis.primes()[..l]
        {
            return Err(RingError::BasisMismatch);
        }
        let q_last = self.basis.primes()[l];
        let last: Vec<i64> = self.channels[l].iter().map(|&c| center(c, q_last)).collect();
        let channels = self.channels[..l]
            .iter()
            .zip(target.primes())
            .map(|(ch, &q)| {
                let inv = mod_inverse(q_last % q, q);
                ch.iter()
                    .zip(&last)
                    .map(|(&c, &r)| {
                        let r = reduce_signed(r, q);
                        let diff = if c >= r { c - r } else { c + q - r };
                        mul_mod(diff, inv, q)
                    })
                    .collect()
            })
            .collect();
        Ok(Self {
            channels,
            basis: Arc::clone(target),
        })
    }

    /// Lifts channel `index` to its centered representative and reduces it
    /// into every channel. The digits of all channels sum back to the
    /// polynomial in the gadget basis used by relinearization.
    pub fn channel_digit(&self, index: usize) -> Self {
        let q_i = self.basis.primes()[index];
        let centered: Vec<i64> =
            self.channels[index].iter().map(|&c| center(c, q_i)).collect();
        Self::from_signed_coeffs(&centered, Arc::clone(&self.basis))
    }

    /// Centered coefficients as floating point, via balanced mixed-radix
    /// (Garner) reconstruction.
    pub fn to_f64_coefficients(&self) -> Vec<f64> {
        let primes = self.basis.primes();
        let mut weights = Vec::with_capacity(primes.len());
        let mut w = 1.0f64;
        for &q in primes {
            weights.push(w);
            w *= q as f64;
        }
        (0..self.degree())
            .map(|pos| {
                let mut digits: Vec<i64> = Vec::with_capacity(primes.len());
                for (i, &qi) in primes.iter().enumerate() {
                    let mut acc = 0u64;
                    for (k, &d) in digits.iter().enumerate() {
                        let term = mul_mod(reduce_signed(d, qi), self.basis.radix_weight_mod(k, i), qi);
                        acc = (acc + term) % qi;
                    }
                    let x = self.channels[i][pos];
                    let diff = if x >= acc { x - acc } else { x + qi - acc };
                    let digit = mul_mod(diff, self.basis.radix_inverse(i), qi);
                    digits.push(center(digit, qi));
                }
                digits
                    .iter()
                    .zip(&weights)
                    .rev()
                    .map(|(&d, &w)| d as f64 * w)
                    .sum()
            })
            .collect()
    }

    fn zip_with(&self, rhs: &Self, f: impl Fn(u64, u64, u64) -> u64) -> RingResult<Self> {
        if !same_basis(&self.basis, &rhs.basis) {
            return Err(RingError::BasisMismatch);
        }
        let channels = self
            .channels
            .iter()
            .zip(&rhs.channels)
            .zip(self.basis.primes())
            .map(|((a, b), &q)| a.iter().zip(b).map(|(&x, &y)| f(x, y, q)).collect())
            .collect();
        Ok(Self {
            channels,
            basis: Arc::clone(&self.basis),
        })
    }
}

impl Add<&RnsPoly> for &RnsPoly {
    type Output = RnsPoly;

    fn add(self, rhs: &RnsPoly) -> RnsPoly {
        self.add_checked(rhs)
            .expect("Cannot add RnsPoly with different bases")
    }
}

impl Sub<&RnsPoly> for &RnsPoly {
    type Output = RnsPoly;

    fn sub(self, rhs: &RnsPoly) -> RnsPoly {
        self.sub_checked(rhs)
            .expect("Cannot subtract RnsPoly with different bases")
    }
}

impl Mul<&RnsPoly> for &RnsPoly {
    type Output = RnsPoly;

    fn mul(self, rhs: &RnsPoly) -> RnsPoly {
        self.mul_checked(rhs)
            .expect("Cannot multiply RnsPoly with different bases")
    }
}

impl Neg for &RnsPoly {
    type Output = RnsPoly;

    fn neg(self) -> RnsPoly {
        self.negate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rings::RnsBasisBuilder;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn basis(primes: Vec<u64>) -> Arc<RnsBasis> {
        RnsBasisBuilder::new(4)
            .with_custom_primes(primes)
            .build_shared()
            .unwrap()
    }

    #[test]
    fn negacyclic_wraparound() {
        let b = basis(vec![97, 113]);
        // X^3 * X = X^4 = -1
        let x3 = RnsPoly::from_signed_coeffs(&[0, 0, 0, 1], b.clone());
        let x = RnsPoly::from_signed_coeffs(&[0, 1, 0, 0], b.clone());
        let prod = &x3 * &x;
        assert_eq!(prod.to_f64_coefficients(), vec![-1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn add_sub_neg_agree() {
        let b = basis(vec![97, 113]);
        let p = RnsPoly::from_signed_coeffs(&[5, -7, 11, 0], b.clone());
        let q = RnsPoly::from_signed_coeffs(&[-3, 2, 40, -1], b.clone());
        assert_eq!((&p + &q).to_f64_coefficients(), vec![2.0, -5.0, 51.0, -1.0]);
        assert_eq!(&(&p - &q) + &q, p);
        assert_eq!(&p + &(-&p), RnsPoly::zero(b));
    }

    #[test]
    fn mismatched_bases_rejected() {
        let p = RnsPoly::zero(basis(vec![97]));
        let q = RnsPoly::zero(basis(vec![113]));
        assert_eq!(p.add_checked(&q), Err(RingError::BasisMismatch));
        assert_eq!(p.mul_checked(&q), Err(RingError::BasisMismatch));
    }

    #[test]
    fn garner_recovers_signed_values() {
        let b = basis(vec![97, 113, 193]);
        let coeffs = [-1_000_000, 999_999, -1, 0];
        let p = RnsPoly::from_signed_coeffs(&coeffs, b);
        let back: Vec<f64> = coeffs.iter().map(|&c| c as f64).collect();
        assert_eq!(p.to_f64_coefficients(), back);
    }

    #[test]
    fn rescale_divides_with_rounding() {
        let full = basis(vec![97, 113, 193]);
        let low = Arc::new(full.prefix(2).unwrap());
        // 193 * 25 + 7 rounds to 25, 193 * -40 - 90 rounds to -40.
        let p = RnsPoly::from_signed_coeffs(&[193 * 25 + 7, 193 * -40 - 90, 0, 96], full);
        let r = p.rescale_by_last(&low).unwrap();
        assert_eq!(r.to_f64_coefficients(), vec![25.0, -40.0, 0.0, 0.0]);
        assert_eq!(r.rescale_by_last(&low), Err(RingError::BasisMismatch));
    }

    #[test]
    fn channel_digits_reassemble() {
        let b = basis(vec![97, 113]);
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let p = RnsPoly::sample_uniform(b.clone(), &mut rng);
        // Channel j of digit j equals channel j of p.
        for j in 0..2 {
            assert_eq!(p.channel_digit(j).channels()[j], p.channels()[j]);
        }
    }

    #[test]
    fn mod_drop_keeps_prefix() {
        let full = basis(vec![97, 113, 193]);
        let low = Arc::new(full.prefix(1).unwrap());
        let p = RnsPoly::from_signed_coeffs(&[1, -2, 3, -4], full);
        let d = p.mod_drop_to(&low).unwrap();
        assert_eq!(d.channel_count(), 1);
        assert_eq!(d.to_f64_coefficients(), vec![1.0, -2.0, 3.0, -4.0]);
    }

    #[test]
    fn from_channels_validates_residues() {
        let b = basis(vec![97]);
        assert!(RnsPoly::from_channels(vec![vec![1, 2, 3, 96]], b.clone()).is_ok());
        assert_eq!(
            RnsPoly::from_channels(vec![vec![1, 2, 3, 97]], b.clone()),
            Err(RingError::InvalidPrime(97))
        );
        assert!(RnsPoly::from_channels(vec![vec![1, 2, 3]], b).is_err());
    }
}
