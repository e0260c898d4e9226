//! RNS basis: the prime moduli active at one level of the modulus chain.

use crate::math::{PrimeError, is_prime, mod_inverse, mul_mod};
use std::sync::Arc;
use thiserror::Error;

/// Errors for RNS basis construction and polynomial arithmetic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    #[error("Invalid prime count: {0}")]
    InvalidPrimeCount(usize),

    #[error("Invalid prime: {0}")]
    InvalidPrime(u64),

    #[error("Ring degree {0} must be a power of two >= 4")]
    InvalidDegree(usize),

    #[error(transparent)]
    PrimeGeneration(#[from] PrimeError),

    #[error("Basis mismatch: cannot operate on polynomials with different RNS bases")]
    BasisMismatch,

    #[error("Cannot drop below a single prime")]
    LastPrime,
}

pub type RingResult<T> = Result<T, RingError>;

/// An RNS basis: ring degree plus an ordered prime list `q0, q1, ..., ql`.
///
/// Bases for lower levels are prefixes of the top-level basis, so dropping
/// the last prime moves a polynomial one level down the chain.
#[derive(Debug, PartialEq, Eq)]
pub struct RnsBasis {
    degree: usize,
    primes: Vec<u64>,
    /// `garner[i][j] = (q0 * ... * q(i-1)) mod qj` for `j >= i`, used by
    /// mixed-radix reconstruction.
    garner: Vec<Vec<u64>>,
}

impl RnsBasis {
    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn primes(&self) -> &[u64] {
        &self.primes
    }

    pub fn channel_count(&self) -> usize {
        self.primes.len()
    }

    /// Level index of this basis (number of primes minus one).
    pub fn level(&self) -> usize {
        self.primes.len() - 1
    }

    pub fn last_prime(&self) -> u64 {
        self.primes[self.primes.len() - 1]
    }

    /// Basis with the first `count` primes of this one.
    pub fn prefix(&self, count: usize) -> RingResult<RnsBasis> {
        if count == 0 || count > self.primes.len() {
            return Err(RingError::InvalidPrimeCount(count));
        }
        RnsBasis::new(self.degree, self.primes[..count].to_vec())
    }

    pub(crate) fn radix_weight_mod(&self, i: usize, j: usize) -> u64 {
        self.garner[i][j]
    }

    fn new(degree: usize, primes: Vec<u64>) -> RingResult<Self> {
        let garner = (0..primes.len())
            .map(|i| {
                primes
                    .iter()
                    .map(|&qj| {
                        primes[..i].iter().fold(1 % qj, |acc, &qk| {
                            mul_mod(acc, qk % qj, qj)
                        })
                    })
                    .collect()
            })
            .collect();
        Ok(Self {
            degree,
            primes,
            garner,
        })
    }

    /// `(q0 * ... * q(i-1))^{-1} mod qi`.
    pub(crate) fn radix_inverse(&self, i: usize) -> u64 {
        let qi = self.primes[i];
        mod_inverse(self.garner[i][i], qi)
    }
}

/// Builder for constructing an RNS basis.
pub struct RnsBasisBuilder {
    degree: usize,
    primes: Vec<u64>,
}

impl RnsBasisBuilder {
    pub fn new(degree: usize) -> Self {
        Self {
            degree,
            primes: Vec::new(),
        }
    }

    pub fn with_custom_primes(mut self, primes: Vec<u64>) -> Self {
        self.primes = primes;
        self
    }

    pub fn build(self) -> RingResult<RnsBasis> {
        if !self.degree.is_power_of_two() || self.degree < 4 {
            return Err(RingError::InvalidDegree(self.degree));
        }
        if self.primes.is_empty() {
            return Err(RingError::InvalidPrimeCount(0));
        }
        for (idx, &p) in self.primes.iter().enumerate() {
            // 62-bit bound keeps lazy additions inside u64.
            if !is_prime(p) || p >= 1 << 62 || self.primes[..idx].contains(&p) {
                return Err(RingError::InvalidPrime(p));
            }
        }
        RnsBasis::new(self.degree, self.primes)
    }

    pub fn build_shared(self) -> RingResult<Arc<RnsBasis>> {
        self.build().map(Arc::new)
    }
}
