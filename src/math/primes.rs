//! Prime utilities for building the RNS modulus chain.
//!
//! Primality uses deterministic Miller-Rabin over `u64` with the first twelve
//! prime bases. Every chain prime is NTT-friendly (`p = 1 mod 2n`), keeping
//! the chain compatible with a negacyclic NTT backend.

use thiserror::Error;

// Deterministic for all n < 3.3 * 10^24, which covers every u64.
const MILLER_RABIN_BASES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrimeError {
    #[error("Unable to find {count} NTT-friendly primes below 2^{bits} for degree {degree}")]
    Exhausted { bits: u32, count: usize, degree: u64 },

    #[error("Prime bit size {0} out of range (must be in 4..=61)")]
    InvalidBitSize(u32),
}

/// Computes `(a * b) mod modulus` using `u128` intermediate arithmetic.
#[inline]
pub fn mul_mod(a: u64, b: u64, modulus: u64) -> u64 {
    assert!(modulus > 0, "mul_mod: modulus must be positive");
    ((a as u128 * b as u128) % modulus as u128) as u64
}

/// Computes `base^exp mod modulus` via binary exponentiation.
pub fn mod_pow(mut base: u64, mut exp: u64, modulus: u64) -> u64 {
    assert!(modulus > 0, "mod_pow: modulus must be positive");
    if modulus == 1 {
        return 0;
    }
    let mut acc = 1;
    base %= modulus;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = mul_mod(acc, base, modulus);
        }
        base = mul_mod(base, base, modulus);
        exp >>= 1;
    }
    acc
}

/// Inverse of `a` modulo the prime `p` (Fermat).
///
/// # Panics
///
/// Panics if `a` is divisible by `p`.
pub fn mod_inverse(a: u64, p: u64) -> u64 {
    let a = a % p;
    assert!(a != 0, "mod_inverse: {a} has no inverse modulo {p}");
    mod_pow(a, p - 2, p)
}

/// Maps a residue in `[0, q)` to its centered representative in
/// `(-q/2, q/2]`.
#[inline]
pub fn center(residue: u64, q: u64) -> i64 {
    if residue > q / 2 {
        -((q - residue) as i64)
    } else {
        residue as i64
    }
}

/// Reduces a signed integer into `[0, q)`.
#[inline]
pub fn reduce_signed(value: i64, q: u64) -> u64 {
    let r = (value as i128).rem_euclid(q as i128);
    r as u64
}

/// Returns `(odd_part, power_of_two)` such that `n = odd_part * 2^power_of_two`.
fn decompose(n: u64) -> (u64, u32) {
    let r = n.trailing_zeros();
    (n >> r, r)
}

/// Returns `true` if `n` is prime using deterministic Miller-Rabin on `u64`.
pub fn is_prime(n: u64) -> bool {
    match n {
        0 | 1 => return false,
        2 | 3 => return true,
        _ if n & 1 == 0 => return false,
        _ => {}
    }

    let (d, r) = decompose(n - 1);
    'bases: for &a in MILLER_RABIN_BASES.iter() {
        if a >= n {
            continue;
        }
        let mut x = mod_pow(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..r {
            x = mul_mod(x, x, n);
            if x == n - 1 {
                continue 'bases;
            }
        }
        return false;
    }
    true
}

/// Returns `true` when `p` is prime and `p = 1 (mod 2n)`.
#[inline]
pub fn is_ntt_friendly_prime(p: u64, n: u64) -> bool {
    is_prime(p) && p % (2 * n) == 1
}

/// Returns the largest NTT-friendly prime `p < bound` for ring degree `n`.
pub fn get_first_prime_down(bound: u64, n: u64) -> Option<u64> {
    assert!(n > 0, "get_first_prime_down: n must be positive");
    let step = 2 * n;
    if bound <= step {
        return None;
    }
    // Largest candidate below `bound` with candidate = 1 (mod step).
    let top = bound - 1;
    let mut candidate = top - (top + step - 1) % step;

    loop {
        if candidate <= 2 {
            return None;
        }
        if is_prime(candidate) {
            return Some(candidate);
        }
        candidate = candidate.checked_sub(step)?;
    }
}

/// Generates `count` distinct NTT-friendly primes strictly below `2^bits`,
/// largest first, skipping anything listed in `exclude`.
pub fn primes_below(
    bits: u32,
    count: usize,
    degree: u64,
    exclude: &[u64],
) -> Result<Vec<u64>, PrimeError> {
    if !(4..=61).contains(&bits) {
        return Err(PrimeError::InvalidBitSize(bits));
    }
    let exhausted = PrimeError::Exhausted {
        bits,
        count,
        degree,
    };

    let mut primes = Vec::with_capacity(count);
    let mut bound = 1u64 << bits;
    while primes.len() < count {
        let p = get_first_prime_down(bound, degree).ok_or(exhausted.clone())?;
        if !exclude.contains(&p) {
            primes.push(p);
        }
        bound = p;
    }
    Ok(primes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_prime_reference(n: u64) -> bool {
        if n < 2 {
            return false;
        }
        let mut i = 2u64;
        while i * i <= n {
            if n % i == 0 {
                return false;
            }
            i += 1;
        }
        true
    }

    #[test]
    fn miller_rabin_matches_trial_division() {
        for n in (0..2_000).chain(1_000_000..1_000_200) {
            assert_eq!(is_prime(n), is_prime_reference(n), "mismatch at {n}");
        }
    }

    #[test]
    fn rejects_carmichael_numbers() {
        for n in [561u64, 1_105, 1_729, 3_215_031_751] {
            assert!(!is_prime(n), "expected composite: {n}");
        }
        assert!(is_prime(18_446_744_073_709_551_557));
    }

    #[test]
    fn inverse_and_centering() {
        let p = 12289;
        assert_eq!(mul_mod(mod_inverse(1234, p), 1234, p), 1);
        assert_eq!(center(p - 1, p), -1);
        assert_eq!(center(3, p), 3);
        assert_eq!(reduce_signed(-1, p), p - 1);
    }

    #[test]
    fn prime_down_is_ntt_friendly() {
        let prime = get_first_prime_down(1 << 31, 1024).unwrap();
        assert!(prime < 1 << 31);
        assert!(is_ntt_friendly_prime(prime, 1024));
        assert_eq!(get_first_prime_down(100, 1024), None);
    }

    #[test]
    fn primes_below_are_distinct_and_skip_excluded() {
        let first = primes_below(40, 1, 64, &[]).unwrap();
        let rest = primes_below(40, 3, 64, &first).unwrap();
        assert_eq!(rest.len(), 3);
        assert!(!rest.contains(&first[0]));
        assert!(rest.windows(2).all(|w| w[0] > w[1]));
        for p in rest {
            assert!(is_ntt_friendly_prime(p, 64));
            assert!(p < 1 << 40);
        }
    }

    #[test]
    fn primes_below_rejects_bad_bits() {
        assert_eq!(
            primes_below(62, 1, 64, &[]),
            Err(PrimeError::InvalidBitSize(62))
        );
    }
}
