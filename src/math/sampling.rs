//! Coefficient samplers for keys, encryption randomness and noise.
//!
//! All samplers return signed integer coefficients; mapping into the residue
//! channels of a basis happens in [`crate::rings::RnsPoly`].

use rand::Rng;
use rand::seq::SliceRandom;
use rand_distr::{Distribution, Normal};

/// Samples uniform residues in `[0, modulus)`.
pub fn uniform_residues<R: Rng + ?Sized>(
    degree: usize,
    modulus: u64,
    rng: &mut R,
) -> Vec<u64> {
    assert!(modulus > 0, "uniform_residues: modulus must be positive");
    (0..degree).map(|_| rng.random_range(0..modulus)).collect()
}

/// Samples rounded Gaussian integers with the given standard deviation.
///
/// # Panics
///
/// Panics if `std_dev` is not finite and positive.
pub fn gaussian_coefficients<R: Rng + ?Sized>(
    degree: usize,
    std_dev: f64,
    rng: &mut R,
) -> Vec<i64> {
    assert!(
        std_dev.is_finite() && std_dev > 0.0,
        "gaussian_coefficients: std_dev must be finite and positive"
    );
    let normal = Normal::new(0.0, std_dev)
        .expect("gaussian_coefficients: failed to create Normal distribution");
    (0..degree)
        .map(|_| normal.sample(rng).round() as i64)
        .collect()
}

/// Samples a ternary vector with exactly `hamming_weight` entries in
/// `{-1, 1}` and the rest zero.
///
/// # Panics
///
/// Panics if `hamming_weight > degree`.
pub fn ternary_coefficients<R: Rng + ?Sized>(
    degree: usize,
    hamming_weight: usize,
    rng: &mut R,
) -> Vec<i64> {
    assert!(
        hamming_weight <= degree,
        "ternary_coefficients: hamming_weight must be <= degree"
    );
    let mut out = vec![0i64; degree];
    let mut indices: Vec<usize> = (0..degree).collect();
    indices.shuffle(rng);
    for &idx in indices.iter().take(hamming_weight) {
        out[idx] = if rng.random_bool(0.5) { 1 } else { -1 };
    }
    out
}
