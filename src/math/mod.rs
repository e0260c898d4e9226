pub mod primes;
pub mod sampling;

pub use primes::{
    PrimeError, center, is_ntt_friendly_prime, is_prime, mod_inverse, mod_pow,
    mul_mod, primes_below, reduce_signed,
};
pub use sampling::{
    gaussian_coefficients, ternary_coefficients, uniform_residues,
};
