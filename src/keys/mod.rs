//! Key material: ternary secret, RLWE public key and the per-channel
//! relinearization key.
pub mod public_key;
pub mod relin_key;
pub mod secret_key;

pub use public_key::PublicKey;
pub use relin_key::RelinearizationKey;
pub use secret_key::SecretKey;

use crate::rings::RingError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum KeyError {
    #[error("Hamming weight {0} exceeds ring dimension {1}")]
    InvalidHammingWeight(usize, usize),

    #[error("Invalid error standard deviation: {0} (must be positive)")]
    InvalidErrorStd(f64),

    #[error("Relinearization key has {got} digits, basis needs {expected}")]
    DigitCountMismatch { expected: usize, got: usize },

    #[error("Key components live in different bases")]
    ComponentBasisMismatch,

    #[error(transparent)]
    Ring(#[from] RingError),
}

pub type KeyResult<T> = Result<T, KeyError>;

fn validate_error_std(error_std: f64) -> KeyResult<()> {
    if error_std.is_finite() && error_std > 0.0 {
        Ok(())
    } else {
        Err(KeyError::InvalidErrorStd(error_std))
    }
}
