use crate::encoding::EncodingError;
use crate::keys::KeyError;
use crate::math::PrimeError;
use crate::rings::RingError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CkksError {
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    #[error("Encoding failed: {source}")]
    EncodingError {
        #[from]
        source: EncodingError,
    },

    #[error("Ring operation failed: {source}")]
    RingError {
        #[from]
        source: RingError,
    },

    #[error("Key operation failed: {source}")]
    KeyError {
        #[from]
        source: KeyError,
    },

    #[error("Modulus chain construction failed: {source}")]
    PrimeError {
        #[from]
        source: PrimeError,
    },

    #[error("Scale mismatch: expected {expected:.2}, got {actual:.2}")]
    ScaleMismatch { expected: f64, actual: f64 },

    #[error("Level mismatch: expected {expected}, got {actual}")]
    LevelMismatch { expected: usize, actual: usize },

    #[error("Level {level} outside the modulus chain (top level {top})")]
    InvalidLevel { level: usize, top: usize },

    #[error("Modulus chain exhausted: cannot rescale below level 0")]
    ModulusChainExhausted,

    #[error("Ciphertext of size {0} not supported here (expected 2)")]
    UnsupportedSize(usize),
}

pub type CkksResult<T> = Result<T, CkksError>;

/// Scales are tracked as floats and drift by rounding only.
pub(crate) fn scales_match(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs())
}

pub(crate) fn check_scale(expected: f64, actual: f64) -> CkksResult<()> {
    if scales_match(expected, actual) {
        Ok(())
    } else {
        Err(CkksError::ScaleMismatch { expected, actual })
    }
}

pub(crate) fn check_level(expected: usize, actual: usize) -> CkksResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(CkksError::LevelMismatch { expected, actual })
    }
}
