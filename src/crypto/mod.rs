//! CKKS scheme: parameters, modulus chain, keys in use, and the evaluator.

pub mod builder;
pub mod context;
pub mod engine;
pub mod errors;
pub mod operations;
pub mod types;

pub use builder::{CkksParams, CkksParamsBuilder};
pub use context::{CkksContext, ParmsId};
pub use engine::{CkksEvaluator, Evaluator, KeySet};
pub use errors::{CkksError, CkksResult};
pub use operations::{decrypt, encrypt};
pub use types::{Ciphertext, Plaintext};
