use super::{ExecError, ExecResult};
use crate::crypto::Evaluator;
use crate::handle::CiphertextHandle;
use crate::kernel::{NonlinearOp, nonlinear_with_key};
use crate::keys::SecretKey;
use rayon::prelude::*;

/// Evaluates functions outside the additive/multiplicative algebra on
/// ciphertexts.
///
/// Responses must come back in request order, at the scale and level of the
/// corresponding request element.
pub trait NonlinearOracle {
    fn evaluate(
        &mut self,
        op: NonlinearOp,
        lanes: usize,
        batch: &[CiphertextHandle],
    ) -> ExecResult<Vec<CiphertextHandle>>;
}

/// In-process oracle for callers that hold the secret key themselves.
pub struct LocalOracle<'a> {
    secret_key: &'a SecretKey,
    evaluator: &'a dyn Evaluator,
}

impl<'a> LocalOracle<'a> {
    pub fn new(secret_key: &'a SecretKey, evaluator: &'a dyn Evaluator) -> Self {
        Self {
            secret_key,
            evaluator,
        }
    }
}

impl NonlinearOracle for LocalOracle<'_> {
    fn evaluate(
        &mut self,
        op: NonlinearOp,
        lanes: usize,
        batch: &[CiphertextHandle],
    ) -> ExecResult<Vec<CiphertextHandle>> {
        batch
            .par_iter()
            .map(|handle| {
                nonlinear_with_key(handle, op, lanes, self.secret_key, self.evaluator)
                    .map_err(ExecError::from)
            })
            .collect()
    }
}
