//! Runtime configuration passed explicitly into backends and sessions.

use crate::handle::Packing;
use std::time::Duration;

/// Settings for an [`HeBackend`](crate::exec::HeBackend).
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    /// Two real lanes per slot instead of one.
    pub complex_packing: bool,
    /// Seeds key generation and encryption randomness.
    pub seed: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            complex_packing: false,
            seed: 0,
        }
    }
}

impl BackendConfig {
    pub fn with_complex_packing(mut self, complex_packing: bool) -> Self {
        self.complex_packing = complex_packing;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn packing(&self) -> Packing {
        Packing::from_complex_flag(self.complex_packing)
    }
}

/// Settings for one client-assisted evaluation session, fixed at
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Lanes per ciphertext.
    pub batch_size: usize,
    pub complex_packing: bool,
    /// Upper bound on any single blocking read or write.
    pub timeout: Duration,
    /// Ciphertexts per nonlinear request message (server side).
    pub max_batch_elements: usize,
    pub seed: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            complex_packing: false,
            timeout: Duration::from_secs(30),
            max_batch_elements: 64,
            seed: 0,
        }
    }
}

impl SessionConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_complex_packing(mut self, complex_packing: bool) -> Self {
        self.complex_packing = complex_packing;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_batch_elements(mut self, max_batch_elements: usize) -> Self {
        self.max_batch_elements = max_batch_elements;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn packing(&self) -> Packing {
        Packing::from_complex_flag(self.complex_packing)
    }
}
