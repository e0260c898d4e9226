//! Value handles flowing through kernels: ciphertexts that may be formally
//! zero, and unencoded plaintext lanes.

use crate::crypto::Ciphertext;
pub use crate::encoding::Packing;

/// Payload state of a ciphertext handle.
///
/// `Zero` is exactly the additive identity after decryption. It still
/// records the scale and level it stands in for, so the operand-matching
/// rules apply to it like to any other ciphertext.
#[derive(Debug, Clone, PartialEq)]
pub enum CipherState {
    Zero { scale: f64, level: usize },
    Encrypted(Ciphertext),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CiphertextHandle {
    packing: Packing,
    state: CipherState,
}

impl CiphertextHandle {
    pub fn zero(packing: Packing, scale: f64, level: usize) -> Self {
        Self {
            packing,
            state: CipherState::Zero { scale, level },
        }
    }

    pub fn encrypted(ciphertext: Ciphertext, packing: Packing) -> Self {
        Self {
            packing,
            state: CipherState::Encrypted(ciphertext),
        }
    }

    pub fn packing(&self) -> Packing {
        self.packing
    }

    pub fn state(&self) -> &CipherState {
        &self.state
    }

    pub fn into_state(self) -> CipherState {
        self.state
    }

    pub fn is_zero(&self) -> bool {
        matches!(self.state, CipherState::Zero { .. })
    }

    pub fn ciphertext(&self) -> Option<&Ciphertext> {
        match &self.state {
            CipherState::Encrypted(ct) => Some(ct),
            CipherState::Zero { .. } => None,
        }
    }

    pub fn scale(&self) -> f64 {
        match &self.state {
            CipherState::Zero { scale, .. } => *scale,
            CipherState::Encrypted(ct) => ct.scale,
        }
    }

    pub fn level(&self) -> usize {
        match &self.state {
            CipherState::Zero { level, .. } => *level,
            CipherState::Encrypted(ct) => ct.level,
        }
    }
}

/// Plaintext lanes, encoded on demand at the scale and level of the
/// ciphertext they meet. A single lane is a scalar broadcast to all lanes.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaintextHandle {
    values: Vec<f64>,
}

impl PlaintextHandle {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn scalar(value: f64) -> Self {
        Self {
            values: vec![value],
        }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_scalar(&self) -> bool {
        self.values.len() == 1
    }

    /// Lane `i`, broadcasting scalars.
    pub fn lane(&self, i: usize) -> f64 {
        if self.is_scalar() {
            self.values[0]
        } else {
            self.values[i]
        }
    }

    pub fn is_all_zero(&self) -> bool {
        self.values.iter().all(|&v| v == 0.0)
    }

    /// The common value when every lane is equal.
    pub fn uniform_value(&self) -> Option<f64> {
        let (&first, rest) = self.values.split_first()?;
        rest.iter().all(|&v| v == first).then_some(first)
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            values: self.values.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Lane-wise combination with scalar broadcast on either side.
    pub fn zip_with(&self, other: &Self, f: impl Fn(f64, f64) -> f64) -> Self {
        let n = self.len().max(other.len());
        Self {
            values: (0..n).map(|i| f(self.lane(i), other.lane(i))).collect(),
        }
    }
}

/// One element of a tensor on the encrypted backend.
#[derive(Debug, Clone, PartialEq)]
pub enum HeValue {
    Plain(PlaintextHandle),
    Cipher(CiphertextHandle),
}

impl HeValue {
    pub fn is_cipher(&self) -> bool {
        matches!(self, HeValue::Cipher(_))
    }
}

impl From<PlaintextHandle> for HeValue {
    fn from(value: PlaintextHandle) -> Self {
        HeValue::Plain(value)
    }
}

impl From<CiphertextHandle> for HeValue {
    fn from(value: CiphertextHandle) -> Self {
        HeValue::Cipher(value)
    }
}
