use crate::rings::RnsPoly;

/// Encoded, unencrypted polynomial.
#[derive(Debug, Clone, PartialEq)]
pub struct Plaintext {
    pub poly: RnsPoly,
    pub scale: f64,
    pub level: usize,
}

/// RLWE ciphertext `(c0, c1, ...)` decrypting as `sum_i c_i * s^i`.
///
/// `scale` is the factor the encrypted message is multiplied by; `level`
/// indexes the modulus chain, so components carry `level + 1` channels.
#[derive(Debug, Clone, PartialEq)]
pub struct Ciphertext {
    pub components: Vec<RnsPoly>,
    pub scale: f64,
    pub level: usize,
}

impl Ciphertext {
    pub fn size(&self) -> usize {
        self.components.len()
    }

    pub fn degree(&self) -> usize {
        self.components.first().map_or(0, RnsPoly::degree)
    }
}
