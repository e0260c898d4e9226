//! Canonical-embedding encoder built on a length `2n` complex FFT.
//!
//! The `n` primitive `2n`-th roots of unity are the odd powers of
//! `zeta = exp(i*pi/n)`. Slot `j` lives at the root `zeta^(5^j mod 2n)` and its
//! conjugate at `zeta^-(5^j)`, which keeps the coefficients real. Writing the
//! scaled slot values into a zero vector at those odd positions and running a
//! forward FFT yields `n * m_t` in the first `n` outputs; decoding evaluates the
//! padded coefficient vector with the unnormalized inverse FFT.

use super::{EncodingError, EncodingResult};
use crate::math::mod_pow;
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct RustFftEncoder {
    degree: usize,
    /// `5^j mod 2n` for each slot `j`.
    rotation_group: Vec<usize>,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl fmt::Debug for RustFftEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RustFftEncoder")
            .field("degree", &self.degree)
            .field("slots", &self.slot_count())
            .finish()
    }
}

impl RustFftEncoder {
    pub fn new(degree: usize) -> EncodingResult<Self> {
        if !degree.is_power_of_two() || degree < 4 {
            return Err(EncodingError::InvalidRingDegree { degree });
        }
        let m = 2 * degree as u64;
        let rotation_group = (0..degree / 2)
            .map(|j| mod_pow(5, j as u64, m) as usize)
            .collect();
        let mut planner = FftPlanner::new();
        Ok(Self {
            degree,
            rotation_group,
            forward: planner.plan_fft_forward(2 * degree),
            inverse: planner.plan_fft_inverse(2 * degree),
        })
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Number of complex slots, `n / 2`.
    pub fn slot_count(&self) -> usize {
        self.degree / 2
    }

    /// Encodes slot values at `scale` into rounded real coefficients.
    ///
    /// Missing trailing slots are zero. Coefficients are returned as `f64`
    /// because high-scale plaintexts exceed the `i64` range.
    pub fn encode(&self, slots: &[Complex64], scale: f64) -> EncodingResult<Vec<f64>> {
        if slots.len() > self.slot_count() {
            return Err(EncodingError::InputTooLong {
                got: slots.len(),
                max: self.slot_count(),
            });
        }
        if !scale.is_finite() || scale <= 0.0 {
            return Err(EncodingError::InvalidInput {
                message: format!("scale must be finite and positive, got {scale}"),
            });
        }
        let m = 2 * self.degree;
        let mut buffer = vec![Complex64::new(0.0, 0.0); m];
        for (&g, &z) in self.rotation_group.iter().zip(slots) {
            if !z.re.is_finite() || !z.im.is_finite() {
                return Err(EncodingError::InvalidInput {
                    message: format!("slot value {z} is not finite"),
                });
            }
            let v = z * scale;
            buffer[g] = v;
            buffer[m - g] = v.conj();
        }
        self.forward.process(&mut buffer);

        let norm = (self.degree as f64).recip();
        buffer[..self.degree]
            .iter()
            .map(|c| {
                let value = (c.re * norm).round();
                if value.is_finite() {
                    Ok(value)
                } else {
                    Err(EncodingError::CoefficientOutOfRange { value })
                }
            })
            .collect()
    }

    /// Evaluates coefficients at the slot roots and divides by `scale`.
    pub fn decode(&self, coeffs: &[f64], scale: f64) -> EncodingResult<Vec<Complex64>> {
        if coeffs.len() != self.degree {
            return Err(EncodingError::InvalidInput {
                message: format!(
                    "expected {} coefficients, got {}",
                    self.degree,
                    coeffs.len()
                ),
            });
        }
        let mut buffer = vec![Complex64::new(0.0, 0.0); 2 * self.degree];
        for (slot, &c) in buffer.iter_mut().zip(coeffs) {
            *slot = Complex64::new(c, 0.0);
        }
        self.inverse.process(&mut buffer);
        Ok(self
            .rotation_group
            .iter()
            .map(|&g| buffer[g] / scale)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rejects_bad_degree() {
        assert!(matches!(
            RustFftEncoder::new(12),
            Err(EncodingError::InvalidRingDegree { degree: 12 })
        ));
    }

    #[test]
    fn encode_decode_complex_slots() {
        let encoder = RustFftEncoder::new(16).unwrap();
        let slots = vec![
            Complex64::new(1.5, -0.25),
            Complex64::new(-3.0, 2.0),
            Complex64::new(0.0, 0.0),
            Complex64::new(7.125, 1.0),
        ];
        let scale = 2f64.powi(30);
        let coeffs = encoder.encode(&slots, scale).unwrap();
        let back = encoder.decode(&coeffs, scale).unwrap();
        assert_eq!(back.len(), 8);
        for (a, b) in slots.iter().zip(&back) {
            assert_relative_eq!(a.re, b.re, epsilon = 1e-6);
            assert_relative_eq!(a.im, b.im, epsilon = 1e-6);
        }
        for b in &back[4..] {
            assert!(b.norm() < 1e-6);
        }
    }

    #[test]
    fn constant_slots_give_constant_polynomial() {
        let encoder = RustFftEncoder::new(8).unwrap();
        let slots = vec![Complex64::new(2.0, 0.0); 4];
        let coeffs = encoder.encode(&slots, 1024.0).unwrap();
        assert_eq!(coeffs[0], 2048.0);
        assert!(coeffs[1..].iter().all(|&c| c == 0.0));
    }

    #[test]
    fn encode_rejects_overflowing_input() {
        let encoder = RustFftEncoder::new(8).unwrap();
        let slots = vec![Complex64::new(1.0, 0.0); 5];
        assert_eq!(
            encoder.encode(&slots, 1.0),
            Err(EncodingError::InputTooLong { got: 5, max: 4 })
        );
        assert!(encoder.encode(&[Complex64::new(f64::NAN, 0.0)], 1.0).is_err());
    }
}
