use super::{CkksError, CkksResult};

/// Largest accepted ring degree.
pub const MAX_RING_DEGREE: usize = 1 << 15;
/// Largest accepted number of rescale levels.
pub const MAX_LEVELS: usize = 32;

/// Scheme parameters. The modulus chain is `q0` (about `base_bits` bits)
/// followed by `levels` rescale primes just below `2^scale_bits`.
#[derive(Debug, Clone, PartialEq)]
pub struct CkksParams {
    pub ring_degree: usize,
    pub base_bits: u32,
    pub scale_bits: u32,
    pub levels: usize,
    pub error_std: f64,
    pub hamming_weight: usize,
}

impl CkksParams {
    pub fn builder() -> CkksParamsBuilder {
        CkksParamsBuilder::new()
    }

    /// Small, insecure parameters for tests: `n = 64`, three rescale levels.
    pub fn toy() -> Self {
        Self {
            ring_degree: 64,
            base_bits: 55,
            scale_bits: 40,
            levels: 3,
            error_std: 3.2,
            hamming_weight: 32,
        }
    }

    pub fn default_scale(&self) -> f64 {
        2f64.powi(self.scale_bits as i32)
    }

    pub fn validate(&self) -> CkksResult<()> {
        let fail = |message: String| Err(CkksError::InvalidParameter { message });
        if !self.ring_degree.is_power_of_two()
            || !(4..=MAX_RING_DEGREE).contains(&self.ring_degree)
        {
            return fail(format!(
                "ring degree {} must be a power of two in 4..={MAX_RING_DEGREE}",
                self.ring_degree
            ));
        }
        if self.levels > MAX_LEVELS {
            return fail(format!("levels {} above {MAX_LEVELS}", self.levels));
        }
        if !(8..=60).contains(&self.scale_bits) {
            return fail(format!("scale bits {} outside 8..=60", self.scale_bits));
        }
        if self.base_bits <= self.scale_bits || self.base_bits > 60 {
            return fail(format!(
                "base bits {} must exceed scale bits {} and be at most 60",
                self.base_bits, self.scale_bits
            ));
        }
        if !(self.error_std.is_finite() && self.error_std > 0.0) {
            return fail(format!("error std {} must be positive", self.error_std));
        }
        if self.hamming_weight == 0 || self.hamming_weight > self.ring_degree {
            return fail(format!(
                "hamming weight {} outside 1..={}",
                self.hamming_weight, self.ring_degree
            ));
        }
        Ok(())
    }
}

pub struct CkksParamsBuilder {
    ring_degree: Option<usize>,
    base_bits: Option<u32>,
    scale_bits: Option<u32>,
    levels: Option<usize>,
    error_std: Option<f64>,
    hamming_weight: Option<usize>,
}

impl Default for CkksParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CkksParamsBuilder {
    pub fn new() -> Self {
        Self {
            ring_degree: None,
            base_bits: None,
            scale_bits: None,
            levels: None,
            error_std: None,
            hamming_weight: None,
        }
    }

    pub fn ring_degree(mut self, degree: usize) -> Self {
        self.ring_degree = Some(degree);
        self
    }

    pub fn base_bits(mut self, bits: u32) -> Self {
        self.base_bits = Some(bits);
        self
    }

    pub fn scale_bits(mut self, bits: u32) -> Self {
        self.scale_bits = Some(bits);
        self
    }

    pub fn levels(mut self, levels: usize) -> Self {
        self.levels = Some(levels);
        self
    }

    pub fn error_std(mut self, std: f64) -> Self {
        self.error_std = Some(std);
        self
    }

    pub fn hamming_weight(mut self, weight: usize) -> Self {
        self.hamming_weight = Some(weight);
        self
    }

    /// Unset fields fall back to [`CkksParams::toy`], except the hamming
    /// weight which defaults to half the ring degree.
    pub fn build(self) -> CkksResult<CkksParams> {
        let toy = CkksParams::toy();
        let ring_degree = self.ring_degree.unwrap_or(toy.ring_degree);
        let params = CkksParams {
            ring_degree,
            base_bits: self.base_bits.unwrap_or(toy.base_bits),
            scale_bits: self.scale_bits.unwrap_or(toy.scale_bits),
            levels: self.levels.unwrap_or(toy.levels),
            error_std: self.error_std.unwrap_or(toy.error_std),
            hamming_weight: self.hamming_weight.unwrap_or(ring_degree / 2),
        };
        params.validate()?;
        Ok(params)
    }
}
