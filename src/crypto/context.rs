//! Modulus chain, per-level parameter ids and the shared encoder.

use super::builder::CkksParams;
use super::types::Plaintext;
use super::{CkksError, CkksResult};
use crate::encoding::{Packing, RustFftEncoder, pack_lanes, unpack_slots};
use crate::math::primes_below;
use crate::rings::{RnsBasis, RnsBasisBuilder, RnsPoly};
use fnv::FnvHasher;
use std::fmt;
use std::hash::Hasher;
use std::sync::Arc;

/// 32-byte identifier of one level of a parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParmsId(pub [u64; 4]);

impl ParmsId {
    pub const BYTES: usize = 32;

    /// Digest of the ring degree and the level's primes.
    pub fn compute(degree: usize, primes: &[u64]) -> Self {
        let mut words = [0u64; 4];
        for (index, word) in words.iter_mut().enumerate() {
            let mut hasher = FnvHasher::default();
            hasher.write_u64(index as u64);
            hasher.write_u64(degree as u64);
            for &p in primes {
                hasher.write_u64(p);
            }
            *word = hasher.finish();
        }
        Self(words)
    }
}

impl fmt::Display for ParmsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for word in self.0 {
            write!(f, "{word:016x}")?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct CkksContext {
    params: CkksParams,
    /// `chain[l]` holds primes `q0..=ql`.
    chain: Vec<Arc<RnsBasis>>,
    parms_ids: Vec<ParmsId>,
    encoder: RustFftEncoder,
}

impl CkksContext {
    pub fn new(params: CkksParams) -> CkksResult<Self> {
        params.validate()?;
        let degree = params.ring_degree as u64;
        let base = primes_below(params.base_bits, 1, degree, &[])?;
        let rescale = primes_below(params.scale_bits, params.levels, degree, &base)?;
        let primes: Vec<u64> = base.into_iter().chain(rescale).collect();

        let top = RnsBasisBuilder::new(params.ring_degree)
            .with_custom_primes(primes)
            .build()?;
        let chain = (1..=top.channel_count())
            .map(|count| top.prefix(count).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        let parms_ids = chain
            .iter()
            .map(|basis| ParmsId::compute(basis.degree(), basis.primes()))
            .collect();
        let encoder = RustFftEncoder::new(params.ring_degree)?;

        log::debug!(
            "ckks context: degree {}, chain {:?}",
            params.ring_degree,
            top.primes()
        );
        Ok(Self {
            params,
            chain,
            parms_ids,
            encoder,
        })
    }

    pub fn params(&self) -> &CkksParams {
        &self.params
    }

    pub fn degree(&self) -> usize {
        self.params.ring_degree
    }

    pub fn slot_count(&self) -> usize {
        self.encoder.slot_count()
    }

    pub fn top_level(&self) -> usize {
        self.chain.len() - 1
    }

    pub fn default_scale(&self) -> f64 {
        self.params.default_scale()
    }

    pub fn encoder(&self) -> &RustFftEncoder {
        &self.encoder
    }

    pub fn basis(&self, level: usize) -> CkksResult<&Arc<RnsBasis>> {
        self.chain.get(level).ok_or(CkksError::InvalidLevel {
            level,
            top: self.top_level(),
        })
    }

    pub fn top_basis(&self) -> &Arc<RnsBasis> {
        &self.chain[self.top_level()]
    }

    pub fn parms_id(&self, level: usize) -> CkksResult<ParmsId> {
        self.parms_ids
            .get(level)
            .copied()
            .ok_or(CkksError::InvalidLevel {
                level,
                top: self.top_level(),
            })
    }

    /// Level whose parameter id is `id`, if it belongs to this context.
    pub fn level_of(&self, id: &ParmsId) -> Option<usize> {
        self.parms_ids.iter().position(|known| known == id)
    }

    /// Prime divided out when rescaling from `level`; `None` at level 0.
    pub fn rescale_modulus(&self, level: usize) -> Option<u64> {
        if level == 0 {
            return None;
        }
        self.chain.get(level).map(|basis| basis.last_prime())
    }

    pub fn encode(
        &self,
        lanes: &[f64],
        packing: Packing,
        scale: f64,
        level: usize,
    ) -> CkksResult<Plaintext> {
        let basis = self.basis(level)?;
        let slots = pack_lanes(lanes, packing, self.slot_count())?;
        let coeffs = self.encoder.encode(&slots, scale)?;
        Ok(Plaintext {
            poly: RnsPoly::from_rounded_f64(&coeffs, Arc::clone(basis)),
            scale,
            level,
        })
    }

    pub fn decode(
        &self,
        plaintext: &Plaintext,
        packing: Packing,
        lane_count: usize,
    ) -> CkksResult<Vec<f64>> {
        let coeffs = plaintext.poly.to_f64_coefficients();
        let slots = self.encoder.decode(&coeffs, plaintext.scale)?;
        Ok(unpack_slots(&slots, packing, lane_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn chain_has_one_basis_per_level() {
        let ctx = CkksContext::new(CkksParams::toy()).unwrap();
        assert_eq!(ctx.top_level(), 3);
        for level in 0..=3 {
            let basis = ctx.basis(level).unwrap();
            assert_eq!(basis.channel_count(), level + 1);
            assert_eq!(ctx.level_of(&ctx.parms_id(level).unwrap()), Some(level));
        }
        assert!(ctx.basis(4).is_err());
        assert_eq!(ctx.rescale_modulus(0), None);
        let q3 = ctx.rescale_modulus(3).unwrap();
        assert!(q3 < 1 << 40 && q3 > 1 << 39);
        assert_eq!(q3 % 128, 1);
    }

    #[test]
    fn parms_ids_differ_per_level() {
        let ctx = CkksContext::new(CkksParams::toy()).unwrap();
        assert_ne!(ctx.parms_id(2).unwrap(), ctx.parms_id(3).unwrap());
        let other = CkksContext::new(
            CkksParams::builder().ring_degree(32).build().unwrap(),
        )
        .unwrap();
        assert_eq!(other.level_of(&ctx.parms_id(3).unwrap()), None);
        assert_eq!(ctx.parms_id(0).unwrap().to_string().len(), 64);
    }

    #[test]
    fn encode_decode_at_every_level() {
        let ctx = CkksContext::new(CkksParams::toy()).unwrap();
        let lanes = [-2.0, -1.0, 0.0, 1.0, 2.5, 3.0];
        for level in 0..=ctx.top_level() {
            for packing in [Packing::Real, Packing::Complex] {
                let pt = ctx.encode(&lanes, packing, ctx.default_scale(), level).unwrap();
                let back = ctx.decode(&pt, packing, lanes.len()).unwrap();
                for (a, b) in lanes.iter().zip(&back) {
                    assert_relative_eq!(a, b, epsilon = 1e-6);
                }
            }
        }
    }
}
