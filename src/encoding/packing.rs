//! Lane layout: how a batch of real values maps onto complex slots.

use super::{EncodingError, EncodingResult};
use num_complex::Complex64;
use std::fmt;

/// Real packing puts one lane per slot; complex packing puts lanes `2j`
/// and `2j + 1` into the real and imaginary parts of slot `j`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Packing {
    #[default]
    Real,
    Complex,
}

impl Packing {
    pub fn from_complex_flag(complex: bool) -> Self {
        if complex { Packing::Complex } else { Packing::Real }
    }

    pub fn is_complex(self) -> bool {
        self == Packing::Complex
    }

    pub fn lanes_per_slot(self) -> usize {
        match self {
            Packing::Real => 1,
            Packing::Complex => 2,
        }
    }

    /// Maximum lanes for `slots` complex slots.
    pub fn lane_capacity(self, slots: usize) -> usize {
        slots * self.lanes_per_slot()
    }
}

impl fmt::Display for Packing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Packing::Real => write!(f, "real"),
            Packing::Complex => write!(f, "complex"),
        }
    }
}

/// Maps lanes onto at most `slots` slots. A single lane is broadcast to
/// every lane of every slot.
pub fn pack_lanes(
    lanes: &[f64],
    packing: Packing,
    slots: usize,
) -> EncodingResult<Vec<Complex64>> {
    let capacity = packing.lane_capacity(slots);
    if lanes.len() > capacity {
        return Err(EncodingError::InputTooLong {
            got: lanes.len(),
            max: capacity,
        });
    }
    if let [scalar] = lanes {
        let slot = match packing {
            Packing::Real => Complex64::new(*scalar, 0.0),
            Packing::Complex => Complex64::new(*scalar, *scalar),
        };
        return Ok(vec![slot; slots]);
    }
    Ok(match packing {
        Packing::Real => lanes.iter().map(|&v| Complex64::new(v, 0.0)).collect(),
        Packing::Complex => lanes
            .chunks(2)
            .map(|pair| Complex64::new(pair[0], pair.get(1).copied().unwrap_or(0.0)))
            .collect(),
    })
}

/// Inverse of [`pack_lanes`]: reads back `lane_count` lanes.
pub fn unpack_slots(slots: &[Complex64], packing: Packing, lane_count: usize) -> Vec<f64> {
    match packing {
        Packing::Real => slots.iter().take(lane_count).map(|z| z.re).collect(),
        Packing::Complex => slots
            .iter()
            .flat_map(|z| [z.re, z.im])
            .take(lane_count)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complex_packing_pairs_lanes() {
        let lanes = [1.0, 2.0, 3.0, 4.0, 5.0];
        let slots = pack_lanes(&lanes, Packing::Complex, 4).unwrap();
        assert_eq!(
            slots,
            vec![
                Complex64::new(1.0, 2.0),
                Complex64::new(3.0, 4.0),
                Complex64::new(5.0, 0.0)
            ]
        );
        assert_eq!(unpack_slots(&slots, Packing::Complex, 5), lanes.to_vec());
    }

    #[test]
    fn scalar_broadcasts() {
        let real = pack_lanes(&[1.5], Packing::Real, 3).unwrap();
        assert_eq!(real, vec![Complex64::new(1.5, 0.0); 3]);
        let complex = pack_lanes(&[1.5], Packing::Complex, 2).unwrap();
        assert_eq!(unpack_slots(&complex, Packing::Complex, 4), vec![1.5; 4]);
    }

    #[test]
    fn capacity_enforced() {
        assert!(pack_lanes(&[0.0; 5], Packing::Real, 4).is_err());
        assert!(pack_lanes(&[0.0; 8], Packing::Complex, 4).is_ok());
        assert_eq!(Packing::from_complex_flag(true), Packing::Complex);
    }
}
