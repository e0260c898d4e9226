//! RNS polynomial ring backend.
mod basis;
mod poly;

pub use basis::{RingError, RingResult, RnsBasis, RnsBasisBuilder};
pub use poly::RnsPoly;
