//! Fixed-point encoding over the SPDZ field
//!
//! Real values are scaled by `BASE^PRECISION_FRACTIONAL`, floored and
//! reduced into `[0, Q)`. Negative values occupy the upper half of the
//! field; decoding treats anything above `Q/2` as negative. Q is a power
//! of two, so wrapping i64 arithmetic followed by reduction stays exact.

use crate::error::{GridError, Result};
use crate::tensor::RawTensor;

pub const BASE: i64 = 2;
pub const PRECISION_FRACTIONAL: u32 = 8;
pub const Q_BITS: u32 = 31;
/// The field modulus all shares live in.
pub const Q: i64 = 1 << Q_BITS;

/// The scaling factor for a given fractional precision.
pub fn scale(precision: u32) -> i64 {
    BASE.pow(precision)
}

/// Encode a float tensor into field-resident fixed-point longs.
pub fn encode(t: &RawTensor, precision: u32) -> Result<RawTensor> {
    let s = scale(precision) as f64;
    match t {
        RawTensor::Float(m) => Ok(RawTensor::Long(
            m.map(|v| ((v * s).floor() as i64).rem_euclid(Q)),
        )),
        RawTensor::Long(_) => Err(GridError::UnsupportedOperation(
            "fixed-point encode of an already-encoded LongTensor".to_string(),
        )),
    }
}

/// Decode field-resident fixed-point longs back into floats.
pub fn decode(t: &RawTensor, precision: u32) -> Result<RawTensor> {
    let s = scale(precision) as f64;
    match t {
        RawTensor::Long(m) => Ok(RawTensor::Float(m.map(|v| {
            let v = v.rem_euclid(Q);
            let signed = if v > Q / 2 { v - Q } else { v };
            signed as f64 / s
        }))),
        RawTensor::Float(_) => Err(GridError::UnsupportedOperation(
            "fixed-point decode of a FloatTensor".to_string(),
        )),
    }
}
