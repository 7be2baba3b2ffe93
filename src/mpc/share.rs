//! Additive two-party secret sharing
//!
//! A secret splits into a uniformly random field element and the modular
//! difference; neither share alone reveals anything, their sum modulo the
//! field is the secret.

use crate::error::{GridError, Result};
use crate::tensor::{RawTensor, Scalar};

/// Split a field-encoded secret into two additive shares.
pub fn share(secret: &RawTensor, modulus: i64) -> Result<(RawTensor, RawTensor)> {
    if !matches!(secret, RawTensor::Long(_)) {
        return Err(GridError::UnsupportedOperation(
            "secret sharing requires a field-encoded LongTensor".to_string(),
        ));
    }
    let (rows, cols) = secret.shape();
    let first = RawTensor::random_long(rows, cols, modulus);
    let second = secret.sub(&first)?.mod_scalar(Scalar::Int(modulus))?;
    Ok((first, second))
}

/// Sum shares back into the secret, reducing into the field.
pub fn reconstruct(shares: &[RawTensor], modulus: i64) -> Result<RawTensor> {
    let mut iter = shares.iter();
    let first = iter.next().ok_or_else(|| {
        GridError::ProtocolViolation("cannot reconstruct from zero shares".to_string())
    })?;
    let mut acc = first.clone();
    for s in iter {
        acc = acc.add(s)?;
    }
    acc.mod_scalar(Scalar::Int(modulus))
}
