//! RawTensor — the numeric payload behind a local tensor
//!
//! A dtype-tagged wrapper over nalgebra matrices. This is the boundary to
//! the numeric collaborator: elementwise math, matrix product, shape
//! queries and row-major flattening. Long tensors use wrapping arithmetic
//! throughout; the SPDZ field modulus is a power of two, so reduction
//! after a wrapped product stays exact.

use crate::error::{GridError, Result};
use nalgebra::DMatrix;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Element type tag, carried on the wire as `torch_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dtype {
    #[serde(rename = "tensorgrid.FloatTensor")]
    Float,
    #[serde(rename = "tensorgrid.LongTensor")]
    Long,
}

impl Dtype {
    pub fn tag(&self) -> &'static str {
        match self {
            Dtype::Float => "tensorgrid.FloatTensor",
            Dtype::Long => "tensorgrid.LongTensor",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "tensorgrid.FloatTensor" => Ok(Dtype::Float),
            "tensorgrid.LongTensor" => Ok(Dtype::Long),
            other => Err(GridError::ProtocolViolation(format!(
                "unknown tensor dtype tag '{other}'"
            ))),
        }
    }
}

/// A scalar command operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
}

impl Scalar {
    fn as_i64(&self, op: &str) -> Result<i64> {
        match self {
            Scalar::Int(v) => Ok(*v),
            Scalar::Float(_) => Err(GridError::UnsupportedOperation(format!(
                "{op} on a LongTensor requires an integer scalar"
            ))),
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            Scalar::Int(v) => *v as f64,
            Scalar::Float(v) => *v,
        }
    }
}

/// A resolved command operand: another tensor or a plain scalar.
#[derive(Debug, Clone)]
pub enum Operand {
    Tensor(RawTensor),
    Scalar(Scalar),
}

/// Directly-owned numeric data.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTensor {
    Float(DMatrix<f64>),
    Long(DMatrix<i64>),
}

impl RawTensor {
    /// Build a 1×n float row vector.
    pub fn float_row(values: &[f64]) -> Self {
        RawTensor::Float(DMatrix::from_row_slice(1, values.len(), values))
    }

    /// Build a 1×n long row vector.
    pub fn long_row(values: &[i64]) -> Self {
        RawTensor::Long(DMatrix::from_row_slice(1, values.len(), values))
    }

    pub fn float_from_rows(rows: usize, cols: usize, values: &[f64]) -> Self {
        RawTensor::Float(DMatrix::from_row_slice(rows, cols, values))
    }

    pub fn long_from_rows(rows: usize, cols: usize, values: &[i64]) -> Self {
        RawTensor::Long(DMatrix::from_row_slice(rows, cols, values))
    }

    /// A long tensor of zeros.
    pub fn long_zeros(rows: usize, cols: usize) -> Self {
        RawTensor::Long(DMatrix::zeros(rows, cols))
    }

    /// A float tensor filled with a single value.
    pub fn float_fill(rows: usize, cols: usize, value: f64) -> Self {
        RawTensor::Float(DMatrix::from_element(rows, cols, value))
    }

    /// A long tensor with entries drawn uniformly from `[0, modulus)`.
    pub fn random_long(rows: usize, cols: usize, modulus: i64) -> Self {
        let mut rng = rand::thread_rng();
        RawTensor::Long(DMatrix::from_fn(rows, cols, |_, _| {
            rng.gen_range(0..modulus)
        }))
    }

    pub fn dtype(&self) -> Dtype {
        match self {
            RawTensor::Float(_) => Dtype::Float,
            RawTensor::Long(_) => Dtype::Long,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        match self {
            RawTensor::Float(m) => (m.nrows(), m.ncols()),
            RawTensor::Long(m) => (m.nrows(), m.ncols()),
        }
    }

    pub fn len(&self) -> usize {
        let (r, c) = self.shape();
        r * c
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten to a row-major list of numerics, the wire `data` field.
    pub fn to_flat(&self) -> Vec<f64> {
        let (rows, cols) = self.shape();
        let mut out = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                out.push(match self {
                    RawTensor::Float(m) => m[(r, c)],
                    RawTensor::Long(m) => m[(r, c)] as f64,
                });
            }
        }
        out
    }

    /// Rebuild from a row-major flat list, the inverse of [`to_flat`].
    pub fn from_flat(dtype: Dtype, rows: usize, cols: usize, data: &[f64]) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(GridError::ProtocolViolation(format!(
                "flat data of length {} does not fill a {}x{} tensor",
                data.len(),
                rows,
                cols
            )));
        }
        Ok(match dtype {
            Dtype::Float => RawTensor::Float(DMatrix::from_fn(rows, cols, |r, c| data[r * cols + c])),
            Dtype::Long => {
                RawTensor::Long(DMatrix::from_fn(rows, cols, |r, c| data[r * cols + c] as i64))
            }
        })
    }

    fn check_shape(&self, other: &RawTensor) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(GridError::DimensionMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        Ok(())
    }

    fn zip_long(
        &self,
        other: &RawTensor,
        op: &str,
        f: impl Fn(i64, i64) -> i64,
        g: impl Fn(f64, f64) -> f64,
    ) -> Result<RawTensor> {
        self.check_shape(other)?;
        match (self, other) {
            (RawTensor::Long(a), RawTensor::Long(b)) => Ok(RawTensor::Long(a.zip_map(b, f))),
            (RawTensor::Float(a), RawTensor::Float(b)) => Ok(RawTensor::Float(a.zip_map(b, g))),
            _ => Err(GridError::UnsupportedOperation(format!(
                "{op} between mixed dtypes"
            ))),
        }
    }

    /// Elementwise addition.
    pub fn add(&self, other: &RawTensor) -> Result<RawTensor> {
        self.zip_long(other, "__add__", i64::wrapping_add, |a, b| a + b)
    }

    /// Elementwise subtraction.
    pub fn sub(&self, other: &RawTensor) -> Result<RawTensor> {
        self.zip_long(other, "__sub__", i64::wrapping_sub, |a, b| a - b)
    }

    /// Elementwise (Hadamard) product.
    pub fn mul(&self, other: &RawTensor) -> Result<RawTensor> {
        self.zip_long(other, "__mul__", i64::wrapping_mul, |a, b| a * b)
    }

    pub fn add_scalar(&self, s: Scalar) -> Result<RawTensor> {
        match self {
            RawTensor::Long(m) => {
                let v = s.as_i64("__add__")?;
                Ok(RawTensor::Long(m.map(|x| x.wrapping_add(v))))
            }
            RawTensor::Float(m) => Ok(RawTensor::Float(m.map(|x| x + s.as_f64()))),
        }
    }

    pub fn sub_scalar(&self, s: Scalar) -> Result<RawTensor> {
        match self {
            RawTensor::Long(m) => {
                let v = s.as_i64("__sub__")?;
                Ok(RawTensor::Long(m.map(|x| x.wrapping_sub(v))))
            }
            RawTensor::Float(m) => Ok(RawTensor::Float(m.map(|x| x - s.as_f64()))),
        }
    }

    /// Scalar-minus-tensor, used for the modular complement `Q - x`.
    pub fn rsub_scalar(&self, s: Scalar) -> Result<RawTensor> {
        match self {
            RawTensor::Long(m) => {
                let v = s.as_i64("__rsub__")?;
                Ok(RawTensor::Long(m.map(|x| v.wrapping_sub(x))))
            }
            RawTensor::Float(m) => Ok(RawTensor::Float(m.map(|x| s.as_f64() - x))),
        }
    }

    pub fn mul_scalar(&self, s: Scalar) -> Result<RawTensor> {
        match self {
            RawTensor::Long(m) => {
                let v = s.as_i64("__mul__")?;
                Ok(RawTensor::Long(m.map(|x| x.wrapping_mul(v))))
            }
            RawTensor::Float(m) => Ok(RawTensor::Float(m.map(|x| x * s.as_f64()))),
        }
    }

    /// Elementwise euclidean remainder against a scalar modulus.
    pub fn mod_scalar(&self, s: Scalar) -> Result<RawTensor> {
        match self {
            RawTensor::Long(m) => {
                let v = s.as_i64("__mod__")?;
                Ok(RawTensor::Long(m.map(|x| x.rem_euclid(v))))
            }
            RawTensor::Float(m) => Ok(RawTensor::Float(m.map(|x| x.rem_euclid(s.as_f64())))),
        }
    }

    /// Elementwise flooring division by a scalar.
    pub fn floordiv_scalar(&self, s: Scalar) -> Result<RawTensor> {
        match self {
            RawTensor::Long(m) => {
                let v = s.as_i64("__floordiv__")?;
                Ok(RawTensor::Long(m.map(|x| x.div_euclid(v))))
            }
            RawTensor::Float(m) => Ok(RawTensor::Float(m.map(|x| (x / s.as_f64()).floor()))),
        }
    }

    pub fn neg(&self) -> RawTensor {
        match self {
            RawTensor::Long(m) => RawTensor::Long(m.map(|x| x.wrapping_neg())),
            RawTensor::Float(m) => RawTensor::Float(m.map(|x| -x)),
        }
    }

    /// Matrix product `(m×k)·(k×n)`. Long products accumulate in i128 and
    /// wrap into i64, which is exact modulo any power-of-two field.
    pub fn matmul(&self, other: &RawTensor) -> Result<RawTensor> {
        let (m, k) = self.shape();
        let (k2, n) = other.shape();
        if k != k2 {
            return Err(GridError::DimensionMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        match (self, other) {
            (RawTensor::Float(a), RawTensor::Float(b)) => Ok(RawTensor::Float(a * b)),
            (RawTensor::Long(a), RawTensor::Long(b)) => {
                let out = DMatrix::from_fn(m, n, |r, c| {
                    let mut acc: i128 = 0;
                    for i in 0..k {
                        acc = acc.wrapping_add((a[(r, i)] as i128).wrapping_mul(b[(i, c)] as i128));
                    }
                    acc as i64
                });
                Ok(RawTensor::Long(out))
            }
            _ => Err(GridError::UnsupportedOperation(
                "mm between mixed dtypes".to_string(),
            )),
        }
    }

    /// Execute a named tensor command against an optional operand. This is
    /// the receiver-side dispatch behind `torch_cmd` messages.
    pub fn apply(&self, op: &str, operand: Option<&Operand>) -> Result<RawTensor> {
        match (op, operand) {
            ("__neg__", None) => Ok(self.neg()),
            ("__add__", Some(Operand::Tensor(t))) => self.add(t),
            ("__add__", Some(Operand::Scalar(s))) => self.add_scalar(*s),
            ("__sub__", Some(Operand::Tensor(t))) => self.sub(t),
            ("__sub__", Some(Operand::Scalar(s))) => self.sub_scalar(*s),
            ("__mul__", Some(Operand::Tensor(t))) => self.mul(t),
            ("__mul__", Some(Operand::Scalar(s))) => self.mul_scalar(*s),
            ("__rsub__", Some(Operand::Scalar(s))) => self.rsub_scalar(*s),
            ("__mod__", Some(Operand::Scalar(s))) => self.mod_scalar(*s),
            ("__floordiv__", Some(Operand::Scalar(s))) => self.floordiv_scalar(*s),
            ("mm", Some(Operand::Tensor(t))) => self.matmul(t),
            _ => Err(GridError::UnsupportedOperation(format!(
                "{op} with the given operands"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_roundtrip_row_major() {
        let t = RawTensor::long_from_rows(2, 3, &[1, 2, 3, 4, 5, 6]);
        let flat = t.to_flat();
        assert_eq!(flat, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let back = RawTensor::from_flat(Dtype::Long, 2, 3, &flat).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_elementwise_ops() {
        let a = RawTensor::long_row(&[1, 2, 3]);
        let b = RawTensor::long_row(&[10, 20, 30]);
        assert_eq!(a.add(&b).unwrap(), RawTensor::long_row(&[11, 22, 33]));
        assert_eq!(b.sub(&a).unwrap(), RawTensor::long_row(&[9, 18, 27]));
        assert_eq!(a.mul(&b).unwrap(), RawTensor::long_row(&[10, 40, 90]));
    }

    #[test]
    fn test_shape_mismatch() {
        let a = RawTensor::long_row(&[1, 2, 3]);
        let b = RawTensor::long_row(&[1, 2]);
        assert!(matches!(
            a.add(&b),
            Err(GridError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_mixed_dtype_rejected() {
        let a = RawTensor::long_row(&[1, 2]);
        let b = RawTensor::float_row(&[1.0, 2.0]);
        assert!(matches!(
            a.mul(&b),
            Err(GridError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_matmul() {
        let a = RawTensor::long_from_rows(2, 2, &[1, 2, 3, 4]);
        let b = RawTensor::long_from_rows(2, 2, &[5, 6, 7, 8]);
        let c = a.matmul(&b).unwrap();
        assert_eq!(c, RawTensor::long_from_rows(2, 2, &[19, 22, 43, 50]));
    }

    #[test]
    fn test_matmul_dimension_mismatch() {
        let a = RawTensor::long_from_rows(2, 3, &[1, 2, 3, 4, 5, 6]);
        let b = RawTensor::long_from_rows(2, 2, &[1, 2, 3, 4]);
        assert!(matches!(
            a.matmul(&b),
            Err(GridError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_scalar_ops() {
        let a = RawTensor::long_row(&[10, 21]);
        assert_eq!(
            a.mod_scalar(Scalar::Int(8)).unwrap(),
            RawTensor::long_row(&[2, 5])
        );
        assert_eq!(
            a.floordiv_scalar(Scalar::Int(4)).unwrap(),
            RawTensor::long_row(&[2, 5])
        );
        assert_eq!(
            a.rsub_scalar(Scalar::Int(100)).unwrap(),
            RawTensor::long_row(&[90, 79])
        );
    }

    #[test]
    fn test_apply_dispatch() {
        let a = RawTensor::long_row(&[1, 2]);
        let b = RawTensor::long_row(&[3, 4]);
        let out = a.apply("__add__", Some(&Operand::Tensor(b))).unwrap();
        assert_eq!(out, RawTensor::long_row(&[4, 6]));
        assert!(a.apply("cat", None).is_err());
    }

    #[test]
    fn test_random_long_in_range() {
        let t = RawTensor::random_long(4, 4, 1 << 31);
        if let RawTensor::Long(m) = t {
            assert!(m.iter().all(|&v| (0..(1 << 31)).contains(&v)));
        } else {
            panic!("expected long tensor");
        }
    }
}
