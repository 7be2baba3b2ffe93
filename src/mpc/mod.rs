//! Secure two-party computation over distributed tensors
//!
//! - [`fixed`]: fixed-point encoding into the SPDZ field,
//! - [`share`]: additive secret sharing and reconstruction,
//! - [`spdz`]: the client-driven protocol over remote shares.

pub mod fixed;
pub mod share;
pub mod spdz;

pub use fixed::{BASE, PRECISION_FRACTIONAL, Q, Q_BITS};
pub use spdz::{Party, SpdzContext};
