//! Tensor variant model
//!
//! A [`GridTensor`] is the session-wide handle to a tensor-like object:
//! - `Local` directly owns numeric data,
//! - `Pointer` references data living on another worker,
//! - `Shared` maps each party to its pointer over an additive share.
//!
//! Exactly one variant holds at a time; a tensor is never simultaneously
//! local data and a pointer.

pub mod raw;
pub mod wire;

use crate::error::{GridError, Result};
use crate::worker::WorkerId;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use raw::{Dtype, Operand, RawTensor, Scalar};
pub use wire::TensorMsg;

/// Unique integer identifying a tensor-like object within a worker registry.
pub type ObjectId = u64;

/// Draw a fresh random object id.
pub fn random_object_id() -> ObjectId {
    rand::thread_rng().gen_range(0..10_000_000_000)
}

/// A reference to an object held by another worker. Carries no payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRef {
    pub location: WorkerId,
    pub id_at_location: ObjectId,
    pub torch_type: Dtype,
}

/// The representation behind a tensor handle.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorRepr {
    /// Directly owned numeric data.
    Local(RawTensor),
    /// A weak back-reference to data owned by another worker.
    Pointer(RemoteRef),
    /// One pointer per party over an additive secret sharing. The shares,
    /// summed modulo the field, reconstruct the plaintext.
    Shared {
        shares: BTreeMap<WorkerId, RemoteRef>,
        shape: (usize, usize),
    },
}

/// A tensor handle: identity, bookkeeping owner and representation.
#[derive(Debug, Clone, PartialEq)]
pub struct GridTensor {
    pub id: ObjectId,
    pub owner: WorkerId,
    pub repr: TensorRepr,
}

impl GridTensor {
    /// Wrap raw data in a fresh local handle owned by `owner`.
    pub fn local(data: RawTensor, owner: impl Into<WorkerId>) -> Self {
        Self {
            id: random_object_id(),
            owner: owner.into(),
            repr: TensorRepr::Local(data),
        }
    }

    /// A pointer handle to `id_at_location` on `location`.
    pub fn pointer(remote: RemoteRef, owner: impl Into<WorkerId>) -> Self {
        Self {
            id: random_object_id(),
            owner: owner.into(),
            repr: TensorRepr::Pointer(remote),
        }
    }

    /// A secret-shared handle over one pointer per party.
    pub fn shared(
        shares: BTreeMap<WorkerId, RemoteRef>,
        shape: (usize, usize),
        owner: impl Into<WorkerId>,
    ) -> Self {
        Self {
            id: random_object_id(),
            owner: owner.into(),
            repr: TensorRepr::Shared { shares, shape },
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.repr, TensorRepr::Local(_))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.repr, TensorRepr::Pointer(_))
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.repr, TensorRepr::Shared { .. })
    }

    /// Borrow the local payload, failing if the handle does not own data.
    pub fn data(&self) -> Result<&RawTensor> {
        match &self.repr {
            TensorRepr::Local(raw) => Ok(raw),
            _ => Err(GridError::OwnershipConflict(format!(
                "tensor {} holds no local data",
                self.id
            ))),
        }
    }

    /// Borrow the remote reference, failing if the handle is not a pointer.
    pub fn remote(&self) -> Result<&RemoteRef> {
        match &self.repr {
            TensorRepr::Pointer(remote) => Ok(remote),
            _ => Err(GridError::OwnershipConflict(format!(
                "tensor {} is not a pointer",
                self.id
            ))),
        }
    }

    /// Borrow the share map, failing if the handle is not secret-shared.
    pub fn shares(&self) -> Result<&BTreeMap<WorkerId, RemoteRef>> {
        match &self.repr {
            TensorRepr::Shared { shares, .. } => Ok(shares),
            _ => Err(GridError::OwnershipConflict(format!(
                "tensor {} is not secret-shared",
                self.id
            ))),
        }
    }

    /// Shape of the plaintext behind a secret-shared handle.
    pub fn share_shape(&self) -> Result<(usize, usize)> {
        match &self.repr {
            TensorRepr::Shared { shape, .. } => Ok(*shape),
            _ => Err(GridError::OwnershipConflict(format!(
                "tensor {} is not secret-shared",
                self.id
            ))),
        }
    }

    pub fn dtype(&self) -> Dtype {
        match &self.repr {
            TensorRepr::Local(raw) => raw.dtype(),
            TensorRepr::Pointer(remote) => remote.torch_type,
            TensorRepr::Shared { .. } => Dtype::Long,
        }
    }

    /// The id under which the object is known on the worker that executes
    /// commands against it: `id_at_location` for pointers, `id` otherwise.
    pub fn remote_id(&self) -> ObjectId {
        match &self.repr {
            TensorRepr::Pointer(remote) => remote.id_at_location,
            _ => self.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_one_variant() {
        let local = GridTensor::local(RawTensor::long_row(&[1, 2, 3]), "alice");
        assert!(local.is_local() && !local.is_pointer() && !local.is_shared());
        assert!(local.data().is_ok());
        assert!(local.remote().is_err());

        let ptr = GridTensor::pointer(
            RemoteRef {
                location: "bob".into(),
                id_at_location: 42,
                torch_type: Dtype::Long,
            },
            "alice",
        );
        assert!(ptr.is_pointer() && !ptr.is_local());
        assert!(ptr.data().is_err());
        assert_eq!(ptr.remote_id(), 42);
    }

    #[test]
    fn test_shared_share_map() {
        let mut shares = BTreeMap::new();
        shares.insert(
            "alice".to_string(),
            RemoteRef {
                location: "alice".into(),
                id_at_location: 1,
                torch_type: Dtype::Long,
            },
        );
        shares.insert(
            "bob".to_string(),
            RemoteRef {
                location: "bob".into(),
                id_at_location: 2,
                torch_type: Dtype::Long,
            },
        );
        let t = GridTensor::shared(shares, (1, 3), "client");
        assert!(t.is_shared());
        assert_eq!(t.shares().unwrap().len(), 2);
        assert_eq!(t.share_shape().unwrap(), (1, 3));
        assert_eq!(t.dtype(), Dtype::Long);
    }
}
