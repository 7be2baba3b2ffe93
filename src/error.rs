//! Error taxonomy for the tensorgrid crate
//!
//! Local validation errors (bad refs, disallowed operators) are raised
//! before any message is sent. Remote-side execution errors travel back
//! inside the response payload and surface as [`GridError::Remote`].

use crate::tensor::ObjectId;
use crate::worker::WorkerId;

pub type Result<T> = std::result::Result<T, GridError>;

#[derive(Debug, thiserror::Error)]
pub enum GridError {
    /// An object id was looked up in a registry that does not hold it.
    #[error("object {0} not found in registry")]
    NotFound(ObjectId),

    /// The pointer/local invariant was violated, e.g. a pointer claiming
    /// to live on the worker that registered it.
    #[error("ownership conflict: {0}")]
    OwnershipConflict(String),

    /// The operator is not in the allowed command set.
    #[error("operation '{0}' is not a supported tensor command")]
    UnsupportedOperation(String),

    /// Algebraic shape incompatibility.
    #[error("dimension mismatch: {left:?} vs {right:?}")]
    DimensionMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },

    /// Malformed envelope, unknown message type, or a share layout that
    /// does not match the declared party count.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A worker id could not be resolved to a known peer.
    #[error("unknown worker '{0}'")]
    UnknownWorker(WorkerId),

    /// A peer id collision occurred while the worker runs in strict mode.
    #[error("worker id '{0}' is already registered")]
    PeerCollision(WorkerId),

    /// An error reported by the remote side of a request.
    #[error("remote error: {0}")]
    Remote(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
