//! tensorgrid — distributed tensor ownership and secure computation
//!
//! Tensors live on workers; handles are local data, pointers to remote
//! data, or secret sharings across parties. Workers exchange objects and
//! commands over a newline-delimited JSON protocol, and an SPDZ-style
//! context runs private arithmetic over the shares.

pub mod error;
pub mod mpc;
pub mod protocol;
pub mod tensor;
pub mod worker;

pub use error::{GridError, Result};
pub use mpc::{Party, SpdzContext};
pub use tensor::{Dtype, GridTensor, RawTensor, RemoteRef, TensorRepr};
pub use worker::{connect, VirtualChannel, Worker, WorkerConfig};
