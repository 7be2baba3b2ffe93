//! Wire envelopes for worker-to-worker messaging
//!
//! Every request is a `{"type": ..., "message": ...}` object, encoded as
//! newline-terminated UTF-8 JSON. Delivery is synchronous request/response;
//! remote failures come back inside the response payload rather than on a
//! separate exception channel.

use crate::error::{GridError, Result};
use crate::protocol::Command;
use crate::tensor::{ObjectId, TensorMsg};
use serde::{Deserialize, Serialize};

/// A request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum Envelope {
    /// Transfer a serialized tensor; the receiver registers it as its own.
    #[serde(rename = "obj")]
    Obj(TensorMsg),
    /// Ask for the object behind an id; the receiver hands it over.
    #[serde(rename = "req_obj")]
    ReqObj(ObjectId),
    /// Execute a tensor command against locally-resolved operands.
    #[serde(rename = "torch_cmd")]
    TorchCmd(Command),
    /// An ordered bundle of sub-messages, answered in the same order.
    #[serde(rename = "composite")]
    Composite(Vec<Envelope>),
}

/// A response envelope, mirroring the request kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum Response {
    /// A full serialized object (answer to `req_obj`).
    #[serde(rename = "obj")]
    Obj(TensorMsg),
    /// A pointer descriptor to a result that stays where it was computed.
    #[serde(rename = "pointer")]
    Pointer(TensorMsg),
    /// Ordered results of a composite request.
    #[serde(rename = "composite")]
    Composite(Vec<Response>),
    /// A remote-side failure, reported as payload.
    #[serde(rename = "error")]
    Error(String),
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn decode<T: for<'de> Deserialize<'de>>(line: &[u8], what: &str) -> Result<T> {
    serde_json::from_slice(line)
        .map_err(|e| GridError::ProtocolViolation(format!("malformed {what}: {e}")))
}

impl Envelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    pub fn from_bytes(line: &[u8]) -> Result<Self> {
        decode(line, "message envelope")
    }
}

impl Response {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    pub fn from_bytes(line: &[u8]) -> Result<Self> {
        decode(line, "response envelope")
    }

    /// Surface a remote-side error as a local failure.
    pub fn into_result(self) -> Result<Response> {
        match self {
            Response::Error(message) => Err(GridError::Remote(message)),
            other => Ok(other),
        }
    }
}
