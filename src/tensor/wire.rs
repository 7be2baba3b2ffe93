//! Serialization contract for tensor handles
//!
//! What crosses the wire is a structural descriptor, not an in-memory
//! representation: `{type, id, owner, child}` with recursion stopping at
//! the raw-tensor boundary, where the flattened numeric payload and dtype
//! tag are embedded instead. A type tag selects the variant constructor
//! on the way back in.

use crate::error::{GridError, Result};
use crate::tensor::{Dtype, GridTensor, ObjectId, RawTensor, RemoteRef, TensorRepr};
use crate::worker::WorkerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const LOCAL_TAG: &str = "tensorgrid.LocalTensor";
pub const POINTER_TAG: &str = "tensorgrid.PointerTensor";
pub const SHARED_TAG: &str = "tensorgrid.SharedTensor";

/// The wire descriptor for every tensor variant. Leaf descriptors carry
/// `data` and `shape` and omit `child`; pointer descriptors carry
/// `location`, `id_at_location` and `torch_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorMsg {
    #[serde(rename = "type")]
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<WorkerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child: Option<Box<TensorMsg>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<(usize, usize)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<WorkerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_at_location: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub torch_type: Option<Dtype>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shares: Option<BTreeMap<WorkerId, TensorMsg>>,
}

impl TensorMsg {
    fn empty(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            id: None,
            owner: None,
            child: None,
            data: None,
            shape: None,
            location: None,
            id_at_location: None,
            torch_type: None,
            shares: None,
        }
    }
}

fn leaf(raw: &RawTensor, include_data: bool) -> TensorMsg {
    let mut msg = TensorMsg::empty(raw.dtype().tag());
    msg.shape = Some(raw.shape());
    if include_data {
        msg.data = Some(raw.to_flat());
    }
    msg
}

fn pointer_msg(remote: &RemoteRef) -> TensorMsg {
    let mut msg = TensorMsg::empty(POINTER_TAG);
    msg.location = Some(remote.location.clone());
    msg.id_at_location = Some(remote.id_at_location);
    msg.torch_type = Some(remote.torch_type);
    msg
}

/// Serialize a tensor handle into its wire descriptor.
pub fn ser(tensor: &GridTensor, include_data: bool) -> TensorMsg {
    let mut msg = match &tensor.repr {
        TensorRepr::Local(raw) => {
            let mut m = TensorMsg::empty(LOCAL_TAG);
            m.child = Some(Box::new(leaf(raw, include_data)));
            m
        }
        TensorRepr::Pointer(remote) => pointer_msg(remote),
        TensorRepr::Shared { shares, shape } => {
            let mut m = TensorMsg::empty(SHARED_TAG);
            m.shape = Some(*shape);
            m.shares = Some(
                shares
                    .iter()
                    .map(|(party, remote)| (party.clone(), pointer_msg(remote)))
                    .collect(),
            );
            m
        }
    };
    msg.id = Some(tensor.id);
    msg.owner = Some(tensor.owner.clone());
    msg
}

/// A pointer descriptor at a locally-held object, the canonical response
/// to a remote command: the result stays where it was computed.
pub fn pointer_to(tensor: &GridTensor) -> TensorMsg {
    let mut msg = pointer_msg(&RemoteRef {
        location: tensor.owner.clone(),
        id_at_location: tensor.id,
        torch_type: tensor.dtype(),
    });
    msg.id = Some(tensor.id);
    msg.owner = Some(tensor.owner.clone());
    msg
}

fn require<T>(field: Option<T>, name: &str, tag: &str) -> Result<T> {
    field.ok_or_else(|| {
        GridError::ProtocolViolation(format!("descriptor '{tag}' is missing field '{name}'"))
    })
}

fn deser_remote_ref(msg: &TensorMsg) -> Result<RemoteRef> {
    Ok(RemoteRef {
        location: require(msg.location.clone(), "location", &msg.tag)?,
        id_at_location: require(msg.id_at_location, "id_at_location", &msg.tag)?,
        torch_type: require(msg.torch_type, "torch_type", &msg.tag)?,
    })
}

/// Reconstruct a tensor handle from its wire descriptor. The type tag
/// selects the variant constructor; an unknown tag is a protocol violation.
pub fn deser(msg: &TensorMsg) -> Result<GridTensor> {
    let repr = match msg.tag.as_str() {
        LOCAL_TAG => {
            let child = require(msg.child.as_deref(), "child", LOCAL_TAG)?;
            let dtype = Dtype::from_tag(&child.tag)?;
            let (rows, cols) = require(child.shape, "shape", &child.tag)?;
            let data = require(child.data.as_deref(), "data", &child.tag)?;
            TensorRepr::Local(RawTensor::from_flat(dtype, rows, cols, data)?)
        }
        POINTER_TAG => TensorRepr::Pointer(deser_remote_ref(msg)?),
        SHARED_TAG => {
            let shares = require(msg.shares.as_ref(), "shares", SHARED_TAG)?;
            let shape = require(msg.shape, "shape", SHARED_TAG)?;
            let mut map = BTreeMap::new();
            for (party, share) in shares {
                map.insert(party.clone(), deser_remote_ref(share)?);
            }
            TensorRepr::Shared { shares: map, shape }
        }
        other => {
            return Err(GridError::ProtocolViolation(format!(
                "unknown tensor descriptor type '{other}'"
            )))
        }
    };
    Ok(GridTensor {
        id: require(msg.id, "id", &msg.tag)?,
        owner: require(msg.owner.clone(), "owner", &msg.tag)?,
        repr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_roundtrip_preserves_identity() {
        let t = GridTensor::local(RawTensor::long_row(&[1, 2, 3, 4, 5]), "alice");
        let msg = ser(&t, true);
        assert_eq!(msg.tag, LOCAL_TAG);
        let back = deser(&msg).unwrap();
        assert_eq!(back.id, t.id);
        assert_eq!(back.owner, "alice");
        assert_eq!(back.data().unwrap(), t.data().unwrap());
    }

    #[test]
    fn test_leaf_embeds_flattened_payload() {
        let t = GridTensor::local(RawTensor::long_from_rows(2, 2, &[1, 2, 3, 4]), "a");
        let msg = ser(&t, true);
        let child = msg.child.unwrap();
        assert_eq!(child.tag, Dtype::Long.tag());
        assert_eq!(child.data.unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(child.shape.unwrap(), (2, 2));
    }

    #[test]
    fn test_ser_without_data() {
        let t = GridTensor::local(RawTensor::long_row(&[1, 2, 3]), "a");
        let msg = ser(&t, false);
        let child = msg.child.unwrap();
        assert!(child.data.is_none());
        assert_eq!(child.shape.unwrap(), (1, 3));
    }

    #[test]
    fn test_pointer_roundtrip() {
        let t = GridTensor::pointer(
            RemoteRef {
                location: "bob".into(),
                id_at_location: 77,
                torch_type: Dtype::Float,
            },
            "alice",
        );
        let msg = ser(&t, true);
        assert_eq!(msg.tag, POINTER_TAG);
        assert_eq!(msg.location.as_deref(), Some("bob"));
        let back = deser(&msg).unwrap();
        assert_eq!(back.remote().unwrap().id_at_location, 77);
    }

    #[test]
    fn test_shared_roundtrip() {
        let mut shares = BTreeMap::new();
        for (party, id) in [("alice", 1u64), ("bob", 2u64)] {
            shares.insert(
                party.to_string(),
                RemoteRef {
                    location: party.to_string(),
                    id_at_location: id,
                    torch_type: Dtype::Long,
                },
            );
        }
        let t = GridTensor::shared(shares, (1, 4), "client");
        let back = deser(&ser(&t, true)).unwrap();
        assert_eq!(back.shares().unwrap(), t.shares().unwrap());
        assert_eq!(back.share_shape().unwrap(), (1, 4));
    }

    #[test]
    fn test_unknown_tag_is_protocol_violation() {
        let msg = TensorMsg::empty("tensorgrid.MysteryTensor");
        assert!(matches!(
            deser(&msg),
            Err(GridError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_json_shape_matches_contract() {
        let t = GridTensor::local(RawTensor::float_row(&[1.5]), "a");
        let json = serde_json::to_value(ser(&t, true)).unwrap();
        assert!(json.get("type").is_some());
        assert!(json.get("id").is_some());
        assert!(json.get("owner").is_some());
        assert!(json["child"].get("data").is_some());
        assert!(json["child"].get("child").is_none());
    }
}
