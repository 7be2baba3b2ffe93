//! Worker — a logical endpoint owning an object registry
//!
//! A worker stores tensors, tracks known peers, and answers the four
//! message kinds of the protocol. All registry access is serialized
//! behind a single mutex; messaging is synchronous request/response, so
//! a send blocks the caller until the peer's reply arrives.

use crate::error::{GridError, Result};
use crate::protocol::{
    command_guard, compile_command, parse_arg, parse_ref, Command, CommandArg, Envelope, ParsedArg,
    Response,
};
use crate::tensor::{wire, GridTensor, ObjectId, Operand, RawTensor, RemoteRef, TensorRepr};
use crate::worker::channel::Channel;
use crate::worker::registry::ObjectRegistry;
use crate::worker::WorkerId;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Configuration for a worker endpoint.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker id; a random one is generated when unset.
    pub id: Option<String>,
    /// Client workers keep object lifecycle in the caller's hands and do
    /// not persist received objects unless forced.
    pub is_client: bool,
    /// Messages are batched into a composite once the outgoing queue
    /// reaches this size; 0 disables batching.
    pub queue_size: usize,
    /// Fail on peer-id collisions instead of replacing the old entry.
    pub strict_peers: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: None,
            is_client: false,
            queue_size: 0,
            strict_peers: false,
        }
    }
}

/// A logical endpoint able to hold tensors and exchange messages.
pub struct Worker {
    id: WorkerId,
    is_client: bool,
    queue_size: usize,
    strict_peers: bool,
    created_at: DateTime<Utc>,
    registry: Mutex<ObjectRegistry>,
    peers: Mutex<HashMap<WorkerId, Arc<dyn Channel>>>,
    queue: Mutex<Vec<Envelope>>,
}

impl Worker {
    pub fn new(config: WorkerConfig) -> Arc<Self> {
        let id = config
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        info!("creating worker '{}' (client={})", id, config.is_client);
        Arc::new(Self {
            registry: Mutex::new(ObjectRegistry::new(id.clone(), config.is_client)),
            id,
            is_client: config.is_client,
            queue_size: config.queue_size,
            strict_peers: config.strict_peers,
            created_at: Utc::now(),
            peers: Mutex::new(HashMap::new()),
            queue: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_client(&self) -> bool {
        self.is_client
    }

    /// Diagnostic descriptor for this worker.
    pub fn whoami(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "type": "tensorgrid.Worker",
            "is_client": self.is_client,
            "created_at": self.created_at.to_rfc3339(),
        })
    }

    fn registry(&self) -> MutexGuard<'_, ObjectRegistry> {
        self.registry.lock().expect("poisoned registry lock")
    }

    // ---- peer registry -------------------------------------------------

    /// Insert or replace a peer mapping. A collision replaces the old
    /// entry with a warning, or fails in strict mode.
    pub fn add_peer(&self, id: &str, channel: Arc<dyn Channel>) -> Result<()> {
        let mut peers = self.peers.lock().expect("poisoned peer lock");
        if peers.contains_key(id) {
            warn!(
                "worker '{}': peer id '{}' taken, replacing the existing mapping",
                self.id, id
            );
            if self.strict_peers {
                return Err(GridError::PeerCollision(id.to_string()));
            }
        }
        peers.insert(id.to_string(), channel);
        Ok(())
    }

    /// Resolve a worker id to its channel. References are stored as plain
    /// ids everywhere; resolution happens here, at send time.
    pub fn resolve_peer(&self, id: &str) -> Result<Arc<dyn Channel>> {
        self.peers
            .lock()
            .expect("poisoned peer lock")
            .get(id)
            .cloned()
            .ok_or_else(|| GridError::UnknownWorker(id.to_string()))
    }

    pub fn known_peers(&self) -> Vec<WorkerId> {
        self.peers
            .lock()
            .expect("poisoned peer lock")
            .keys()
            .cloned()
            .collect()
    }

    // ---- object registry facade ----------------------------------------

    pub fn register_tensor(
        &self,
        obj: GridTensor,
        id: Option<ObjectId>,
        force: bool,
        temporary: bool,
    ) -> Result<GridTensor> {
        self.registry().register(obj, id, None, force, temporary)
    }

    pub fn get_obj(&self, id: ObjectId) -> Result<GridTensor> {
        self.registry().get(id).cloned()
    }

    pub fn rm_obj(&self, id: ObjectId) -> Option<GridTensor> {
        self.registry().remove(id)
    }

    pub fn has_obj(&self, id: ObjectId) -> bool {
        self.registry().contains(id)
    }

    pub fn object_count(&self) -> usize {
        self.registry().len()
    }

    pub fn clear_tmp_objects(&self) {
        self.registry().clear_temporary();
    }

    /// Wrap raw data in a registered local tensor owned by this worker.
    pub fn tensor(&self, data: RawTensor) -> Result<GridTensor> {
        let obj = GridTensor::local(data, self.id.clone());
        self.register_tensor(obj, None, false, true)
    }

    // ---- messaging ------------------------------------------------------

    /// Send one envelope and block for the response. A remote-side error
    /// in the response payload surfaces as [`GridError::Remote`].
    pub fn send_msg(&self, envelope: Envelope, recipient: &str) -> Result<Response> {
        debug!("worker '{}' -> '{}': dispatching message", self.id, recipient);
        let channel = self.resolve_peer(recipient)?;
        let reply = channel.request(&envelope.to_bytes()?)?;
        Response::from_bytes(&reply)?.into_result()
    }

    /// Queue an envelope for batched delivery. Once the queue reaches the
    /// configured size it is flushed as one composite round trip; with
    /// batching disabled the message is sent immediately.
    pub fn queue_msg(
        &self,
        envelope: Envelope,
        recipient: &str,
    ) -> Result<Option<Vec<Response>>> {
        if self.queue_size == 0 {
            return Ok(Some(vec![self.send_msg(envelope, recipient)?]));
        }
        let ready = {
            let mut queue = self.queue.lock().expect("poisoned queue lock");
            queue.push(envelope);
            queue.len() >= self.queue_size
        };
        if ready {
            Ok(Some(self.flush_queue(recipient)?))
        } else {
            Ok(None)
        }
    }

    /// Flush any queued messages as a single composite request.
    pub fn flush_queue(&self, recipient: &str) -> Result<Vec<Response>> {
        let pending = {
            let mut queue = self.queue.lock().expect("poisoned queue lock");
            std::mem::take(&mut *queue)
        };
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        self.send_composite(pending, recipient)
    }

    /// Bundle several messages into one round trip; the response is the
    /// ordered list of individual results.
    pub fn send_composite(
        &self,
        envelopes: Vec<Envelope>,
        recipient: &str,
    ) -> Result<Vec<Response>> {
        match self.send_msg(Envelope::Composite(envelopes), recipient)? {
            Response::Composite(results) => Ok(results),
            other => Err(GridError::ProtocolViolation(format!(
                "composite request answered with a non-composite response: {other:?}"
            ))),
        }
    }

    /// Entry point for inbound messages: decode, process, encode. All
    /// processing failures are reported inside the response payload.
    pub fn receive_msg(&self, line: &[u8]) -> Result<Vec<u8>> {
        let response = match Envelope::from_bytes(line) {
            Ok(envelope) => self.process_envelope(envelope),
            Err(e) => Response::Error(e.to_string()),
        };
        response.to_bytes()
    }

    fn process_envelope(&self, envelope: Envelope) -> Response {
        let result = match envelope {
            Envelope::Obj(msg) => self.handle_obj(msg),
            Envelope::ReqObj(id) => self.handle_req_obj(id),
            Envelope::TorchCmd(cmd) => self.handle_command(cmd),
            Envelope::Composite(parts) => {
                return Response::Composite(
                    parts
                        .into_iter()
                        .map(|part| self.process_envelope(part))
                        .collect(),
                )
            }
        };
        result.unwrap_or_else(|e| Response::Error(e.to_string()))
    }

    /// `obj`: take ownership of a transferred object, force-attaching it
    /// to the permanent registry under its wire id.
    fn handle_obj(&self, msg: wire::TensorMsg) -> Result<Response> {
        let obj = wire::deser(&msg)?;
        info!(
            "worker '{}': receiving object {} from '{}'",
            self.id, obj.id, obj.owner
        );
        let id = obj.id;
        let registered = self.registry().register(obj, Some(id), None, true, false)?;
        Ok(Response::Pointer(wire::pointer_to(&registered)))
    }

    /// `req_obj`: hand the object over, removing it locally — ownership
    /// transfers to the requester.
    fn handle_req_obj(&self, id: ObjectId) -> Result<Response> {
        let obj = self.rm_obj(id).ok_or(GridError::NotFound(id))?;
        debug!("worker '{}': handing over object {}", self.id, id);
        Ok(Response::Obj(wire::ser(&obj, true)))
    }

    /// `torch_cmd`: resolve operand references against the local registry,
    /// execute, register the result, and answer with a pointer — the
    /// result stays where it was computed.
    fn handle_command(&self, cmd: Command) -> Result<Response> {
        command_guard(&cmd.command)?;
        if !cmd.has_self {
            return Err(GridError::ProtocolViolation(
                "command without a receiver".to_string(),
            ));
        }
        let self_ref = cmd.self_ref.as_deref().ok_or_else(|| {
            GridError::ProtocolViolation("has_self set but no self reference".to_string())
        })?;
        let receiver = self.get_obj(parse_ref(self_ref)?)?;
        let receiver_data = receiver.data()?;

        if cmd.args.len() > 1 {
            return Err(GridError::UnsupportedOperation(format!(
                "{} with {} arguments",
                cmd.command,
                cmd.args.len()
            )));
        }
        let operand = match cmd.args.first() {
            None => None,
            Some(value) => Some(match parse_arg(value)? {
                ParsedArg::Ref(id) => Operand::Tensor(self.get_obj(id)?.data()?.clone()),
                ParsedArg::Scalar(s) => Operand::Scalar(s),
            }),
        };

        let result = receiver_data.apply(&cmd.command, operand.as_ref())?;
        let registered =
            self.register_tensor(GridTensor::local(result, self.id.clone()), None, true, false)?;
        debug!(
            "worker '{}': executed {} -> object {}",
            self.id, cmd.command, registered.id
        );
        Ok(Response::Pointer(wire::pointer_to(&registered)))
    }

    // ---- tensor variant operations --------------------------------------

    /// Move a local tensor to another worker. The local payload is
    /// dropped and the same handle becomes a pointer at the destination.
    /// A failed transfer leaves the handle and registry entry untouched.
    pub fn send_tensor(&self, tensor: &mut GridTensor, destination: &str) -> Result<()> {
        let dtype = tensor.data()?.dtype();
        let msg = wire::ser(tensor, true);
        self.send_msg(Envelope::Obj(msg), destination)?;
        self.rm_obj(tensor.id);
        tensor.repr = TensorRepr::Pointer(RemoteRef {
            location: destination.to_string(),
            id_at_location: tensor.id,
            torch_type: dtype,
        });
        info!(
            "worker '{}': sent object {} to '{}'",
            self.id, tensor.id, destination
        );
        Ok(())
    }

    /// Fetch the data behind a pointer back from its location. The remote
    /// side gives the object up; the handle becomes local again.
    pub fn get_tensor(&self, tensor: &mut GridTensor) -> Result<()> {
        let remote = tensor.remote()?.clone();
        let (id, data) = self.request_raw(&remote.location, remote.id_at_location)?;
        tensor.id = id;
        tensor.owner = self.id.clone();
        tensor.repr = TensorRepr::Local(data);
        Ok(())
    }

    /// Request the object behind `id` from `location`, returning its id
    /// and payload. The object is registered through the temporary store
    /// and handed to the caller, then the temporary store is released.
    pub fn request_raw(&self, location: &str, id: ObjectId) -> Result<(ObjectId, RawTensor)> {
        let response = self.send_msg(Envelope::ReqObj(id), location)?;
        let msg = match response {
            Response::Obj(msg) => msg,
            other => {
                return Err(GridError::ProtocolViolation(format!(
                    "req_obj answered with {other:?}"
                )))
            }
        };
        let obj = wire::deser(&msg)?;
        let data = obj.data()?.clone();
        let obj_id = obj.id;
        self.registry().register(obj, Some(obj_id), None, false, true)?;
        self.clear_tmp_objects();
        Ok((obj_id, data))
    }

    /// Ask `location` to hand the object over and discard it: the remote
    /// entry is released without keeping the payload anywhere.
    pub fn release_remote(&self, location: &str, id: ObjectId) -> Result<()> {
        match self.send_msg(Envelope::ReqObj(id), location)? {
            Response::Obj(_) => Ok(()),
            other => Err(GridError::ProtocolViolation(format!(
                "req_obj answered with {other:?}"
            ))),
        }
    }

    /// Wrap raw data and move it to `destination`, returning the remote
    /// reference it now lives under.
    pub fn send_raw(&self, data: RawTensor, destination: &str) -> Result<RemoteRef> {
        let mut tensor = GridTensor::local(data, self.id.clone());
        self.send_tensor(&mut tensor, destination)?;
        Ok(tensor.remote()?.clone())
    }

    /// Compile a command against a pointer and dispatch it to the data's
    /// location, returning a pointer to the freshly computed result.
    pub fn remote_op(
        &self,
        op: &str,
        receiver: &GridTensor,
        args: &[CommandArg<'_>],
    ) -> Result<GridTensor> {
        let location = receiver.remote()?.location.clone();
        let cmd = compile_command(op, Some(receiver), args)?;
        let response = self.send_msg(Envelope::TorchCmd(cmd), &location)?;
        let msg = match response {
            Response::Pointer(msg) => msg,
            other => {
                return Err(GridError::ProtocolViolation(format!(
                    "torch_cmd answered with {other:?}"
                )))
            }
        };
        let remote = wire::deser(&msg)?;
        let pointer = GridTensor {
            id: remote.id,
            owner: self.id.clone(),
            repr: TensorRepr::Pointer(remote.remote()?.clone()),
        };
        self.register_tensor(pointer.clone(), Some(pointer.id), false, true)?;
        Ok(pointer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::channel::connect;

    fn server(id: &str) -> Arc<Worker> {
        Worker::new(WorkerConfig {
            id: Some(id.to_string()),
            ..WorkerConfig::default()
        })
    }

    fn client(id: &str) -> Arc<Worker> {
        Worker::new(WorkerConfig {
            id: Some(id.to_string()),
            is_client: true,
            ..WorkerConfig::default()
        })
    }

    #[test]
    fn test_whoami() {
        let w = server("alice");
        let who = w.whoami();
        assert_eq!(who["id"], "alice");
        assert_eq!(who["type"], "tensorgrid.Worker");
    }

    #[test]
    fn test_generated_worker_id() {
        let w = Worker::new(WorkerConfig::default());
        assert!(!w.id().is_empty());
    }

    #[test]
    fn test_peer_collision_replaces_unless_strict() {
        let a = server("a");
        let b = server("b");
        let b2 = server("b");
        connect(&a, &b).unwrap();
        // same id again: replaced with a warning
        assert!(a
            .add_peer("b", Arc::new(crate::worker::VirtualChannel::new(b2)))
            .is_ok());

        let strict = Worker::new(WorkerConfig {
            id: Some("s".into()),
            strict_peers: true,
            ..WorkerConfig::default()
        });
        connect(&strict, &b).unwrap();
        let err = strict
            .add_peer("b", Arc::new(crate::worker::VirtualChannel::new(b.clone())))
            .unwrap_err();
        assert!(matches!(err, GridError::PeerCollision(_)));
    }

    #[test]
    fn test_unknown_peer_fails_at_send_time() {
        let a = server("a");
        let err = a.send_msg(Envelope::ReqObj(1), "ghost").unwrap_err();
        assert!(matches!(err, GridError::UnknownWorker(_)));
    }

    #[test]
    fn test_send_tensor_moves_data() {
        let a = server("a");
        let b = server("b");
        connect(&a, &b).unwrap();

        let mut x = a.tensor(RawTensor::long_row(&[1, 2, 3, 4, 5])).unwrap();
        let id = x.id;
        a.send_tensor(&mut x, "b").unwrap();

        // local handle became a pointer at b
        assert!(x.is_pointer());
        assert_eq!(x.remote().unwrap().location, "b");
        assert_eq!(x.remote().unwrap().id_at_location, id);
        assert!(!a.has_obj(id));

        // b holds the data under the same id
        let stored = b.get_obj(id).unwrap();
        assert_eq!(
            stored.data().unwrap().to_flat(),
            vec![1.0, 2.0, 3.0, 4.0, 5.0]
        );
    }

    #[test]
    fn test_failed_send_keeps_object() {
        let a = server("a");
        let mut x = a.tensor(RawTensor::long_row(&[1, 2])).unwrap();
        let err = a.send_tensor(&mut x, "ghost").unwrap_err();
        assert!(matches!(err, GridError::UnknownWorker(_)));
        // the transfer never happened: handle and registry entry survive
        assert!(x.is_local());
        assert!(a.has_obj(x.id));
    }

    #[test]
    fn test_release_remote_removes_object() {
        let a = server("a");
        let b = server("b");
        connect(&a, &b).unwrap();

        let mut x = a.tensor(RawTensor::long_row(&[1, 2, 3])).unwrap();
        let id = x.id;
        a.send_tensor(&mut x, "b").unwrap();
        assert!(b.has_obj(id));

        a.release_remote("b", id).unwrap();
        assert!(!b.has_obj(id));
        // the object is gone, a second release reports the remote failure
        assert!(matches!(
            a.release_remote("b", id),
            Err(GridError::Remote(_))
        ));
    }

    #[test]
    fn test_send_then_get_roundtrip() {
        let a = server("a");
        let b = server("b");
        connect(&a, &b).unwrap();

        let mut x = a.tensor(RawTensor::long_row(&[9, 8, 7])).unwrap();
        let id = x.id;
        a.send_tensor(&mut x, "b").unwrap();
        a.get_tensor(&mut x).unwrap();

        assert!(x.is_local());
        assert_eq!(x.data().unwrap(), &RawTensor::long_row(&[9, 8, 7]));
        // ownership transferred back: the remote copy is gone
        assert!(!b.has_obj(id));
    }

    #[test]
    fn test_get_of_missing_remote_object_is_remote_error() {
        let a = server("a");
        let b = server("b");
        connect(&a, &b).unwrap();
        let err = a.request_raw("b", 424242).unwrap_err();
        assert!(matches!(err, GridError::Remote(_)));
    }

    #[test]
    fn test_remote_add_command_returns_pointer_to_sum() {
        let a = client("a");
        let b = server("b");
        connect(&a, &b).unwrap();

        let mut x = a.tensor(RawTensor::long_row(&[1, 2, 3])).unwrap();
        let mut y = a.tensor(RawTensor::long_row(&[10, 20, 30])).unwrap();
        a.send_tensor(&mut x, "b").unwrap();
        a.send_tensor(&mut y, "b").unwrap();

        let mut z = a
            .remote_op("__add__", &x, &[CommandArg::Tensor(&y)])
            .unwrap();
        assert!(z.is_pointer());
        assert_eq!(z.remote().unwrap().location, "b");
        // result was registered remotely, not shipped back
        assert!(b.has_obj(z.remote().unwrap().id_at_location));

        a.get_tensor(&mut z).unwrap();
        assert_eq!(z.data().unwrap(), &RawTensor::long_row(&[11, 22, 33]));
    }

    #[test]
    fn test_remote_scalar_command() {
        let a = client("a");
        let b = server("b");
        connect(&a, &b).unwrap();

        let mut x = a.tensor(RawTensor::long_row(&[10, 21])).unwrap();
        a.send_tensor(&mut x, "b").unwrap();
        let mut z = a.remote_op("__mod__", &x, &[CommandArg::Int(8)]).unwrap();
        a.get_tensor(&mut z).unwrap();
        assert_eq!(z.data().unwrap(), &RawTensor::long_row(&[2, 5]));
    }

    #[test]
    fn test_disallowed_command_fails_before_dispatch() {
        let a = client("a");
        let x = GridTensor::pointer(
            RemoteRef {
                location: "ghost".into(),
                id_at_location: 1,
                torch_type: crate::tensor::Dtype::Long,
            },
            "a",
        );
        // no peers connected: if the guard let this through, dispatch
        // would fail with UnknownWorker instead
        let err = a.remote_op("eval", &x, &[]).unwrap_err();
        assert!(matches!(err, GridError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_command_against_missing_operand_is_remote_error() {
        let a = client("a");
        let b = server("b");
        connect(&a, &b).unwrap();

        let mut x = a.tensor(RawTensor::long_row(&[1])).unwrap();
        a.send_tensor(&mut x, "b").unwrap();
        let ghost = GridTensor::pointer(
            RemoteRef {
                location: "b".into(),
                id_at_location: 55555,
                torch_type: crate::tensor::Dtype::Long,
            },
            "a",
        );
        let err = a
            .remote_op("__add__", &x, &[CommandArg::Tensor(&ghost)])
            .unwrap_err();
        assert!(matches!(err, GridError::Remote(_)));
    }

    #[test]
    fn test_composite_returns_ordered_results() {
        let a = client("a");
        let b = server("b");
        connect(&a, &b).unwrap();

        let mut x = a.tensor(RawTensor::long_row(&[2, 3])).unwrap();
        a.send_tensor(&mut x, "b").unwrap();

        let cmds = vec![
            Envelope::TorchCmd(compile_command("__add__", Some(&x), &[CommandArg::Int(1)]).unwrap()),
            Envelope::TorchCmd(compile_command("__mul__", Some(&x), &[CommandArg::Int(10)]).unwrap()),
            Envelope::TorchCmd(compile_command("__neg__", Some(&x), &[]).unwrap()),
        ];
        let results = a.send_composite(cmds, "b").unwrap();
        assert_eq!(results.len(), 3);

        let expected: Vec<RawTensor> = vec![
            RawTensor::long_row(&[3, 4]),
            RawTensor::long_row(&[20, 30]),
            RawTensor::long_row(&[-2, -3]),
        ];
        for (response, want) in results.into_iter().zip(expected) {
            let msg = match response {
                Response::Pointer(msg) => msg,
                other => panic!("expected pointer response, got {other:?}"),
            };
            let pointer = wire::deser(&msg).unwrap();
            let (_, data) = a
                .request_raw("b", pointer.remote().unwrap().id_at_location)
                .unwrap();
            assert_eq!(data, want);
        }
    }

    #[test]
    fn test_queue_batches_into_composite() {
        let a = Worker::new(WorkerConfig {
            id: Some("a".into()),
            is_client: true,
            queue_size: 2,
            ..WorkerConfig::default()
        });
        let b = server("b");
        connect(&a, &b).unwrap();

        let mut x = a.tensor(RawTensor::long_row(&[5])).unwrap();
        a.send_tensor(&mut x, "b").unwrap();

        let cmd = |s: i64| {
            Envelope::TorchCmd(compile_command("__add__", Some(&x), &[CommandArg::Int(s)]).unwrap())
        };
        assert!(a.queue_msg(cmd(1), "b").unwrap().is_none());
        let flushed = a.queue_msg(cmd(2), "b").unwrap().expect("queue full");
        assert_eq!(flushed.len(), 2);
    }

    #[test]
    fn test_malformed_envelope_is_reported_in_payload() {
        let b = server("b");
        let reply = b.receive_msg(b"{\"type\":\"launch\",\"message\":1}\n").unwrap();
        let response = Response::from_bytes(&reply).unwrap();
        match response {
            Response::Error(text) => assert!(text.contains("protocol violation")),
            other => panic!("expected error response, got {other:?}"),
        }
    }
}
