//! Per-worker object registry
//!
//! Two stores: the permanent registry holds objects until they are
//! explicitly removed; the temporary registry only keeps objects alive
//! while a client worker is in the middle of receiving and registering
//! them, and is emptied with `clear_temporary`. Client workers never
//! persist objects in the permanent store unless forced — the client
//! handle is meant to stay the only authoritative reference.

use crate::error::{GridError, Result};
use crate::tensor::{GridTensor, ObjectId, TensorRepr};
use crate::worker::WorkerId;
use log::warn;
use std::collections::HashMap;

#[derive(Debug)]
pub struct ObjectRegistry {
    worker_id: WorkerId,
    is_client: bool,
    objects: HashMap<ObjectId, GridTensor>,
    tmp_objects: HashMap<ObjectId, GridTensor>,
}

impl ObjectRegistry {
    pub fn new(worker_id: impl Into<WorkerId>, is_client: bool) -> Self {
        Self {
            worker_id: worker_id.into(),
            is_client,
            objects: HashMap::new(),
            tmp_objects: HashMap::new(),
        }
    }

    /// Register an object, binding its id and owner. An explicit `id`
    /// overwrites the handle's own; an explicit id collision replaces the
    /// previous entry. A pointer that claims to live on this very worker
    /// is rejected as an ownership conflict.
    pub fn register(
        &mut self,
        mut obj: GridTensor,
        id: Option<ObjectId>,
        owner: Option<WorkerId>,
        force: bool,
        temporary: bool,
    ) -> Result<GridTensor> {
        if let Some(id) = id {
            obj.id = id;
        }
        obj.owner = owner.unwrap_or_else(|| self.worker_id.clone());

        if let TensorRepr::Pointer(remote) = &obj.repr {
            if remote.location == self.worker_id {
                return Err(GridError::OwnershipConflict(format!(
                    "pointer {} claims location '{}', which is the registering worker itself",
                    obj.id, remote.location
                )));
            }
        }

        if self.objects.contains_key(&obj.id) {
            warn!(
                "worker '{}': object id {} already registered, replacing",
                self.worker_id, obj.id
            );
        }

        if temporary && self.is_client {
            self.tmp_objects.insert(obj.id, obj.clone());
        }
        self.set(obj.id, obj.clone(), force);
        Ok(obj)
    }

    /// Store into the permanent registry, unless this is a client worker
    /// and the write is not forced.
    pub fn set(&mut self, id: ObjectId, value: GridTensor, force: bool) {
        if !self.is_client || force {
            self.objects.insert(id, value);
        }
    }

    pub fn get(&self, id: ObjectId) -> Result<&GridTensor> {
        self.objects.get(&id).ok_or(GridError::NotFound(id))
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    /// Remove from the permanent store; `None` if absent.
    pub fn remove(&mut self, id: ObjectId) -> Option<GridTensor> {
        self.objects.remove(&id)
    }

    /// Release everything held only for registration-in-progress.
    pub fn clear_temporary(&mut self) {
        self.tmp_objects.clear();
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
