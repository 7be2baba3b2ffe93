//! The transport seam between workers
//!
//! The core only needs a blocking request/response primitive; sockets,
//! pubsub and transport security live behind this trait with some other
//! crate. [`VirtualChannel`] is the in-process implementation used for
//! local development and tests.

use crate::error::Result;
use crate::worker::Worker;
use std::sync::Arc;

/// A synchronous point-to-point channel: send one newline-terminated
/// message, block until the peer's response line comes back.
pub trait Channel: Send + Sync {
    fn request(&self, line: &[u8]) -> Result<Vec<u8>>;
}

/// An in-process channel that hands the message straight to the target
/// worker's receive loop.
pub struct VirtualChannel {
    target: Arc<Worker>,
}

impl VirtualChannel {
    pub fn new(target: Arc<Worker>) -> Self {
        Self { target }
    }
}

impl Channel for VirtualChannel {
    fn request(&self, line: &[u8]) -> Result<Vec<u8>> {
        self.target.receive_msg(line)
    }
}

/// Introduce two workers to each other over virtual channels.
pub fn connect(a: &Arc<Worker>, b: &Arc<Worker>) -> Result<()> {
    a.add_peer(b.id(), Arc::new(VirtualChannel::new(b.clone())))?;
    b.add_peer(a.id(), Arc::new(VirtualChannel::new(a.clone())))?;
    Ok(())
}
