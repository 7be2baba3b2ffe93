//! Workers: registries, channels and the messaging node

pub mod channel;
pub mod node;
pub mod registry;

/// Workers are addressed by plain string ids; references hold the id and
/// resolution to a live channel happens at send time.
pub type WorkerId = String;

pub use channel::{connect, Channel, VirtualChannel};
pub use node::{Worker, WorkerConfig};
pub use registry::ObjectRegistry;
