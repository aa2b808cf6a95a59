//! Tracks every live connection, fans out broadcasts, and owns the single
//! reconnect/disconnect paths (spec §4.C).

pub mod actor;
pub mod client_id;
mod error;
pub mod heartbeat;
mod registry;
mod sink;

pub use error::RegistryError;
pub use registry::{ConnectionRegistry, RegistryStats};
pub use sink::{ConnectionSink, SinkError};
