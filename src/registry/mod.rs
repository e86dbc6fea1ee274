//! Connection registry: the authoritative map of who is online.

mod connections;
mod handle;

pub use connections::{ConnectionRegistry, RegistryStats};
pub use handle::ConnectionHandle;
