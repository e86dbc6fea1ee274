//! Fan-out of chat messages to registered connections.

mod engine;

pub use engine::{Broadcaster, BroadcasterStatsSnapshot, DeliveryResult};
