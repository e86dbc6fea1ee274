// Core domain
pub mod broadcast;
pub mod registry;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Supporting modules
pub mod config;
pub mod metrics;
pub mod tasks;
pub mod telemetry;
