//! HTTP transport layer: the JSON-RPC endpoint and the REST surface

pub mod auth;
pub mod handlers;
pub mod resources;
pub mod sessions;
pub mod telemetry;
