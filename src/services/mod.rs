//! I/O-bound collaborator services: sessions, resources, events, auth,
//! telemetry

pub mod auth;
pub mod events;
pub mod resource;
pub mod session;
pub mod telemetry;
