// src/lib.rs
//! Rover Relay Library
//!
//! Relays remote-control commands from connected clients to a motor
//! controller over serial, replays recent commands after an unexpected
//! client drop, and ingests GPS telemetry from a second serial feed.

pub mod actuator;
pub mod config;
pub mod error;
pub mod events;
pub mod framing;
pub mod gps;
pub mod logging;
pub mod relay;
pub mod server;
pub mod store;
pub mod transport;

// Re-export main types for convenience
pub use actuator::ActuatorHandle;
pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use events::{ClientEvent, MovePayload, ServerEvent};
pub use gps::{GpsIngest, TelemetryFix};
pub use relay::{Relay, RewindState, Session};
pub use server::RelayServer;
pub use store::{Command, CommandLog, MemoryStore, SqliteStore, TelemetryStore};
