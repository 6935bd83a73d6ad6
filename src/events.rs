// src/events.rs
//! Messages exchanged with connected clients

use crate::error::{RelayError, Result};
use crate::gps::data::TelemetryFix;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mode digit appended to every movement command
pub const MOVE_MODE: char = '0';

/// Event name used when broadcasting a stored fix
pub const GPS_COORDINATE_EVENT: &str = "gps_coordinate";

/// Client to relay. Connection and drop are signalled by the transport itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Move(MovePayload),
    DeployRepeater,
    /// Intentional disconnect (page navigation); no replay afterwards
    SoftDisconnect,
    /// Keep-alive from an otherwise quiet client
    Ping,
}

/// Two motor magnitudes as sent by the client.
///
/// Kept as raw JSON so a bad payload can be reported back precisely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovePayload {
    pub left: Value,
    pub right: Value,
}

impl MovePayload {
    pub fn new(left: u8, right: u8) -> Self {
        Self {
            left: Value::from(left),
            right: Value::from(right),
        }
    }

    /// Build the three character command: left, right, mode digit.
    pub fn to_command(&self) -> Result<String> {
        let left = magnitude_digit("left", &self.left)?;
        let right = magnitude_digit("right", &self.right)?;
        Ok([left, right, MOVE_MODE].iter().collect())
    }
}

/// Each magnitude must be a single decimal digit, as a number or a string
fn magnitude_digit(name: &str, value: &Value) -> Result<char> {
    let digit = match value {
        Value::Number(n) => n
            .as_u64()
            .filter(|d| *d <= 9)
            .and_then(|d| char::from_digit(d as u32, 10)),
        Value::String(s) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_digit() => Some(c),
                _ => None,
            }
        }
        _ => None,
    };

    digit.ok_or_else(|| {
        RelayError::InvalidCommand(format!("{} must be a single digit 0-9, got {}", name, value))
    })
}

/// Relay to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    GpsCoordinate(TelemetryFix),
    Error { message: String },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::GpsCoordinate(_) => GPS_COORDINATE_EVENT,
            ServerEvent::Error { .. } => "error",
        }
    }
}
