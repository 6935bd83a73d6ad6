// src/gps/data.rs
//! GPS data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hemisphere letter that follows an NMEA coordinate field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hemisphere {
    North,
    South,
    East,
    West,
}

impl Hemisphere {
    pub fn from_letter(letter: &str) -> Option<Self> {
        match letter {
            "N" => Some(Hemisphere::North),
            "S" => Some(Hemisphere::South),
            "E" => Some(Hemisphere::East),
            "W" => Some(Hemisphere::West),
            _ => None,
        }
    }

    /// South and west are negative in decimal degrees
    pub fn sign(&self) -> f64 {
        match self {
            Hemisphere::North | Hemisphere::East => 1.0,
            Hemisphere::South | Hemisphere::West => -1.0,
        }
    }
}

/// Position and speed taken from one valid RMC sentence, not yet stored
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RmcFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Speed over ground in knots, as reported by the receiver
    pub speed: f64,
}

/// A stored fix, as persisted and broadcast to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFix {
    pub id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub timestamp: DateTime<Utc>,
    pub is_repeater: bool,
}

impl TelemetryFix {
    /// Format coordinate pair for log output
    pub fn format_position(&self) -> String {
        format!("{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hemisphere_letters() {
        assert_eq!(Hemisphere::from_letter("N"), Some(Hemisphere::North));
        assert_eq!(Hemisphere::from_letter("W"), Some(Hemisphere::West));
        assert_eq!(Hemisphere::from_letter("n"), None);
        assert_eq!(Hemisphere::from_letter(""), None);
        assert_eq!(Hemisphere::South.sign(), -1.0);
        assert_eq!(Hemisphere::East.sign(), 1.0);
    }

    #[test]
    fn test_fix_serializes_flat() {
        let fix = TelemetryFix {
            id: 7,
            latitude: 48.1173,
            longitude: 11.516667,
            speed: 22.4,
            timestamp: Utc::now(),
            is_repeater: false,
        };
        let json = serde_json::to_value(&fix).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["is_repeater"], false);
        assert_eq!(fix.format_position(), "48.117300, 11.516667");
    }
}
