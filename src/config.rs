// src/config.rs
//! Relay configuration stored as JSON

use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Number of logged commands replayed after an unexpected drop.
/// At the controller's sampling rate this is roughly the last 100 seconds.
pub const DEFAULT_REPLAY_WINDOW: usize = 1000;

/// Seconds of client silence before the connection counts as dropped
pub const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Gates every actuator write and the rewind logic
    pub motor_enabled: bool,
    /// Gates telemetry ingestion
    pub gps_enabled: bool,
    pub motor_serial: String,
    pub motor_baudrate: u32,
    pub gps_serial: String,
    pub gps_baudrate: u32,
    /// SQLite file, or ":memory:" for a volatile store
    pub database_path: String,
    pub listen_addr: String,
    pub replay_window: usize,
    /// Clients must send something (a `ping` at least) this often
    pub client_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            motor_enabled: true,
            gps_enabled: false,
            motor_serial: "/dev/serial/by-id/usb-FTDI_FT232R_USB_UART_A600cJpP-if00-port0"
                .to_string(),
            motor_baudrate: 9600,
            gps_serial: "/dev/cu.usbserial-A40111OI".to_string(),
            gps_baudrate: 4800,
            database_path: "db".to_string(),
            listen_addr: "0.0.0.0:3000".to_string(),
            replay_window: DEFAULT_REPLAY_WINDOW,
            client_timeout_secs: DEFAULT_CLIENT_TIMEOUT_SECS,
        }
    }
}

impl RelayConfig {
    /// Load configuration from `path`, or from the default location.
    ///
    /// A missing file is not an error: defaults are returned instead.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)
            .map_err(|e| RelayError::Other(format!("Failed to read config file: {}", e)))?;

        Self::from_json(&contents)
    }

    /// Parse configuration from a JSON document. Absent keys keep their defaults.
    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|e| RelayError::Other(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration as pretty JSON
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RelayError::Other(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| RelayError::Other(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&config_path, contents)
            .map_err(|e| RelayError::Other(format!("Failed to write config file: {}", e)))?;

        Ok(config_path)
    }

    /// `$HOME/.config/rover-relay/config.json`
    pub fn default_path() -> Result<PathBuf> {
        let home = std::env::var("HOME")
            .map_err(|_| RelayError::Other("HOME environment variable not set".to_string()))?;

        Ok(PathBuf::from(home)
            .join(".config")
            .join("rover-relay")
            .join("config.json"))
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_path == ":memory:"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert!(config.motor_enabled);
        assert!(!config.gps_enabled);
        assert_eq!(config.gps_baudrate, 4800);
        assert_eq!(config.replay_window, 1000);
        assert!(!config.uses_memory_store());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = RelayConfig::from_json(r#"{"gps_enabled": true, "database_path": ":memory:"}"#)
            .unwrap();
        assert!(config.gps_enabled);
        assert!(config.motor_enabled);
        assert!(config.uses_memory_store());
        assert_eq!(config.listen_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_invalid_json() {
        assert!(RelayConfig::from_json("{not json").is_err());
    }

    #[test]
    fn test_client_timeout() {
        let config = RelayConfig::from_json(r#"{"client_timeout_secs": 5}"#).unwrap();
        assert_eq!(config.client_timeout(), Duration::from_secs(5));
        assert_eq!(
            RelayConfig::default().client_timeout(),
            Duration::from_secs(DEFAULT_CLIENT_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.json");

        let config = RelayConfig {
            motor_serial: "/dev/ttyACM0".to_string(),
            motor_baudrate: 115200,
            gps_enabled: true,
            replay_window: 50,
            ..RelayConfig::default()
        };
        let written = config.save(Some(&path)).unwrap();
        assert_eq!(written, path);

        let loaded = RelayConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        let loaded = RelayConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded, RelayConfig::default());
    }
}
