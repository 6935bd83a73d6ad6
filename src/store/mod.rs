// src/store/mod.rs
//! Persistence for the command log and GPS telemetry
//!
//! Both stores are append-only from the relay's point of view. The only
//! in-place mutation is the repeater flag on telemetry rows, and that goes
//! through [`TelemetryStore::designate_repeater`] so at most one row ever
//! carries it.

pub mod memory;
pub mod sqlite;

use crate::error::Result;
use crate::gps::data::{RmcFix, TelemetryFix};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// One relayed movement command. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: i64,
    pub command: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only log of commands sent to the motor controller
pub trait CommandLog: Send + Sync {
    /// Append a command string, returning the stored record
    fn append(&self, command: &str) -> Result<Command>;

    /// The `limit` most recent commands, newest first
    fn recent(&self, limit: usize) -> Result<Vec<Command>>;
}

/// Store of received GPS fixes
pub trait TelemetryStore: Send + Sync {
    /// Insert a fix with the repeater flag cleared, returning its id
    fn insert_fix(&self, fix: &RmcFix) -> Result<i64>;

    fn fix(&self, id: i64) -> Result<Option<TelemetryFix>>;

    /// Id of the most recently inserted fix
    fn latest_fix_id(&self) -> Result<Option<i64>>;

    /// Make `id` the only fix flagged as repeater, atomically.
    /// Returns false when no such fix exists (flags are left untouched).
    fn designate_repeater(&self, id: i64) -> Result<bool>;

    /// Number of fixes currently flagged as repeater
    fn repeater_count(&self) -> Result<usize>;
}
