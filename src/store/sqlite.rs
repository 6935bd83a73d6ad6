// src/store/sqlite.rs
//! SQLite-backed store with the `movement` and `gps` tables

use super::{Command, CommandLog, TelemetryStore};
use crate::error::{RelayError, Result};
use crate::gps::data::{RmcFix, TelemetryFix};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

/// Durable store backed by a single SQLite connection.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        info!(path = %path.display(), "opened sqlite store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Initializes the database schema.
    pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS movement (
                id INTEGER PRIMARY KEY,
                command TEXT NOT NULL,
                timestamp DATETIME NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS gps (
                id INTEGER PRIMARY KEY,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                speed REAL NOT NULL,
                timestamp DATETIME NOT NULL,
                is_repeater INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RelayError::Store("sqlite connection lock poisoned".to_string()))
    }

    fn fix_from_row(row: &Row<'_>) -> rusqlite::Result<TelemetryFix> {
        Ok(TelemetryFix {
            id: row.get(0)?,
            latitude: row.get(1)?,
            longitude: row.get(2)?,
            speed: row.get(3)?,
            timestamp: row.get(4)?,
            is_repeater: row.get(5)?,
        })
    }
}

impl CommandLog for SqliteStore {
    fn append(&self, command: &str) -> Result<Command> {
        let conn = self.lock()?;
        let timestamp = Utc::now();
        conn.execute(
            "INSERT INTO movement (command, timestamp) VALUES (?1, ?2)",
            params![command, timestamp],
        )?;
        Ok(Command {
            id: conn.last_insert_rowid(),
            command: command.to_string(),
            timestamp,
        })
    }

    fn recent(&self, limit: usize) -> Result<Vec<Command>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, command, timestamp FROM movement ORDER BY id DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(Command {
                id: row.get(0)?,
                command: row.get(1)?,
                timestamp: row.get(2)?,
            })
        })?;
        let commands = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(commands)
    }
}

impl TelemetryStore for SqliteStore {
    fn insert_fix(&self, fix: &RmcFix) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO gps (latitude, longitude, speed, timestamp, is_repeater)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![fix.latitude, fix.longitude, fix.speed, Utc::now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn fix(&self, id: i64) -> Result<Option<TelemetryFix>> {
        let conn = self.lock()?;
        let fix = conn
            .query_row(
                "SELECT id, latitude, longitude, speed, timestamp, is_repeater
                 FROM gps WHERE id = ?1",
                params![id],
                Self::fix_from_row,
            )
            .optional()?;
        Ok(fix)
    }

    fn latest_fix_id(&self) -> Result<Option<i64>> {
        let conn = self.lock()?;
        let id = conn
            .query_row("SELECT id FROM gps ORDER BY id DESC LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(id)
    }

    fn designate_repeater(&self, id: i64) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM gps WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(false);
        }

        tx.execute("UPDATE gps SET is_repeater = 0 WHERE is_repeater = 1", [])?;
        tx.execute("UPDATE gps SET is_repeater = 1 WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(true)
    }

    fn repeater_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM gps WHERE is_repeater = 1", [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(lat: f64, lon: f64) -> RmcFix {
        RmcFix {
            latitude: lat,
            longitude: lon,
            speed: 0.4,
        }
    }

    #[test]
    fn test_movement_log_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        for cmd in ["120", "210", "990"] {
            store.append(cmd).unwrap();
        }

        let recent = store.recent(1000).unwrap();
        let commands: Vec<&str> = recent.iter().map(|c| c.command.as_str()).collect();
        assert_eq!(commands, vec!["990", "210", "120"]);

        let limited = store.recent(2).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].id, 3);
    }

    #[test]
    fn test_fix_roundtrip_through_table() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.latest_fix_id().unwrap(), None);

        let id = store.insert_fix(&fix(48.1173, 11.516667)).unwrap();
        let stored = store.fix(id).unwrap().unwrap();

        assert_eq!(stored.id, id);
        assert_eq!(stored.latitude, 48.1173);
        assert_eq!(stored.longitude, 11.516667);
        assert!(!stored.is_repeater);
        assert_eq!(store.latest_fix_id().unwrap(), Some(id));
        assert!(store.fix(id + 1).unwrap().is_none());
    }

    #[test]
    fn test_designate_repeater_moves_flag() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store.insert_fix(&fix(42.0, -71.0)).unwrap();
        let b = store.insert_fix(&fix(42.1, -71.1)).unwrap();

        assert!(store.designate_repeater(a).unwrap());
        assert_eq!(store.repeater_count().unwrap(), 1);

        assert!(store.designate_repeater(b).unwrap());
        assert_eq!(store.repeater_count().unwrap(), 1);
        assert!(!store.fix(a).unwrap().unwrap().is_repeater);
        assert!(store.fix(b).unwrap().unwrap().is_repeater);

        assert!(!store.designate_repeater(500).unwrap());
        assert!(store.fix(b).unwrap().unwrap().is_repeater);
    }

    #[test]
    fn test_open_file_twice_keeps_rows() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("relay.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.append("120").unwrap();
            store.insert_fix(&fix(42.0, -71.0)).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.recent(10).unwrap().len(), 1);
        assert_eq!(store.latest_fix_id().unwrap(), Some(1));
    }
}
