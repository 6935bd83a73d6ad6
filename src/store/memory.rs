// src/store/memory.rs
//! Volatile in-process store

use super::{Command, CommandLog, TelemetryStore};
use crate::error::{RelayError, Result};
use crate::gps::data::{RmcFix, TelemetryFix};
use chrono::Utc;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Tables {
    movement: Vec<Command>,
    gps: Vec<TelemetryFix>,
}

/// Store kept entirely in memory. Ids start at 1 and grow like SQLite rowids.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| RelayError::Store("memory store lock poisoned".to_string()))
    }
}

impl CommandLog for MemoryStore {
    fn append(&self, command: &str) -> Result<Command> {
        let mut tables = self.lock()?;
        let record = Command {
            id: tables.movement.len() as i64 + 1,
            command: command.to_string(),
            timestamp: Utc::now(),
        };
        tables.movement.push(record.clone());
        Ok(record)
    }

    fn recent(&self, limit: usize) -> Result<Vec<Command>> {
        let tables = self.lock()?;
        Ok(tables.movement.iter().rev().take(limit).cloned().collect())
    }
}

impl TelemetryStore for MemoryStore {
    fn insert_fix(&self, fix: &RmcFix) -> Result<i64> {
        let mut tables = self.lock()?;
        let id = tables.gps.len() as i64 + 1;
        tables.gps.push(TelemetryFix {
            id,
            latitude: fix.latitude,
            longitude: fix.longitude,
            speed: fix.speed,
            timestamp: Utc::now(),
            is_repeater: false,
        });
        Ok(id)
    }

    fn fix(&self, id: i64) -> Result<Option<TelemetryFix>> {
        let tables = self.lock()?;
        Ok(tables.gps.iter().find(|f| f.id == id).cloned())
    }

    fn latest_fix_id(&self) -> Result<Option<i64>> {
        let tables = self.lock()?;
        Ok(tables.gps.last().map(|f| f.id))
    }

    fn designate_repeater(&self, id: i64) -> Result<bool> {
        // Clear and set under one lock: readers never see zero or two flags
        let mut tables = self.lock()?;
        if !tables.gps.iter().any(|f| f.id == id) {
            return Ok(false);
        }
        for fix in tables.gps.iter_mut() {
            fix.is_repeater = fix.id == id;
        }
        Ok(true)
    }

    fn repeater_count(&self) -> Result<usize> {
        let tables = self.lock()?;
        Ok(tables.gps.iter().filter(|f| f.is_repeater).count())
    }
}
