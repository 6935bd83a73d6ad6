// src/gps/ingest.rs
//! Telemetry pipeline: sentence -> fix -> store -> broadcast

use super::data::{RmcFix, TelemetryFix};
use super::nmea;
use crate::error::{RelayError, Result};
use crate::events::ServerEvent;
use crate::framing;
use crate::store::TelemetryStore;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::broadcast;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, error, info, warn};

/// NMEA caps sentences at 82 characters; anything far beyond is line noise
pub const MAX_SENTENCE_LEN: usize = 256;

pub struct GpsIngest<S> {
    store: Arc<S>,
    publisher: broadcast::Sender<ServerEvent>,
}

impl<S: TelemetryStore> GpsIngest<S> {
    pub fn new(store: Arc<S>, publisher: broadcast::Sender<ServerEvent>) -> Self {
        Self { store, publisher }
    }

    /// Handle one telemetry line.
    ///
    /// Returns the published fix, or `None` when the sentence was filtered
    /// out or could not be stored. Storage failures are logged here.
    pub fn ingest_line(&self, line: &str) -> Option<TelemetryFix> {
        let fix = nmea::parse_rmc(line)?;

        match self.persist_and_publish(&fix) {
            Ok(stored) => Some(stored),
            Err(e) => {
                error!(error = %e, "failed to store GPS fix");
                None
            }
        }
    }

    /// Store the fix, read it back by id and broadcast the stored row
    pub fn persist_and_publish(&self, fix: &RmcFix) -> Result<TelemetryFix> {
        let id = self.store.insert_fix(fix)?;
        let stored = self
            .store
            .fix(id)?
            .ok_or_else(|| RelayError::Store(format!("fix {} missing after insert", id)))?;

        debug!(id, position = %stored.format_position(), speed = stored.speed, "GPS fix stored");

        // No subscribers is normal when no client is connected
        if self
            .publisher
            .send(ServerEvent::GpsCoordinate(stored.clone()))
            .is_err()
        {
            debug!(id, "no clients listening for GPS fix");
        }

        Ok(stored)
    }
}

/// Feed every line of `reader` through the pipeline until EOF or a read error.
///
/// Lines end at `\r` or `\n`; over-long lines are skipped.
pub async fn run_reader<R, S>(mut reader: R, ingest: &GpsIngest<S>) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    S: TelemetryStore,
{
    let mut buf = Vec::new();
    let mut published = 0;

    loop {
        match framing::read_frame(&mut reader, &mut buf, MAX_SENTENCE_LEN).await {
            Ok(false) => break, // EOF
            Ok(true) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim();
                if !line.is_empty() && ingest.ingest_line(line).is_some() {
                    published += 1;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!(error = %e, "skipping over-long GPS line");
            }
            Err(e) => {
                warn!(error = %e, "error reading GPS stream");
                return Err(e.into());
            }
        }
    }

    Ok(published)
}

/// Open the GPS serial port and ingest until the port closes
pub async fn run_serial<S: TelemetryStore>(
    port: &str,
    baudrate: u32,
    ingest: &GpsIngest<S>,
) -> Result<usize> {
    info!(port, baudrate, "connecting to GPS");

    let serial = tokio_serial::new(port, baudrate)
        .timeout(Duration::from_millis(1000))
        .open_native_async()
        .map_err(|e| RelayError::Connection(format!("Failed to open serial port {}: {}", port, e)))?;

    info!(port, "GPS connected");
    run_reader(BufReader::new(serial), ingest).await
}
