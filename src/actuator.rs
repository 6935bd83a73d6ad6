// src/actuator.rs
//! Motor controller link
//!
//! The serial port is owned by a single writer task. Everything else talks to
//! it through a cloneable [`ActuatorHandle`] that queues ASCII command
//! strings. Nothing is read back from the controller.

use crate::error::{RelayError, Result};
use std::time::Duration;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

/// Queue depth between relay sessions and the writer task
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone)]
pub struct ActuatorHandle {
    tx: mpsc::Sender<String>,
}

impl ActuatorHandle {
    /// Handle plus the raw receiving end, for callers that drain it themselves
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Spawn the writer task over any byte sink
    pub fn spawn_writer<W>(writer: W, capacity: usize) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (handle, rx) = Self::channel(capacity);
        let task = tokio::spawn(run_writer(writer, rx));
        (handle, task)
    }

    /// Open the motor controller's serial port and spawn its writer task
    pub fn open_serial(port: &str, baudrate: u32) -> Result<(Self, JoinHandle<()>)> {
        info!(port, baudrate, "opening motor serial port");

        let serial = tokio_serial::new(port, baudrate)
            .timeout(Duration::from_millis(1000))
            .open_native_async()
            .map_err(|e| {
                RelayError::Connection(format!("Failed to open serial port {}: {}", port, e))
            })?;

        Ok(Self::spawn_writer(serial, DEFAULT_QUEUE_DEPTH))
    }

    /// Queue one command. Waits while the queue is full.
    ///
    /// Fails only when the writer task is gone.
    pub async fn send(&self, command: &str) -> Result<()> {
        self.tx
            .send(command.to_string())
            .await
            .map_err(|_| RelayError::Connection("actuator writer has stopped".to_string()))
    }
}

async fn run_writer<W>(mut writer: W, mut rx: mpsc::Receiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = rx.recv().await {
        let result = async {
            writer.write_all(command.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        // A transient serial error must not take the relay down
        match result {
            Ok(()) => debug!(command = %command, "actuator write"),
            Err(e) => warn!(command = %command, error = %e, "actuator write failed"),
        }
    }
    debug!("actuator writer stopped");
}
