// src/server.rs
//! Wires the store, motor link, GPS feed and client listener together

use crate::{
    actuator::ActuatorHandle,
    config::RelayConfig,
    error::{RelayError, Result},
    events::ServerEvent,
    gps::{ingest, GpsIngest},
    relay::Relay,
    store::{CommandLog, MemoryStore, SqliteStore, TelemetryStore},
    transport::{self, ClientTimeouts},
};
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info, warn};

/// Broadcast buffer; slow clients beyond this skip ahead
const BROADCAST_CAPACITY: usize = 64;

pub struct RelayServer {
    config: RelayConfig,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        Self { config }
    }

    /// Open the configured store and serve until Ctrl+C
    pub async fn run(self) -> Result<()> {
        if self.config.uses_memory_store() {
            warn!("using in-memory store, commands and fixes are not persisted");
            self.run_with(Arc::new(MemoryStore::new())).await
        } else {
            let store = SqliteStore::open(&self.config.database_path)?;
            self.run_with(Arc::new(store)).await
        }
    }

    async fn run_with<S>(&self, store: Arc<S>) -> Result<()>
    where
        S: CommandLog + TelemetryStore + 'static,
    {
        let (events, _) = broadcast::channel::<ServerEvent>(BROADCAST_CAPACITY);

        let actuator = if self.config.motor_enabled {
            let (handle, _writer) =
                ActuatorHandle::open_serial(&self.config.motor_serial, self.config.motor_baudrate)?;
            Some(handle)
        } else {
            info!("motor disabled, commands are logged only");
            None
        };

        let relay = Arc::new(Relay::new(
            Arc::clone(&store),
            actuator,
            self.config.replay_window,
        ));

        if self.config.gps_enabled {
            let gps = GpsIngest::new(store, events.clone());
            let port = self.config.gps_serial.clone();
            let baudrate = self.config.gps_baudrate;

            tokio::spawn(async move {
                match ingest::run_serial(&port, baudrate, &gps).await {
                    Ok(published) => info!(port = %port, published, "GPS feed ended"),
                    Err(e) => error!(port = %port, error = %e, "GPS feed failed"),
                }
            });
        } else {
            info!("GPS ingest disabled");
        }

        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(|e| {
                RelayError::Connection(format!(
                    "Failed to listen on {}: {}",
                    self.config.listen_addr, e
                ))
            })?;

        let timeouts = ClientTimeouts::new(self.config.client_timeout());

        tokio::select! {
            served = transport::serve(listener, relay, events, timeouts) => served,
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                Ok(())
            }
        }
    }
}

/// List available serial ports
pub fn list_serial_ports() -> Result<()> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| RelayError::Other(format!("Failed to list serial ports: {}", e)))?;

    if ports.is_empty() {
        println!("No serial ports found.");
    } else {
        println!("Available serial ports:");
        for port in ports {
            println!("  {} - {:?}", port.port_name, port.port_type);
        }
    }

    Ok(())
}
