// src/main.rs
//! Rover Relay - motor command relay with GPS telemetry

use clap::Parser;
use rover_relay::{config::RelayConfig, logging, server};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "rover-relay", version, about)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to accept client connections on
    #[arg(short, long)]
    listen: Option<String>,

    /// SQLite database file, or ":memory:"
    #[arg(short, long)]
    database: Option<String>,

    /// Log commands without driving the motor controller
    #[arg(long)]
    no_motor: bool,

    /// Do not read the GPS serial feed
    #[arg(long)]
    no_gps: bool,

    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    write_config: bool,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_logging(&args.log);

    if args.list_ports {
        server::list_serial_ports()?;
        return Ok(());
    }

    let mut config = RelayConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if args.no_motor {
        config.motor_enabled = false;
    }
    if args.no_gps {
        config.gps_enabled = false;
    }

    if args.write_config {
        let path = config.save(args.config.as_deref())?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    info!(
        motor = config.motor_enabled,
        gps = config.gps_enabled,
        listen = %config.listen_addr,
        "starting rover relay"
    );

    server::RelayServer::new(config).run().await?;
    Ok(())
}
