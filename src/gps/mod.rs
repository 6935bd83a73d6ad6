// src/gps/mod.rs
//! GPS telemetry parsing and ingest

pub mod data;
pub mod ingest;
pub mod nmea;

pub use data::{Hemisphere, RmcFix, TelemetryFix};
pub use ingest::GpsIngest;
