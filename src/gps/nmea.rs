// src/gps/nmea.rs
//! NMEA RMC sentence parsing and coordinate conversion

use super::data::{Hemisphere, RmcFix};
use crate::error::{RelayError, Result};
use tracing::debug;

/// Recommended minimum navigation data
pub const RMC_SENTENCE_ID: &str = "$GPRMC";

/// Status field value for an active (valid) fix
pub const FIX_ACTIVE: &str = "A";

/// Parse a single line, keeping only valid RMC fixes.
///
/// Other sentence types, void fixes and unparseable fields yield `None`;
/// none of these are errors.
pub fn parse_rmc(line: &str) -> Option<RmcFix> {
    let line = line.trim();
    let parts: Vec<&str> = line.split(',').collect();

    if parts[0] != RMC_SENTENCE_ID || parts.get(2) != Some(&FIX_ACTIVE) {
        return None;
    }

    if parts.len() < 8 {
        debug!(sentence = line, "truncated RMC sentence dropped");
        return None;
    }

    let latitude = match coordinate_field(parts[3], parts[4]) {
        Ok(lat) => lat,
        Err(e) => {
            debug!(sentence = line, error = %e, "bad latitude, sentence dropped");
            return None;
        }
    };

    let longitude = match coordinate_field(parts[5], parts[6]) {
        Ok(lon) => lon,
        Err(e) => {
            debug!(sentence = line, error = %e, "bad longitude, sentence dropped");
            return None;
        }
    };

    // Speed over ground in knots (field 7), may be blank when stationary
    let speed = if parts[7].is_empty() {
        0.0
    } else {
        match parts[7].parse::<f64>() {
            Ok(speed) => speed,
            Err(_) => {
                debug!(sentence = line, "bad speed, sentence dropped");
                return None;
            }
        }
    };

    Some(RmcFix {
        latitude,
        longitude,
        speed,
    })
}

fn coordinate_field(value: &str, hemisphere: &str) -> Result<f64> {
    let hemisphere = Hemisphere::from_letter(hemisphere)
        .ok_or_else(|| RelayError::Parse(format!("unknown hemisphere '{}'", hemisphere)))?;
    convert_coordinate(value, hemisphere)
}

/// Convert `DDMM.MMMM` / `DDDMM.MMMM` into signed decimal degrees.
///
/// The last two digits before the decimal point are whole minutes, the
/// digits in front of them are whole degrees. The same formula applies to
/// latitude and longitude: degrees + minutes / 60.
pub fn convert_coordinate(value: &str, hemisphere: Hemisphere) -> Result<f64> {
    let (int_part, frac_part) = value.split_once('.').unwrap_or((value, ""));

    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if int_part.len() < 2 || !all_digits(int_part) || !all_digits(frac_part) {
        return Err(RelayError::Parse(format!("malformed coordinate '{}'", value)));
    }

    let (degree_digits, minute_digits) = int_part.split_at(int_part.len() - 2);

    let degrees = if degree_digits.is_empty() {
        0.0
    } else {
        degree_digits
            .parse::<u32>()
            .map_err(|e| RelayError::Parse(format!("degrees in '{}': {}", value, e)))?
            as f64
    };

    let minutes_text = if frac_part.is_empty() {
        minute_digits.to_string()
    } else {
        format!("{}.{}", minute_digits, frac_part)
    };
    let minutes = minutes_text
        .parse::<f64>()
        .map_err(|e| RelayError::Parse(format!("minutes in '{}': {}", value, e)))?;

    if minutes >= 60.0 {
        return Err(RelayError::Parse(format!("minutes out of range in '{}'", value)));
    }

    Ok(hemisphere.sign() * (degrees + minutes / 60.0))
}
