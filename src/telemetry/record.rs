//! Telemetry bodies
//!
//! Vehicles publish flat JSON objects. Every field is optional on the wire:
//! a missing field takes its zero value (`0`, `false`, `""`) instead of
//! failing the whole message. Only bodies that are not a JSON object of the
//! expected shape are decode errors.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::topic::Topic;
use crate::utils::{FleetError, Result};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    pub vehicle_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Metres above sea level.
    pub altitude: f64,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Status {
    pub vehicle_id: String,
    pub is_active: bool,
    pub is_locked: bool,
    pub is_killed: bool,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Battery {
    pub vehicle_id: String,
    /// Volts.
    pub device_voltage: f64,
    /// Percent, 0-100.
    pub device_battery_level: f64,
    pub timestamp: String,
}

/// End-of-rent report. Distances are kilometres, speeds km/h, and the
/// component wear counters are metres of accumulated load.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceReport {
    pub vehicle_id: String,
    pub order_id: String,
    pub weight_score: String,
    pub distance_travelled: f64,
    pub average_speed: f64,
    pub max_speed: f64,
    pub front_tire: i64,
    pub rear_tire: i64,
    pub brake_pad: i64,
    pub engine_oil: i64,
    pub chain_or_cvt: i64,
    pub engine: i64,
    pub timestamp: String,
}

/// One decoded telemetry message, tagged by the stream it arrived on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum TelemetryRecord {
    Location(Location),
    Status(Status),
    Battery(Battery),
    PerformanceReport(PerformanceReport),
}

impl TelemetryRecord {
    pub fn decode(topic: Topic, body: &[u8]) -> Result<Self> {
        let decode_error = |source| FleetError::Decode { topic, source };
        match topic {
            Topic::Location => decode_object(body)
                .map(TelemetryRecord::Location)
                .map_err(decode_error),
            Topic::Status => decode_object(body)
                .map(TelemetryRecord::Status)
                .map_err(decode_error),
            Topic::Battery => decode_object(body)
                .map(TelemetryRecord::Battery)
                .map_err(decode_error),
            Topic::PerformanceReport => decode_object(body)
                .map(TelemetryRecord::PerformanceReport)
                .map_err(decode_error),
            Topic::Control => Err(FleetError::Configuration(
                "control messages are not telemetry".to_string(),
            )),
        }
    }

    pub fn topic(&self) -> Topic {
        match self {
            TelemetryRecord::Location(_) => Topic::Location,
            TelemetryRecord::Status(_) => Topic::Status,
            TelemetryRecord::Battery(_) => Topic::Battery,
            TelemetryRecord::PerformanceReport(_) => Topic::PerformanceReport,
        }
    }

    /// Vehicle-side timestamp, as sent (ISO-8601, possibly empty).
    pub fn timestamp(&self) -> &str {
        match self {
            TelemetryRecord::Location(r) => &r.timestamp,
            TelemetryRecord::Status(r) => &r.timestamp,
            TelemetryRecord::Battery(r) => &r.timestamp,
            TelemetryRecord::PerformanceReport(r) => &r.timestamp,
        }
    }
}

/// Derived struct deserializers also accept a positional JSON array, which
/// with `#[serde(default)]` would turn `[]` into an all-zero record.
fn decode_object<T: DeserializeOwned>(body: &[u8]) -> serde_json::Result<T> {
    match serde_json::from_slice(body)? {
        Value::Object(map) => serde_json::from_value(Value::Object(map)),
        other => Err(serde_json::Error::custom(format!(
            "expected a JSON object, found {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
