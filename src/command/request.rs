use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

/// A command addressed to one vehicle, as supplied by the caller.
///
/// Nothing is validated here; `CommandPublisher::send` checks the vehicle
/// identifier and the command name before touching the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub vehicle_id: String,
    pub command: String,
    pub payload: Option<Map<String, Value>>,
}

impl CommandRequest {
    pub fn new(
        vehicle_id: impl Into<String>,
        command: impl Into<String>,
        payload: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            command: command.into(),
            payload,
        }
    }

    /// Unlock the vehicle and start tracking a rental. Without an explicit
    /// order id one is derived as `ORD-{vehicleId}-{unixSeconds}`.
    pub fn start_rent(vehicle_id: &str, order_id: Option<&str>) -> Self {
        let now = Utc::now();
        let order_id = order_id
            .map(str::to_string)
            .unwrap_or_else(|| default_order_id(vehicle_id, now));

        let mut payload = timestamp_payload(now);
        payload.insert("order_id".to_string(), Value::String(order_id));
        Self::new(vehicle_id, "start_rent", Some(payload))
    }

    /// Lock the vehicle; the firmware answers with a performance report.
    pub fn end_rent(vehicle_id: &str) -> Self {
        Self::new(vehicle_id, "end_rent", Some(timestamp_payload(Utc::now())))
    }

    /// Schedule an engine kill; the firmware applies it once the vehicle is
    /// below walking speed.
    pub fn kill_vehicle(vehicle_id: &str) -> Self {
        Self::new(vehicle_id, "kill_vehicle", Some(timestamp_payload(Utc::now())))
    }

    /// `order_id` of the payload, if any.
    pub fn order_id(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|payload| payload.get("order_id"))
            .and_then(Value::as_str)
    }
}

pub(crate) fn default_order_id(vehicle_id: &str, now: DateTime<Utc>) -> String {
    format!("ORD-{vehicle_id}-{}", now.timestamp())
}

/// ISO-8601 UTC with milliseconds, e.g. `2024-05-01T10:00:00.000Z`.
pub(crate) fn format_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn timestamp_payload(now: DateTime<Utc>) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert(
        "timestamp".to_string(),
        Value::String(format_timestamp(now)),
    );
    payload
}
