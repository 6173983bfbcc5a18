use std::fmt;

use crate::topic::{Command, KEY_DELIMITER, VehicleId};
use crate::utils::{FleetError, Result};

/// Semantic stream carried over the vehicle exchange.
///
/// The first four are telemetry published by vehicles into pre-existing
/// queues. `Control` is the outbound pseudo-topic: it has no queue and its
/// routing key carries a command segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    Location,
    Status,
    Battery,
    PerformanceReport,
    Control,
}

impl Topic {
    pub const TELEMETRY: [Topic; 4] = [
        Topic::Location,
        Topic::Status,
        Topic::Battery,
        Topic::PerformanceReport,
    ];

    /// Routing-key prefix, without the trailing delimiter.
    pub fn key_prefix(self) -> &'static str {
        match self {
            Topic::Location => "realtime.location",
            Topic::Status => "realtime.status",
            Topic::Battery => "realtime.battery",
            Topic::PerformanceReport => "report.performance",
            Topic::Control => "control",
        }
    }

    pub fn is_telemetry(self) -> bool {
        self != Topic::Control
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topic::Location => "location",
            Topic::Status => "status",
            Topic::Battery => "battery",
            Topic::PerformanceReport => "performance",
            Topic::Control => "control",
        };
        f.write_str(name)
    }
}

/// Queue owned by the upstream ingestion service for a telemetry topic.
pub fn queue_for(topic: Topic) -> Result<&'static str> {
    match topic {
        Topic::Location => Ok("vehicle.realtime.location"),
        Topic::Status => Ok("vehicle.realtime.status"),
        Topic::Battery => Ok("vehicle.realtime.battery"),
        Topic::PerformanceReport => Ok("vehicle.report.performance"),
        Topic::Control => Err(FleetError::Configuration(
            "the control topic is publish-only and has no queue".to_string(),
        )),
    }
}

/// Routing key of a telemetry topic for one vehicle.
///
/// Control keys need a command segment; use [`control_routing_key`].
pub fn routing_key_for(topic: Topic, vehicle: &VehicleId) -> Result<String> {
    if !topic.is_telemetry() {
        return Err(FleetError::Configuration(
            "control routing keys are built from a command, not a topic".to_string(),
        ));
    }
    Ok(format!(
        "{}{KEY_DELIMITER}{}",
        topic.key_prefix(),
        vehicle.as_str()
    ))
}

pub fn control_routing_key(command: Command, vehicle: &VehicleId) -> String {
    format!(
        "{}{KEY_DELIMITER}{}{KEY_DELIMITER}{}",
        Topic::Control.key_prefix(),
        command.as_str(),
        vehicle.as_str()
    )
}

/// A routing key split back into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedKey {
    Telemetry { topic: Topic, vehicle: VehicleId },
    Control { command: Command, vehicle: VehicleId },
}

impl ParsedKey {
    pub fn vehicle(&self) -> &VehicleId {
        match self {
            ParsedKey::Telemetry { vehicle, .. } | ParsedKey::Control { vehicle, .. } => vehicle,
        }
    }
}

/// Inverse of [`routing_key_for`] and [`control_routing_key`].
pub fn parse_routing_key(key: &str) -> Result<ParsedKey> {
    let unknown = || FleetError::Configuration(format!("unrecognised routing key '{key}'"));

    let control_prefix = format!("{}{KEY_DELIMITER}", Topic::Control.key_prefix());
    if let Some(rest) = key.strip_prefix(&control_prefix) {
        let (command, vehicle) = rest.split_once(KEY_DELIMITER).ok_or_else(unknown)?;
        return Ok(ParsedKey::Control {
            command: command.parse()?,
            vehicle: VehicleId::parse(vehicle)?,
        });
    }

    for topic in Topic::TELEMETRY {
        let Some(rest) = key.strip_prefix(topic.key_prefix()) else {
            continue;
        };
        if let Some(vehicle) = rest.strip_prefix(KEY_DELIMITER) {
            return Ok(ParsedKey::Telemetry {
                topic,
                vehicle: VehicleId::parse(vehicle)?,
            });
        }
    }

    Err(unknown())
}
