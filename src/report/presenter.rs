use std::fmt::Write;

use crate::telemetry::TelemetryRecord;
use crate::topic::VehicleId;

/// Receives every accepted telemetry record. `vehicle` is the vehicle the
/// record's routing key names, which on a shared queue may not be the
/// monitored one.
///
/// Called from the topic's worker before the delivery is acknowledged, so
/// implementations should return quickly.
pub trait Presenter: Send + Sync {
    fn record(&self, vehicle: &VehicleId, record: &TelemetryRecord, sequence: u64);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn record(&self, _vehicle: &VehicleId, _record: &TelemetryRecord, _sequence: u64) {}
}

/// Prints each record as a short block on stdout. Records from a vehicle
/// other than the monitored one carry an extra line naming it.
#[derive(Debug, Clone)]
pub struct ConsolePresenter {
    monitored: VehicleId,
}

impl ConsolePresenter {
    pub fn new(monitored: VehicleId) -> Self {
        Self { monitored }
    }
}

impl Presenter for ConsolePresenter {
    fn record(&self, vehicle: &VehicleId, record: &TelemetryRecord, sequence: u64) {
        println!("{}", label_record(&self.monitored, vehicle, record, sequence));
    }
}

/// `format_record`, plus a vehicle line when `vehicle` is not `monitored`.
pub fn label_record(
    monitored: &VehicleId,
    vehicle: &VehicleId,
    record: &TelemetryRecord,
    sequence: u64,
) -> String {
    let mut out = format_record(record, sequence);
    if vehicle != monitored {
        let _ = write!(out, "\n   Vehicle: {vehicle} (shared queue)");
    }
    out
}

pub fn format_record(record: &TelemetryRecord, sequence: u64) -> String {
    let mut out = String::new();
    // writing into a String cannot fail
    let _ = match record {
        TelemetryRecord::Location(r) => write!(
            out,
            "LOCATION UPDATE #{sequence}\n   Coordinates: {:.6}, {:.6}\n   Altitude: {:.2}m\n   Time: {}",
            r.latitude, r.longitude, r.altitude, r.timestamp
        ),
        TelemetryRecord::Status(r) => write!(
            out,
            "STATUS UPDATE #{sequence}\n   Active: {} | Locked: {} | Killed: {}\n   Time: {}",
            r.is_active, r.is_locked, r.is_killed, r.timestamp
        ),
        TelemetryRecord::Battery(r) => write!(
            out,
            "BATTERY UPDATE #{sequence}\n   Voltage: {:.2}V | Level: {:.2}%\n   Time: {}",
            r.device_voltage, r.device_battery_level, r.timestamp
        ),
        TelemetryRecord::PerformanceReport(r) => write!(
            out,
            "PERFORMANCE REPORT #{sequence}\n\
             Order ID: {}\n\
             Weight Score: {}\n\
             Distance: {:.2} km\n\
             Avg Speed: {:.2} km/h\n\
             Max Speed: {:.2} km/h\n\
             Component Wear:\n  \
             Front Tire: {}m\n  \
             Rear Tire: {}m\n  \
             Brake Pad: {}m\n  \
             Engine Oil: {}m\n  \
             Chain/CVT: {}m\n  \
             Engine (Total): {}m",
            r.order_id,
            r.weight_score,
            r.distance_travelled,
            r.average_speed,
            r.max_speed,
            r.front_tire,
            r.rear_tire,
            r.brake_pad,
            r.engine_oil,
            r.chain_or_cvt,
            r.engine
        ),
    };
    out
}
