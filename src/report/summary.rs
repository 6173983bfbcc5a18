use std::fmt::Write;

use crate::telemetry::{StatsSnapshot, TelemetryRecord, TopicState};
use crate::topic::Topic;

const RULE: &str = "============================================================";

/// End-of-monitoring summary: per-stream counts, failures, and the last
/// known position, status and battery.
pub fn render_summary(snapshot: &StatsSnapshot) -> String {
    let mut out = String::new();
    let count = |topic| snapshot.stats(topic).map_or(0, |s| s.count);
    let last = |topic| snapshot.stats(topic).and_then(|s| s.last.as_ref());

    let _ = writeln!(out, "{RULE}\nMONITORING SUMMARY\n{RULE}");
    let _ = writeln!(out, "Vehicle ID: {}", snapshot.vehicle);
    let _ = writeln!(out, "Location updates: {}", count(Topic::Location));
    let _ = writeln!(out, "Status updates: {}", count(Topic::Status));
    let _ = writeln!(out, "Battery updates: {}", count(Topic::Battery));
    let _ = writeln!(out, "Performance reports: {}", count(Topic::PerformanceReport));

    let rejected: u64 = snapshot.topics.iter().map(|t| t.stats.rejected).sum();
    if rejected > 0 {
        let _ = writeln!(out, "Rejected messages: {rejected}");
    }

    let foreign: u64 = snapshot.topics.iter().map(|t| t.stats.foreign).sum();
    if foreign > 0 {
        let _ = writeln!(out, "Records from other vehicles: {foreign}");
    }

    for summary in &snapshot.topics {
        if let TopicState::Failed(reason) = &summary.state {
            let _ = writeln!(out, "Stream {} failed: {reason}", summary.topic);
        }
    }

    if let Some(TelemetryRecord::Location(r)) = last(Topic::Location) {
        let _ = writeln!(
            out,
            "\nLast known position:\n  {:.6}, {:.6}",
            r.latitude, r.longitude
        );
    }
    if let Some(TelemetryRecord::Status(r)) = last(Topic::Status) {
        let _ = writeln!(
            out,
            "\nLast status:\n  Active: {}\n  Locked: {}",
            r.is_active, r.is_locked
        );
    }
    if let Some(TelemetryRecord::Battery(r)) = last(Topic::Battery) {
        let _ = writeln!(
            out,
            "\nLast battery:\n  {:.2}% ({:.2}V)",
            r.device_battery_level, r.device_voltage
        );
    }

    let _ = write!(out, "{RULE}");
    out
}
