//! Telemetry consumption: typed records, per-topic accounting and the
//! worker-per-topic dispatcher.

pub mod dispatcher;
pub mod handler;
pub mod record;
pub mod stats;

pub use dispatcher::{Dispatcher, TopicFailure};
pub use handler::StreamHandler;
pub use record::{Battery, Location, PerformanceReport, Status, TelemetryRecord};
pub use stats::{StatsSnapshot, StreamStats, TopicState, TopicSummary};
