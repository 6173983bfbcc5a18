use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::report::Presenter;
use crate::session::Disposition;
use crate::telemetry::{StreamStats, TelemetryRecord};
use crate::topic::{ParsedKey, Topic, VehicleId, parse_routing_key};

/// Decodes and accounts for the messages of a single topic.
///
/// `on_message` is synchronous and returns the settlement the consume loop
/// must apply. Stats are updated before the disposition is returned, so a
/// record is counted before its delivery is acknowledged.
pub struct StreamHandler {
    topic: Topic,
    vehicle: VehicleId,
    stats: StreamStats,
    presenter: Arc<dyn Presenter>,
}

impl StreamHandler {
    pub fn new(topic: Topic, vehicle: VehicleId, presenter: Arc<dyn Presenter>) -> Self {
        Self {
            topic,
            vehicle,
            stats: StreamStats::default(),
            presenter,
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Handle one delivery body that arrived with `routing_key`.
    ///
    /// The telemetry queues are shared, so a record may belong to another
    /// vehicle. Such records are still counted and acked, but they reach the
    /// presenter under their own vehicle id and are tallied as foreign.
    pub fn on_message(&mut self, routing_key: &str, body: &[u8]) -> Disposition {
        match TelemetryRecord::decode(self.topic, body) {
            Ok(record) => {
                let source = self.source_vehicle(routing_key);
                let foreign = source.as_ref().is_some_and(|v| *v != self.vehicle);
                if foreign {
                    self.stats.foreign += 1;
                }
                let sequence = self.stats.accept(record);
                let vehicle = source.as_ref().unwrap_or(&self.vehicle);
                if let Some(record) = &self.stats.last {
                    self.presenter.record(vehicle, record, sequence);
                }
                if foreign {
                    info!("{} #{sequence} from other vehicle {vehicle} on a shared queue", self.topic);
                } else {
                    debug!("{} #{sequence} for {vehicle}", self.topic);
                }
                Disposition::Ack
            }
            Err(e) => {
                self.stats.reject();
                let preview: String = String::from_utf8_lossy(body).chars().take(100).collect();
                warn!("Dropping {} message for {}: {e} | {preview}", self.topic, self.vehicle);
                // a malformed body will not become valid on redelivery
                Disposition::Reject { requeue: false }
            }
        }
    }

    /// Vehicle named by a telemetry routing key of this handler's topic.
    fn source_vehicle(&self, routing_key: &str) -> Option<VehicleId> {
        match parse_routing_key(routing_key) {
            Ok(ParsedKey::Telemetry { topic, vehicle }) if topic == self.topic => Some(vehicle),
            _ => {
                debug!("Unexpected routing key '{routing_key}' on the {} stream", self.topic);
                None
            }
        }
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn into_stats(self) -> StreamStats {
        self.stats
    }
}
