use chrono::{DateTime, Utc};

use crate::telemetry::TelemetryRecord;
use crate::topic::{Topic, VehicleId};

/// Counters and last-record cache of one topic stream.
///
/// Owned by that topic's worker alone; it is only handed out once the worker
/// has stopped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamStats {
    /// Records decoded and acknowledged.
    pub count: u64,
    /// Bodies dropped as undecodable.
    pub rejected: u64,
    /// Accepted records whose routing key named another vehicle.
    pub foreign: u64,
    pub last: Option<TelemetryRecord>,
    /// Local arrival time of `last`.
    pub last_seen: Option<DateTime<Utc>>,
}

impl StreamStats {
    /// Store `record` as the latest one and return its sequence number.
    pub fn accept(&mut self, record: TelemetryRecord) -> u64 {
        self.count += 1;
        self.last = Some(record);
        self.last_seen = Some(Utc::now());
        self.count
    }

    pub fn reject(&mut self) {
        self.rejected += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicState {
    Idle,
    Consuming,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopicSummary {
    pub topic: Topic,
    pub state: TopicState,
    pub stats: StreamStats,
}

/// Final per-topic state returned by `Dispatcher::stop`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub vehicle: VehicleId,
    pub topics: Vec<TopicSummary>,
}

impl StatsSnapshot {
    pub fn get(&self, topic: Topic) -> Option<&TopicSummary> {
        self.topics.iter().find(|summary| summary.topic == topic)
    }

    pub fn stats(&self, topic: Topic) -> Option<&StreamStats> {
        self.get(topic).map(|summary| &summary.stats)
    }

    pub fn total_received(&self) -> u64 {
        self.topics.iter().map(|summary| summary.stats.count).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = (Topic, &str)> {
        self.topics.iter().filter_map(|summary| match &summary.state {
            TopicState::Failed(reason) => Some((summary.topic, reason.as_str())),
            _ => None,
        })
    }
}
