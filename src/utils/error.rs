//! Error taxonomy shared by every `fleetlink` module.
//!
//! Variants fall into four groups:
//! - caller input (`InvalidIdentifier`, `UnknownCommand`): rejected before
//!   any broker call and never retried
//! - deployment mismatch (`Configuration`, `Topology`): fatal, reported with
//!   the queue/exchange involved
//! - transport (`Connection`, `Consume`, `Cancel`, `Publish`,
//!   `Acknowledge`, `SessionClosed`): `Connection` is the only retryable one
//! - per-message (`Decode`): contained by the dispatcher, the stream goes on

use thiserror::Error;

use crate::topic::Topic;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("invalid vehicle identifier {value:?}: {reason}")]
    InvalidIdentifier { value: String, reason: &'static str },

    #[error("unknown command {0:?} (expected start_rent, end_rent or kill_vehicle)")]
    UnknownCommand(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to load settings: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("failed to connect to broker at {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    #[error("cannot bind queue '{queue}' on exchange '{exchange}': {reason}")]
    Topology {
        queue: String,
        exchange: String,
        reason: String,
    },

    #[error("malformed {topic} message: {source}")]
    Decode {
        topic: Topic,
        #[source]
        source: serde_json::Error,
    },

    #[error("consumer on queue '{queue}' failed: {reason}")]
    Consume { queue: String, reason: String },

    #[error("cancelling consumer '{consumer_tag}' failed: {reason}")]
    Cancel { consumer_tag: String, reason: String },

    #[error("publish to '{exchange}' with key '{routing_key}' failed: {reason}")]
    Publish {
        exchange: String,
        routing_key: String,
        reason: String,
    },

    #[error("failed to settle delivery: {reason}")]
    Acknowledge { reason: String },

    #[error("broker session is closed")]
    SessionClosed,
}

impl FleetError {
    /// Only transport failures while connecting are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FleetError::Connection { .. })
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
