//! Command publisher
//!
//! Validation happens before any broker call, so an unknown command or a bad
//! vehicle id never reaches the exchange. A successful `send` only means the
//! broker accepted the publish; whether the vehicle acted on it shows up
//! later as a status update on the telemetry side.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::command::CommandRequest;
use crate::session::{Broker, MemoryBroker};
use crate::topic::{Command, VehicleId, control_routing_key};
use crate::utils::{FleetError, Result};

/// Exactly what went over the wire for one command.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCommand {
    pub vehicle: VehicleId,
    pub command: Command,
    pub exchange: String,
    pub routing_key: String,
    pub body: String,
}

/// Publishes commands through a shared session. `send` takes `&self` and may
/// be called from many tasks at once.
#[derive(Clone)]
pub struct CommandPublisher {
    broker: Arc<dyn Broker>,
    exchange: String,
}

impl CommandPublisher {
    pub fn new(broker: Arc<dyn Broker>, exchange: impl Into<String>) -> Self {
        Self {
            broker,
            exchange: exchange.into(),
        }
    }

    /// A publisher on an in-process broker that already has `exchange`, for
    /// previewing a command. The returned broker records what was published.
    pub fn dry_run(exchange: impl Into<String>) -> (Self, MemoryBroker) {
        let exchange = exchange.into();
        let broker = MemoryBroker::with_vehicle_topology(&exchange);
        (Self::new(Arc::new(broker.clone()), exchange), broker)
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub async fn send(&self, request: CommandRequest) -> Result<OutboundCommand> {
        let outbound = encode(&self.exchange, request)?;
        self.broker
            .publish(&outbound.exchange, &outbound.routing_key, outbound.body.as_bytes())
            .await?;

        info!(
            "Sent {} to {} via '{}'",
            outbound.command, outbound.vehicle, outbound.routing_key
        );
        Ok(outbound)
    }
}

/// Validate `request` and render its routing key and body.
pub fn encode(exchange: &str, request: CommandRequest) -> Result<OutboundCommand> {
    let vehicle = VehicleId::parse(&request.vehicle_id)?;
    let command: Command = request.command.parse()?;
    let body = serde_json::to_string(&Value::Object(request.payload.unwrap_or_default()))
        .map_err(|e| FleetError::Configuration(format!("command payload is not serialisable: {e}")))?;

    Ok(OutboundCommand {
        routing_key: control_routing_key(command, &vehicle),
        exchange: exchange.to_string(),
        vehicle,
        command,
        body,
    })
}
