//! Outbound control commands: request builders and the publisher that turns
//! them into `control.{command}.{vehicleId}` messages.

pub mod publisher;
pub mod request;

pub use publisher::{CommandPublisher, OutboundCommand, encode};
pub use request::CommandRequest;

#[cfg(test)]
mod tests;
