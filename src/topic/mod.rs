//! Topic vocabulary
//!
//! Fixed names for the four telemetry streams and the control stream, and the
//! rules for embedding a vehicle identifier (and, for control, a command name)
//! into a dot-delimited routing key. Everything here is pure; validation
//! errors surface before any broker call is made.

pub mod command;
pub mod routing;
pub mod vehicle;

pub use command::Command;
pub use routing::{
    ParsedKey, Topic, control_routing_key, parse_routing_key, queue_for, routing_key_for,
};
pub use vehicle::VehicleId;

/// Separator between routing-key segments.
pub const KEY_DELIMITER: char = '.';
