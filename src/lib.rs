//! # Fleetlink
//!
//! `fleetlink` watches one rental vehicle's telemetry on a RabbitMQ topic
//! exchange and sends it control commands over the same exchange.
//!
//! ## Core Modules
//!
//! - `topic`: vehicle ids, telemetry topics, commands, and the routing keys built from them.
//! - `session`: the `Broker` seam, with a `lapin` implementation and an in-memory one.
//! - `telemetry`: typed records, per-topic stream handlers, and the dispatcher that runs them.
//! - `command`: encoding and publishing of control commands.
//! - `report`: console rendering of records and of the end-of-run summary.
//! - `config`: layered settings (defaults, `config/default.toml`, environment).
//! - `utils`: the crate error type and logging setup.

pub mod command;
pub mod config;
pub mod report;
pub mod session;
pub mod telemetry;
pub mod topic;
pub mod utils;
