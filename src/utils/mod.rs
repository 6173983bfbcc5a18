//! Shared plumbing: the crate-wide error type and tracing setup.

pub mod error;
pub mod logging;

pub use error::{FleetError, Result};
