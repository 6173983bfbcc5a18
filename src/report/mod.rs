//! Presentation
//!
//! The core hands decoded records to a [`Presenter`] and returns a
//! [`StatsSnapshot`](crate::telemetry::StatsSnapshot) when monitoring stops.
//! Nothing here feeds back into the core.

pub mod presenter;
pub mod summary;

pub use presenter::{ConsolePresenter, NullPresenter, Presenter, format_record, label_record};
pub use summary::render_summary;
