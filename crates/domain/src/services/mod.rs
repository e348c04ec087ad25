//! Shared service helpers: the activity log and telemetry wiring.

pub mod activity;
pub mod telemetry;

pub use activity::*;
pub use telemetry::*;
