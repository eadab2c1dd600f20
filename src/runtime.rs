//! Runtime glue: configuration, the fatal-error supervisor, and telemetry.

pub mod config;
pub mod supervisor;
pub mod telemetry;
