//! Bandwidth estimation driven by an external decision engine.
//!
//! Transport events feed a [`telemetry::TelemetryAggregator`]; the
//! [`rate_controller::RateController`] exchanges the aggregate with an engine
//! over a [`bridge::DecisionBridge`] and turns its answers into pacing
//! directives.

pub mod bridge;
pub mod data_rate;
pub mod factory;
pub mod network_types;
pub mod rate_controller;
pub mod telemetry;
pub mod time;
