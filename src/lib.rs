#![warn(rust_2018_idioms)]

pub mod config;
mod error;
pub mod gcc;

pub use config::{BridgeConfig, Config, StateSink};
pub use error::{Error, Result};
pub use gcc::bridge::{BandwidthEstimate, DecisionBridge, DuplexBridge, DuplexOptions, FileBridge};
pub use gcc::factory::{ControllerFactory, NetworkControllerFactoryInterface};
pub use gcc::rate_controller::{ControllerState, NetworkControllerInterface, RateController};
pub use gcc::telemetry::{AggregatedState, TelemetryAggregator};
