use super::{
    bridge::{DecisionBridge, DuplexBridge, DuplexOptions, FileBridge},
    rate_controller::RateController,
    time::TimeDelta,
};
use crate::config::{BridgeConfig, Config};
use crate::error::Result;

/// NetworkControllerFactoryInterface creates network controllers.
pub trait NetworkControllerFactoryInterface {
    /// Used to create a new network controller, wired to its own bridge.
    fn create(&self) -> Result<RateController>;
    /// Returns the interval by which the network controller expects
    /// `on_process_interval` calls.
    fn get_process_interval(&self) -> TimeDelta;
}

/// Builds one controller per transport session from a validated `Config`.
#[derive(Debug, Clone)]
pub struct ControllerFactory {
    config: Config,
}

impl ControllerFactory {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn create_bridge(&self) -> Result<Box<dyn DecisionBridge>> {
        let default_estimate = self.config.default_estimate();
        let bridge: Box<dyn DecisionBridge> = match &self.config.bridge {
            BridgeConfig::File {
                estimate_path,
                state_sink,
            } => Box::new(FileBridge::new(estimate_path, state_sink, default_estimate)?),
            BridgeConfig::Process {
                program,
                args,
                request_token,
                response_timeout_ms,
            } => {
                let response_timeout = response_timeout_ms
                    .map(TimeDelta::from_millis)
                    .unwrap_or_else(|| self.config.process_interval());
                let options = DuplexOptions {
                    request_token: request_token.clone(),
                    response_timeout,
                    default_estimate,
                };
                Box::new(DuplexBridge::spawn(program, args, options)?)
            }
        };
        Ok(bridge)
    }

    /// Wires a caller-built bridge, e.g. one over in-process channels.
    pub fn create_with_bridge(&self, bridge: Box<dyn DecisionBridge>) -> RateController {
        RateController::new(&self.config, bridge)
    }
}

impl NetworkControllerFactoryInterface for ControllerFactory {
    fn create(&self) -> Result<RateController> {
        let bridge = self.create_bridge()?;
        log::debug!("created controller with {:?} bridge", self.config.bridge);
        Ok(self.create_with_bridge(bridge))
    }

    fn get_process_interval(&self) -> TimeDelta {
        self.config.process_interval()
    }
}
