use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::gcc::data_rate::DataRate;
use crate::gcc::time::TimeDelta;

// Pacing-rate relative to our target send rate.
// Multiplicative factor that is applied to the target bitrate to calculate
// the number of bytes that can be transmitted per interval.
pub const DEFAULT_PACING_FACTOR: f64 = 2.5;
pub const DEFAULT_ESTIMATE_BPS: i64 = 300_000;
pub const DEFAULT_PROCESS_INTERVAL_MS: i64 = 25;
pub const DEFAULT_ESTIMATE_PATH: &str = "bwe.txt";
pub const DEFAULT_REQUEST_TOKEN: &str = "RequestBandwidth";

/// Construction parameters for a controller. Immutable once handed to the
/// factory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pacing_factor: f64,
    pub min_total_allocated_bitrate_bps: i64,
    pub max_padding_rate_bps: i64,
    /// Returned whenever the decision engine has nothing usable to offer.
    pub default_estimate_bps: i64,
    /// Period at which the transport is expected to call `on_process_interval`.
    pub process_interval_ms: i64,
    pub bridge: BridgeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pacing_factor: DEFAULT_PACING_FACTOR,
            min_total_allocated_bitrate_bps: 0,
            max_padding_rate_bps: 0,
            default_estimate_bps: DEFAULT_ESTIMATE_BPS,
            process_interval_ms: DEFAULT_PROCESS_INTERVAL_MS,
            bridge: BridgeConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !self.pacing_factor.is_finite() || self.pacing_factor <= 0.0 {
            return Err(Error::ErrInvalidPacingFactor(self.pacing_factor));
        }
        for (field, value) in [
            (
                "min_total_allocated_bitrate_bps",
                self.min_total_allocated_bitrate_bps,
            ),
            ("max_padding_rate_bps", self.max_padding_rate_bps),
            ("default_estimate_bps", self.default_estimate_bps),
        ] {
            if value < 0 {
                return Err(Error::ErrNegativeRate { field, value });
            }
        }
        if self.process_interval_ms <= 0 {
            return Err(Error::ErrInvalidProcessInterval(self.process_interval_ms));
        }

        match &self.bridge {
            BridgeConfig::File {
                estimate_path,
                state_sink,
            } => {
                if estimate_path.as_os_str().is_empty() {
                    return Err(Error::ErrEmptyBridgeLocation);
                }
                if let StateSink::File(path) = state_sink {
                    if path.as_os_str().is_empty() {
                        return Err(Error::ErrEmptyBridgeLocation);
                    }
                }
            }
            BridgeConfig::Process {
                program,
                response_timeout_ms,
                ..
            } => {
                if program.as_os_str().is_empty() {
                    return Err(Error::ErrEmptyBridgeLocation);
                }
                if let Some(timeout_ms) = *response_timeout_ms {
                    if timeout_ms <= 0 || timeout_ms > self.process_interval_ms {
                        return Err(Error::ErrInvalidResponseTimeout {
                            timeout_ms,
                            interval_ms: self.process_interval_ms,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn min_total_allocated_bitrate(&self) -> DataRate {
        DataRate::from_bits_per_sec(self.min_total_allocated_bitrate_bps)
    }

    pub fn max_padding_rate(&self) -> DataRate {
        DataRate::from_bits_per_sec(self.max_padding_rate_bps)
    }

    pub fn default_estimate(&self) -> DataRate {
        DataRate::from_bits_per_sec(self.default_estimate_bps)
    }

    pub fn process_interval(&self) -> TimeDelta {
        TimeDelta::from_millis(self.process_interval_ms)
    }
}

/// Selects and locates the decision engine backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum BridgeConfig {
    /// Poll a text file holding the latest estimate; push state records to
    /// `state_sink`.
    File {
        estimate_path: PathBuf,
        #[serde(default)]
        state_sink: StateSink,
    },
    /// Spawn the engine and talk to it over its stdin/stdout.
    Process {
        program: PathBuf,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_request_token")]
        request_token: String,
        /// Defaults to the process interval.
        #[serde(default)]
        response_timeout_ms: Option<i64>,
    },
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig::File {
            estimate_path: PathBuf::from(DEFAULT_ESTIMATE_PATH),
            state_sink: StateSink::default(),
        }
    }
}

fn default_request_token() -> String {
    DEFAULT_REQUEST_TOKEN.to_owned()
}

/// Where the file backend writes state records. None of them can stall the
/// controller on a slow reader.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateSink {
    /// Written from a helper thread through a bounded queue; records are
    /// dropped while the queue is full.
    #[default]
    Stdout,
    /// Regular file opened once in append mode and written in place.
    File(PathBuf),
    Discard,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.pacing_factor, 2.5);
        assert_eq!(config.min_total_allocated_bitrate_bps, 0);
        assert_eq!(config.max_padding_rate_bps, 0);
        assert_eq!(config.default_estimate().bps(), 300_000);
        assert_eq!(config.process_interval(), TimeDelta::from_millis(25));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_pacing_factor() {
        for pacing_factor in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = Config {
                pacing_factor,
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(Error::ErrInvalidPacingFactor(_))
            ));
        }
    }

    #[test]
    fn rejects_negative_rates() {
        let config = Config {
            max_padding_rate_bps: -1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::ErrNegativeRate {
                field: "max_padding_rate_bps",
                value: -1
            })
        ));
    }

    #[test]
    fn rejects_empty_locations() {
        let config = Config {
            bridge: BridgeConfig::File {
                estimate_path: PathBuf::new(),
                state_sink: StateSink::Discard,
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::ErrEmptyBridgeLocation)
        ));
    }

    #[test]
    fn response_timeout_bounded_by_process_interval() {
        let config = Config {
            bridge: BridgeConfig::Process {
                program: PathBuf::from("engine"),
                args: vec![],
                request_token: DEFAULT_REQUEST_TOKEN.to_owned(),
                response_timeout_ms: Some(26),
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::ErrInvalidResponseTimeout {
                timeout_ms: 26,
                interval_ms: 25
            })
        ));
    }

    #[test]
    fn deserializes_partial_config() {
        let config: Config = serde_json::from_str(
            r#"{
                "pacing_factor": 1.5,
                "bridge": { "backend": "process", "program": "python3", "args": ["engine.py"] }
            }"#,
        )
        .unwrap();
        assert_eq!(config.pacing_factor, 1.5);
        assert_eq!(config.default_estimate_bps, DEFAULT_ESTIMATE_BPS);
        assert_eq!(
            config.bridge,
            BridgeConfig::Process {
                program: PathBuf::from("python3"),
                args: vec!["engine.py".to_owned()],
                request_token: DEFAULT_REQUEST_TOKEN.to_owned(),
                response_timeout_ms: None,
            }
        );
        assert!(config.validate().is_ok());
    }
}
