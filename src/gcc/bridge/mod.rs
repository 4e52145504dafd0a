//! Channel to the external decision engine that turns aggregated telemetry
//! into a bandwidth estimate.

mod duplex;
mod file;

pub use duplex::{DuplexBridge, DuplexOptions};
pub use file::FileBridge;

use super::{data_rate::DataRate, telemetry::AggregatedState, time::Timestamp};
use crate::error::{Error, Result};

/// One answer from the decision engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandwidthEstimate {
    pub target_rate: DataRate,
    /// Pacing rate the engine would like, when it suggests one. Advisory only:
    /// the pacer directive keeps its configured pacing formula.
    pub pacing_rate_hint: Option<DataRate>,
    pub at_time: Timestamp,
}

impl BandwidthEstimate {
    pub fn new(target_rate: DataRate, at_time: Timestamp) -> Self {
        Self {
            target_rate,
            pacing_rate_hint: None,
            at_time,
        }
    }

    pub fn with_pacing_rate_hint(mut self, pacing_rate_hint: Option<DataRate>) -> Self {
        self.pacing_rate_hint = pacing_rate_hint;
        self
    }
}

/// A decision engine backend.
///
/// Neither operation may fail or block for longer than one process interval:
/// backends log their own failures and fall back to a usable estimate. The
/// owning controller serializes all calls, so implementations need no
/// internal locking.
pub trait DecisionBridge: Send {
    /// Hands the current telemetry to the engine, fire-and-forget.
    fn push_state(&mut self, state: &AggregatedState);

    /// Returns the most recent estimate the engine has to offer, stamped
    /// with `at_time`.
    fn pull_estimate(&mut self, at_time: Timestamp) -> BandwidthEstimate;
}

impl<B: DecisionBridge + ?Sized> DecisionBridge for Box<B> {
    fn push_state(&mut self, state: &AggregatedState) {
        (**self).push_state(state)
    }

    fn pull_estimate(&mut self, at_time: Timestamp) -> BandwidthEstimate {
        (**self).pull_estimate(at_time)
    }
}

/// Parses an engine answer: a non-negative decimal target bitrate in bits
/// per second, optionally followed by a pacing rate in the same unit.
pub(crate) fn parse_estimate(text: &str, at_time: Timestamp) -> Result<BandwidthEstimate> {
    let malformed = || Error::ErrMalformedBridgeResponse(text.trim().to_owned());
    let mut fields = text.split_whitespace();
    let target_rate = fields.next().and_then(parse_bps).ok_or_else(malformed)?;
    let pacing_rate_hint = match fields.next() {
        Some(field) => Some(parse_bps(field).ok_or_else(malformed)?),
        None => None,
    };
    if fields.next().is_some() {
        return Err(malformed());
    }
    Ok(BandwidthEstimate::new(target_rate, at_time).with_pacing_rate_hint(pacing_rate_hint))
}

fn parse_bps(field: &str) -> Option<DataRate> {
    match field.parse::<i64>() {
        Ok(bps) if bps >= 0 => Some(DataRate::from_bits_per_sec(bps)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<BandwidthEstimate> {
        parse_estimate(text, Timestamp::from_millis(7))
    }

    #[test]
    fn parses_plain_bitrates() {
        assert_eq!(parse("450000").unwrap().target_rate.bps(), 450_000);
        assert_eq!(parse("  1200\r\n").unwrap().target_rate.bps(), 1_200);

        let estimate = parse("0").unwrap();
        assert!(estimate.target_rate.is_zero());
        assert_eq!(estimate.pacing_rate_hint, None);
        assert_eq!(estimate.at_time, Timestamp::from_millis(7));
    }

    #[test]
    fn parses_optional_pacing_rate() {
        let estimate = parse("450000 1125000\n").unwrap();
        assert_eq!(estimate.target_rate.bps(), 450_000);
        assert_eq!(estimate.pacing_rate_hint.unwrap().bps(), 1_125_000);

        let estimate = parse("450000\t900000").unwrap();
        assert_eq!(estimate.pacing_rate_hint.unwrap().bps(), 900_000);
    }

    #[test]
    fn rejects_malformed_bitrates() {
        for text in [
            "",
            "   ",
            "-5",
            "1.5e6",
            "fast",
            "99999999999999999999",
            "12 34 56",
            "12 -34",
            "12 fast",
        ] {
            assert!(
                matches!(parse(text), Err(Error::ErrMalformedBridgeResponse(_))),
                "{text:?} should be rejected"
            );
        }
    }
}
