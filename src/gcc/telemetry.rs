use serde::Serialize;

use super::{data_rate::DataRate, time::TimeDelta};
use crate::error::Result;

/// Rolling view of the network signals the decision engine consumes.
///
/// Loss is kept as a fraction in `[0, 1]` everywhere: on input, in the
/// record pushed to the engine, and in the directive handed to the pacer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct AggregatedState {
    #[serde(rename = "rtt")]
    pub last_rtt_ms: i64,
    #[serde(rename = "loss_rate")]
    pub last_loss_rate: f64,
    #[serde(rename = "delay_interval")]
    pub last_delay_interval_ms: i64,
    #[serde(rename = "receiver_side_thp")]
    pub avg_receiver_side_thp_bps: f64,
}

impl AggregatedState {
    pub fn loss_rate_percent(&self) -> f64 {
        100.0 * self.last_loss_rate
    }

    pub fn round_trip_time(&self) -> TimeDelta {
        TimeDelta::from_millis(self.last_rtt_ms)
    }

    /// One JSON object, no trailing newline.
    pub fn to_record(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Default)]
pub struct TelemetryAggregator {
    state: AggregatedState,
    throughput_buffer: Vec<f64>,
}

impl TelemetryAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the sample was stored. Smoothed samples are dropped
    /// since the engine does its own filtering.
    pub fn on_round_trip_time_update(&mut self, rtt: TimeDelta, smoothed: bool) -> bool {
        if smoothed {
            return false;
        }
        if rtt.is_infinite() || rtt.us() < 0 {
            log::debug!("ignoring unusable rtt sample {rtt}");
            return false;
        }
        self.state.last_rtt_ms = rtt.ms();
        true
    }

    pub fn on_loss_report(&mut self, packets_lost_delta: i64, packets_received_delta: i64) -> bool {
        if packets_lost_delta < 0 || packets_received_delta < 0 {
            log::debug!(
                "ignoring loss report with negative deltas: lost={packets_lost_delta} received={packets_received_delta}"
            );
            return false;
        }
        let expected = packets_lost_delta + packets_received_delta;
        if expected == 0 {
            return false;
        }
        self.state.last_loss_rate = packets_lost_delta as f64 / expected as f64;
        true
    }

    pub fn on_throughput_sample(&mut self, throughput: DataRate) -> bool {
        let bps = throughput.bps_f64();
        if !bps.is_finite() || bps < 0.0 {
            log::debug!("ignoring unusable throughput sample {throughput}");
            return false;
        }
        self.throughput_buffer.push(bps);
        true
    }

    /// Averages and clears the buffered throughput samples. With nothing
    /// buffered the previous average is kept rather than reset to zero.
    pub fn flush_average_throughput(&mut self) -> DataRate {
        if !self.throughput_buffer.is_empty() {
            let sum: f64 = self.throughput_buffer.iter().sum();
            self.state.avg_receiver_side_thp_bps = sum / self.throughput_buffer.len() as f64;
            self.throughput_buffer.clear();
        }
        DataRate::from_bits_per_sec_f64(self.state.avg_receiver_side_thp_bps)
    }

    pub fn set_delay_interval(&mut self, delay_interval: TimeDelta) {
        self.state.last_delay_interval_ms = delay_interval.ms();
    }

    pub fn state(&self) -> &AggregatedState {
        &self.state
    }

    pub fn buffered_samples(&self) -> usize {
        self.throughput_buffer.len()
    }
}
