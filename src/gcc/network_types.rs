use super::{
    data_rate::{DataRate, DataSize},
    time::{TimeDelta, Timestamp},
};

// Inbound events, produced by the RTP/RTCP side of the transport.

#[derive(Debug, Clone, Copy)]
pub struct NetworkAvailability {
    pub at_time: Timestamp,
    pub network_available: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct TargetRateConstraints {
    pub at_time: Timestamp,
    pub min_data_rate: Option<DataRate>,
    pub max_data_rate: Option<DataRate>,
    // The initial bandwidth estimate to base target rate on. This should be used
    // as the basis for initial OnTargetTransferRate and OnPacerConfig callbacks.
    pub starting_rate: Option<DataRate>,
}

impl Default for TargetRateConstraints {
    fn default() -> Self {
        Self {
            at_time: Timestamp::plus_infinity(),
            min_data_rate: None,
            max_data_rate: None,
            starting_rate: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NetworkRouteChange {
    pub at_time: Timestamp,
    // The TargetRateConstraints are set here so they can be changed synchronously
    // when network route changes.
    pub constraints: TargetRateConstraints,
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessInterval {
    pub at_time: Timestamp,
    pub pacer_queue: Option<DataSize>,
}

impl ProcessInterval {
    pub fn at(at_time: Timestamp) -> Self {
        Self {
            at_time,
            pacer_queue: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RemoteBitrateReport {
    pub receive_time: Timestamp,
    pub bandwidth: DataRate,
}

#[derive(Debug, Clone, Copy)]
pub struct RoundTripTimeUpdate {
    pub receive_time: Timestamp,
    pub round_trip_time: TimeDelta,
    pub smoothed: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SentPacket {
    pub send_time: Timestamp,
    // Size of packet with overhead up to IP layer.
    pub size: DataSize,
    // Size of preceeding packets that are not part of feedback.
    pub prior_unacked_data: DataSize,
    // True if the packet is an audio packet, false for video, padding, RTX etc.
    pub audio: bool,
    // Transport independent sequence number, any tracked packet should have a
    // sequence number that is unique over the whole call and increasing by 1 for
    // each packet.
    pub sequence_number: i64,
    // Tracked data in flight when the packet was sent, excluding unacked data.
    pub data_in_flight: DataSize,
}

impl Default for SentPacket {
    fn default() -> Self {
        Self {
            send_time: Timestamp::plus_infinity(),
            size: DataSize::zero(),
            prior_unacked_data: DataSize::zero(),
            audio: false,
            sequence_number: 0,
            data_in_flight: DataSize::zero(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReceivedPacket {
    pub send_time: Timestamp,
    pub receive_time: Timestamp,
    pub size: DataSize,
}

/// Signals that stream-level configuration changed. The controller answers
/// with a directive built from its last estimate.
#[derive(Debug, Clone, Copy)]
pub struct StreamsConfig {
    pub at_time: Timestamp,
}

impl StreamsConfig {
    pub fn at(at_time: Timestamp) -> Self {
        Self { at_time }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransportLossReport {
    pub receive_time: Timestamp,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub packets_lost_delta: i64,
    pub packets_received_delta: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct PacketResult {
    pub sent_packet: SentPacket,
    pub receive_time: Timestamp,
}

impl Default for PacketResult {
    fn default() -> Self {
        Self {
            sent_packet: Default::default(),
            receive_time: Timestamp::plus_infinity(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportPacketsFeedback {
    pub feedback_time: Timestamp,
    pub first_unacked_send_time: Timestamp,
    pub data_in_flight: DataSize,
    pub prior_in_flight: DataSize,
    pub packet_feedbacks: Vec<PacketResult>,
    // Arrival times for messages without send time information.
    pub sendless_arrival_times: Vec<Timestamp>,
}

impl Default for TransportPacketsFeedback {
    fn default() -> Self {
        Self {
            feedback_time: Timestamp::plus_infinity(),
            first_unacked_send_time: Timestamp::plus_infinity(),
            data_in_flight: DataSize::zero(),
            prior_in_flight: DataSize::zero(),
            packet_feedbacks: Vec::new(),
            sendless_arrival_times: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NetworkStateEstimate {
    pub confidence: f64,
    // The time the estimate was received/calculated.
    pub update_time: Timestamp,
    pub last_receive_time: Timestamp,
    pub last_send_time: Timestamp,
    // Total estimated link capacity.
    pub link_capacity: DataRate,
    // Used as a safe measure of available capacity.
    pub link_capacity_lower: DataRate,
    // Used as limit for increasing bitrate.
    pub link_capacity_upper: DataRate,
    pub propagation_delay: TimeDelta,
}

impl Default for NetworkStateEstimate {
    fn default() -> Self {
        Self {
            confidence: f64::NAN,
            update_time: Timestamp::minus_infinity(),
            last_receive_time: Timestamp::minus_infinity(),
            last_send_time: Timestamp::minus_infinity(),
            link_capacity: DataRate::infinity(),
            link_capacity_lower: DataRate::infinity(),
            link_capacity_upper: DataRate::infinity(),
            propagation_delay: TimeDelta::minus_infinity(),
        }
    }
}

/// Receiver-side throughput measured over one reporting interval.
#[derive(Debug, Clone, Copy)]
pub struct ReceiverSideThroughputSample {
    pub bps: f64,
}

// Outbound directive, consumed by the pacer.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkEstimate {
    pub at_time: Timestamp,
    pub bandwidth: DataRate,
    pub round_trip_time: TimeDelta,
    pub bwe_period: TimeDelta,
    /// Fraction of packets lost, always within `[0, 1]`.
    pub loss_rate_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetTransferRate {
    pub at_time: Timestamp,
    pub network_estimate: NetworkEstimate,
    pub target_rate: DataRate,
    pub stable_target_rate: DataRate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacerConfig {
    pub at_time: Timestamp,
    pub pacing_rate: DataRate,
    pub padding_rate: DataRate,
    // Pacer should send at most data_window data over time_window duration.
    pub data_window: DataSize,
    pub time_window: TimeDelta,
    // Pacer should send at least pad_window data over time_window duration.
    pub pad_window: DataSize,
    /// Pacing rate suggested by the decision engine. Advisory: `pacing_rate`
    /// always follows the configured pacing formula.
    pub pacing_rate_hint: Option<DataRate>,
}

impl PacerConfig {
    pub fn new(at_time: Timestamp, pacing_rate: DataRate, padding_rate: DataRate) -> Self {
        let time_window = TimeDelta::from_seconds(1);
        Self {
            at_time,
            pacing_rate,
            padding_rate,
            data_window: pacing_rate * time_window,
            time_window,
            pad_window: padding_rate * time_window,
            pacing_rate_hint: None,
        }
    }

    pub fn with_pacing_rate_hint(mut self, pacing_rate_hint: Option<DataRate>) -> Self {
        self.pacing_rate_hint = pacing_rate_hint;
        self
    }
}

/// The directive returned from every controller operation. Event handlers
/// that do not change the rate return an empty update.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NetworkControlUpdate {
    pub congestion_window: Option<DataSize>,
    pub pacer_config: Option<PacerConfig>,
    pub target_rate: Option<TargetTransferRate>,
}

impl NetworkControlUpdate {
    pub fn is_empty(&self) -> bool {
        self.congestion_window.is_none() && self.pacer_config.is_none() && self.target_rate.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacer_windows_span_one_second() {
        let config = PacerConfig::new(
            Timestamp::from_millis(10),
            DataRate::from_bits_per_sec(800_000),
            DataRate::from_bits_per_sec(80_000),
        );
        assert_eq!(config.time_window, TimeDelta::from_seconds(1));
        assert_eq!(config.data_window.bytes(), 100_000);
        assert_eq!(config.pad_window.bytes(), 10_000);
        assert_eq!(config.pacing_rate_hint, None);
    }

    #[test]
    fn default_update_is_empty() {
        assert!(NetworkControlUpdate::default().is_empty());
    }
}
