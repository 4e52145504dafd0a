use super::{
    bridge::{BandwidthEstimate, DecisionBridge},
    data_rate::DataRate,
    network_types::*,
    telemetry::{AggregatedState, TelemetryAggregator},
    time::{TimeDelta, Timestamp},
};
use crate::config::Config;

const DEFAULT_BWE_PERIOD: TimeDelta = TimeDelta::from_seconds(3);

/// NetworkControllerInterface is implemented by network controllers. A network
/// controller turns information about network state and traffic into rate
/// directives for the pacer. Implementations are not thread safe; the
/// interface must be driven from one thread.
pub trait NetworkControllerInterface {
    /// Called when network availabilty changes.
    fn on_network_availability(&mut self, msg: NetworkAvailability) -> NetworkControlUpdate;
    /// Called when the receiving or sending endpoint changes address.
    fn on_network_route_change(&mut self, msg: NetworkRouteChange) -> NetworkControlUpdate;
    /// Called periodically, see `NetworkControllerFactoryInterface::get_process_interval`.
    fn on_process_interval(&mut self, msg: ProcessInterval) -> NetworkControlUpdate;
    /// Called when remotely calculated bitrate is received.
    fn on_remote_bitrate_report(&mut self, msg: RemoteBitrateReport) -> NetworkControlUpdate;
    /// Called when round trip time has been calculated by protocol specific mechanisms.
    fn on_round_trip_time_update(&mut self, msg: RoundTripTimeUpdate) -> NetworkControlUpdate;
    /// Called when a packet is sent on the network.
    fn on_sent_packet(&mut self, msg: SentPacket) -> NetworkControlUpdate;
    /// Called when a packet is received from the remote client.
    fn on_received_packet(&mut self, msg: ReceivedPacket) -> NetworkControlUpdate;
    /// Called when the stream specific configuration has been updated.
    fn on_streams_config(&mut self, msg: StreamsConfig) -> NetworkControlUpdate;
    /// Called when target transfer rate constraints have been changed.
    fn on_target_rate_constraints(&mut self, msg: TargetRateConstraints) -> NetworkControlUpdate;
    /// Called when a protocol specific calculation of packet loss has been made.
    fn on_transport_loss_report(&mut self, msg: TransportLossReport) -> NetworkControlUpdate;
    /// Called with per packet feedback regarding receive time.
    fn on_transport_packets_feedback(
        &mut self,
        msg: TransportPacketsFeedback,
    ) -> NetworkControlUpdate;
    /// Called with network state estimate updates.
    fn on_network_state_estimate(&mut self, msg: NetworkStateEstimate) -> NetworkControlUpdate;
    /// Called with the receiver-side throughput of the last reporting interval.
    fn on_receiver_side_throughput(
        &mut self,
        msg: ReceiverSideThroughputSample,
    ) -> NetworkControlUpdate;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Default,
    Streaming,
}

// Rate parameters taken from `Config`, fixed for the controller's lifetime.
#[derive(Debug, Clone, Copy)]
struct RateParams {
    pacing_factor: f64,
    min_total_allocated_bitrate: DataRate,
    max_padding_rate: DataRate,
}

/// Event-driven controller that feeds telemetry to a decision engine and
/// turns the engine's estimates into pacer directives.
///
/// Only `on_process_interval` consults the engine for a new estimate; every
/// other directive is built from the last one it accepted.
pub struct RateController {
    params: RateParams,
    telemetry: TelemetryAggregator,
    bridge: Box<dyn DecisionBridge>,
    last_estimate: BandwidthEstimate,
    state: ControllerState,
    last_event_time: Timestamp,
}

impl RateController {
    pub fn new(config: &Config, bridge: Box<dyn DecisionBridge>) -> Self {
        Self {
            params: RateParams {
                pacing_factor: config.pacing_factor,
                min_total_allocated_bitrate: config.min_total_allocated_bitrate(),
                max_padding_rate: config.max_padding_rate(),
            },
            telemetry: TelemetryAggregator::new(),
            bridge,
            last_estimate: BandwidthEstimate::new(
                config.default_estimate(),
                Timestamp::minus_infinity(),
            ),
            state: ControllerState::Default,
            last_event_time: Timestamp::minus_infinity(),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn telemetry(&self) -> &AggregatedState {
        self.telemetry.state()
    }

    pub fn last_estimate(&self) -> &BandwidthEstimate {
        &self.last_estimate
    }

    /// Directive from the last accepted estimate, without asking the engine.
    pub fn get_default_state(&self, at_time: Timestamp) -> NetworkControlUpdate {
        let target_rate = self.last_estimate.target_rate;
        let telemetry = self.telemetry.state();
        let network_estimate = NetworkEstimate {
            at_time,
            bandwidth: target_rate,
            round_trip_time: telemetry.round_trip_time(),
            bwe_period: DEFAULT_BWE_PERIOD,
            loss_rate_ratio: telemetry.last_loss_rate.clamp(0.0, 1.0),
        };

        let pacing_rate =
            self.params.min_total_allocated_bitrate.max(target_rate) * self.params.pacing_factor;
        let padding_rate = self.params.max_padding_rate.min(target_rate);

        let pacer_config = PacerConfig::new(at_time, pacing_rate, padding_rate)
            .with_pacing_rate_hint(self.last_estimate.pacing_rate_hint);

        NetworkControlUpdate {
            congestion_window: None,
            pacer_config: Some(pacer_config),
            target_rate: Some(TargetTransferRate {
                at_time,
                network_estimate,
                target_rate,
                stable_target_rate: target_rate,
            }),
        }
    }

    // Caller timestamps are authoritative; a step backwards is reported but
    // the event is still handled.
    fn observe_time(&mut self, at_time: Timestamp) {
        if at_time.is_infinite() {
            return;
        }
        if at_time < self.last_event_time {
            log::warn!(
                "event time {at_time} is older than the latest seen {}",
                self.last_event_time
            );
            return;
        }
        self.last_event_time = at_time;
    }

    fn accept_estimate(&mut self, mut estimate: BandwidthEstimate) {
        let target_rate = estimate.target_rate;
        if !target_rate.is_finite() || target_rate.is_negative() {
            log::warn!(
                "discarding unusable estimate {target_rate}, keeping {}",
                self.last_estimate.target_rate
            );
            self.last_estimate.at_time = estimate.at_time;
            return;
        }
        if let Some(hint) = estimate.pacing_rate_hint {
            if !hint.is_finite() || hint.is_negative() {
                log::warn!("discarding unusable pacing rate hint {hint}");
                estimate.pacing_rate_hint = None;
            }
        }
        self.last_estimate = estimate;
    }

    /// Inter-packet delay variation over one feedback batch.
    // TODO: derive from the send/receive deltas in `packet_feedbacks` once an
    // engine consumes `delay_interval`; until then it is always reported as 0.
    fn delay_interval(&self, _feedback: &TransportPacketsFeedback) -> TimeDelta {
        TimeDelta::zero()
    }
}

impl NetworkControllerInterface for RateController {
    fn on_network_availability(&mut self, _msg: NetworkAvailability) -> NetworkControlUpdate {
        NetworkControlUpdate::default()
    }

    fn on_network_route_change(&mut self, _msg: NetworkRouteChange) -> NetworkControlUpdate {
        NetworkControlUpdate::default()
    }

    fn on_process_interval(&mut self, msg: ProcessInterval) -> NetworkControlUpdate {
        self.observe_time(msg.at_time);
        let estimate = self.bridge.pull_estimate(msg.at_time);
        self.accept_estimate(estimate);
        if self.state == ControllerState::Default {
            log::debug!(
                "streaming at {} with {}",
                msg.at_time,
                self.last_estimate.target_rate
            );
            self.state = ControllerState::Streaming;
        }
        self.get_default_state(msg.at_time)
    }

    fn on_remote_bitrate_report(&mut self, _msg: RemoteBitrateReport) -> NetworkControlUpdate {
        NetworkControlUpdate::default()
    }

    fn on_round_trip_time_update(&mut self, msg: RoundTripTimeUpdate) -> NetworkControlUpdate {
        self.observe_time(msg.receive_time);
        if self
            .telemetry
            .on_round_trip_time_update(msg.round_trip_time, msg.smoothed)
        {
            self.bridge.push_state(self.telemetry.state());
        }
        NetworkControlUpdate::default()
    }

    fn on_sent_packet(&mut self, _msg: SentPacket) -> NetworkControlUpdate {
        NetworkControlUpdate::default()
    }

    fn on_received_packet(&mut self, _msg: ReceivedPacket) -> NetworkControlUpdate {
        NetworkControlUpdate::default()
    }

    fn on_streams_config(&mut self, msg: StreamsConfig) -> NetworkControlUpdate {
        self.observe_time(msg.at_time);
        if self.state != ControllerState::Default {
            log::debug!("streams reconfigured at {}", msg.at_time);
            self.state = ControllerState::Default;
        }
        self.get_default_state(msg.at_time)
    }

    fn on_target_rate_constraints(&mut self, _msg: TargetRateConstraints) -> NetworkControlUpdate {
        NetworkControlUpdate::default()
    }

    fn on_transport_loss_report(&mut self, msg: TransportLossReport) -> NetworkControlUpdate {
        self.observe_time(msg.receive_time);
        // Pushed together with throughput on the next packets feedback.
        self.telemetry
            .on_loss_report(msg.packets_lost_delta, msg.packets_received_delta);
        NetworkControlUpdate::default()
    }

    fn on_transport_packets_feedback(
        &mut self,
        msg: TransportPacketsFeedback,
    ) -> NetworkControlUpdate {
        self.observe_time(msg.feedback_time);
        let delay_interval = self.delay_interval(&msg);
        self.telemetry.set_delay_interval(delay_interval);
        self.telemetry.flush_average_throughput();
        self.bridge.push_state(self.telemetry.state());
        NetworkControlUpdate::default()
    }

    fn on_network_state_estimate(&mut self, _msg: NetworkStateEstimate) -> NetworkControlUpdate {
        NetworkControlUpdate::default()
    }

    fn on_receiver_side_throughput(
        &mut self,
        msg: ReceiverSideThroughputSample,
    ) -> NetworkControlUpdate {
        self.telemetry
            .on_throughput_sample(DataRate::from_bits_per_sec_f64(msg.bps));
        NetworkControlUpdate::default()
    }
}
