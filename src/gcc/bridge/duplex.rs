use std::ffi::OsStr;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::runtime::{Builder, Runtime};
use tokio::time::{timeout, timeout_at, Instant};

use super::{parse_estimate, BandwidthEstimate, DecisionBridge};
use crate::config::{DEFAULT_ESTIMATE_BPS, DEFAULT_PROCESS_INTERVAL_MS, DEFAULT_REQUEST_TOKEN};
use crate::error::{Error, Result};
use crate::gcc::{
    data_rate::DataRate,
    telemetry::AggregatedState,
    time::{TimeDelta, Timestamp},
};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

const CHILD_REAP_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);
// State records are dropped while this much output is still unsent.
const MAX_PENDING_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct DuplexOptions {
    pub request_token: String,
    /// Upper bound on every push and pull.
    pub response_timeout: TimeDelta,
    pub default_estimate: DataRate,
}

impl Default for DuplexOptions {
    fn default() -> Self {
        Self {
            request_token: DEFAULT_REQUEST_TOKEN.to_owned(),
            response_timeout: TimeDelta::from_millis(DEFAULT_PROCESS_INTERVAL_MS),
            default_estimate: DataRate::from_bits_per_sec(DEFAULT_ESTIMATE_BPS),
        }
    }
}

/// Line-oriented request/response channel to a decision engine.
///
/// Pushes write one JSON record per line. Pulls write the request token and
/// wait, up to the response timeout, for one answer line per request still
/// unanswered. Answers that arrive after their pull gave up are consumed by
/// the next pull, and the freshest one wins.
///
/// Output the engine does not accept in time is kept and written ahead of
/// anything else, so a stalled engine never sees a torn line.
///
/// The bridge drives its I/O on a private current-thread runtime, so it must
/// not be used from inside another tokio runtime.
pub struct DuplexBridge {
    writer: BoxedWriter,
    // Whole lines not yet accepted by the engine; the head of the first one
    // may already be written.
    pending: Vec<u8>,
    lines: Lines<BufReader<BoxedReader>>,
    child: Option<Child>,
    options: DuplexOptions,
    outstanding: usize,
    closed: bool,
    last_estimate: Option<BandwidthEstimate>,
    // Declared last: the pipes above must be dropped while the driver lives.
    runtime: Runtime,
}

impl DuplexBridge {
    pub fn new<R, W>(reader: R, writer: W, options: DuplexOptions) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self::with_runtime(
            runtime,
            Box::new(reader),
            Box::new(writer),
            None,
            options,
        ))
    }

    /// Starts the engine as a child process, talking over its stdin/stdout.
    /// The child is killed and reaped when the bridge is dropped.
    pub fn spawn<I, S>(program: impl AsRef<OsStr>, args: I, options: DuplexOptions) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let mut child = {
            let _guard = runtime.enter();
            Command::new(program)
                .args(args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .spawn()
                .map_err(Error::ErrBridgeUnavailable)?
        };
        let stdin = child.stdin.take().ok_or_else(|| {
            Error::ErrBridgeUnavailable(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "engine stdin was not captured",
            ))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            Error::ErrBridgeUnavailable(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "engine stdout was not captured",
            ))
        })?;
        log::debug!("spawned decision engine, pid {:?}", child.id());
        Ok(Self::with_runtime(
            runtime,
            Box::new(stdout),
            Box::new(stdin),
            Some(child),
            options,
        ))
    }

    fn with_runtime(
        runtime: Runtime,
        reader: BoxedReader,
        writer: BoxedWriter,
        child: Option<Child>,
        options: DuplexOptions,
    ) -> Self {
        Self {
            writer,
            pending: Vec::new(),
            lines: BufReader::new(reader).lines(),
            child,
            options,
            outstanding: 0,
            closed: false,
            last_estimate: None,
            runtime,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn deadline(&self) -> Instant {
        let limit = self.options.response_timeout.to_duration();
        Instant::now() + limit.min(MAX_RESPONSE_TIMEOUT)
    }

    fn mark_closed(&mut self, reason: &dyn std::fmt::Display) {
        if !self.closed {
            log::warn!("decision engine channel closed: {reason}");
        }
        self.closed = true;
        self.outstanding = 0;
        self.pending.clear();
    }

    fn enqueue_line(&mut self, line: &str) {
        self.pending.extend_from_slice(line.as_bytes());
        self.pending.push(b'\n');
    }

    // Writes as much queued output as the engine accepts before `deadline`.
    fn flush_pending(&mut self, deadline: Instant) -> Result<()> {
        let writer = &mut self.writer;
        let pending = &mut self.pending;
        let flushed = self.runtime.block_on(async {
            timeout_at(deadline, async {
                while !pending.is_empty() {
                    // `write` is cancel safe: a call cut short by the
                    // deadline has written nothing.
                    let written = writer.write(&pending[..]).await?;
                    if written == 0 {
                        return Err(io::Error::from(io::ErrorKind::WriteZero));
                    }
                    pending.drain(..written);
                }
                writer.flush().await
            })
            .await
        });
        match flushed {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                if matches!(
                    err.kind(),
                    io::ErrorKind::BrokenPipe | io::ErrorKind::WriteZero
                ) {
                    self.mark_closed(&err);
                }
                Err(Error::ErrBridgeUnavailable(err))
            }
            Err(_) => {
                log::debug!(
                    "{} bytes still queued for the decision engine",
                    self.pending.len()
                );
                Err(Error::ErrBridgeTimeout(self.options.response_timeout.ms()))
            }
        }
    }

    fn parse_response(&self, line: &str, at_time: Timestamp) -> Result<BandwidthEstimate> {
        let line = line.trim();
        let answer = line
            .strip_prefix(self.options.request_token.as_str())
            .unwrap_or(line);
        parse_estimate(answer, at_time)
    }

    fn request_estimate(&mut self, at_time: Timestamp) -> Result<BandwidthEstimate> {
        if self.closed {
            return Err(Error::ErrBridgeClosed);
        }
        let deadline = self.deadline();
        let request = self.options.request_token.clone();
        self.enqueue_line(&request);
        // Counted once queued: a request held back by a stall still reaches
        // the engine ahead of the next write, and its answer is drained then.
        self.outstanding += 1;
        self.flush_pending(deadline)?;

        let mut freshest = None;
        let mut last_err = None;
        while self.outstanding > 0 {
            let lines = &mut self.lines;
            let read = self
                .runtime
                .block_on(async { timeout_at(deadline, lines.next_line()).await });
            match read {
                Ok(Ok(Some(line))) => {
                    self.outstanding -= 1;
                    match self.parse_response(&line, at_time) {
                        Ok(estimate) => freshest = Some(estimate),
                        Err(err) => last_err = Some(err),
                    }
                }
                Ok(Ok(None)) => {
                    self.mark_closed(&"end of stream");
                    last_err = Some(Error::ErrBridgeClosed);
                }
                Ok(Err(err)) => {
                    self.mark_closed(&err);
                    last_err = Some(Error::ErrBridgeUnavailable(err));
                }
                Err(_) => {
                    last_err = Some(Error::ErrBridgeTimeout(
                        self.options.response_timeout.ms(),
                    ));
                    break;
                }
            }
        }

        match (freshest, last_err) {
            (Some(estimate), _) => Ok(estimate),
            (None, Some(err)) => Err(err),
            (None, None) => Err(Error::ErrBridgeTimeout(self.options.response_timeout.ms())),
        }
    }
}

impl DecisionBridge for DuplexBridge {
    fn push_state(&mut self, state: &AggregatedState) {
        if self.closed {
            log::trace!("decision engine closed, dropping state");
            return;
        }
        if self.pending.len() >= MAX_PENDING_BYTES {
            log::debug!("decision engine is not reading, dropping state");
            return;
        }
        let record = match state.to_record() {
            Ok(record) => record,
            Err(err) => {
                log::warn!("failed to encode state for decision engine: {err}");
                return;
            }
        };
        self.enqueue_line(&record);
        let deadline = self.deadline();
        match self.flush_pending(deadline) {
            Ok(()) => log::trace!("pushed state {record}"),
            Err(err) => log::warn!("failed to push state to decision engine: {err}"),
        }
    }

    fn pull_estimate(&mut self, at_time: Timestamp) -> BandwidthEstimate {
        match self.request_estimate(at_time) {
            Ok(estimate) => {
                self.last_estimate = Some(estimate);
                estimate
            }
            Err(err) => {
                let fallback = match self.last_estimate {
                    Some(last) => BandwidthEstimate { at_time, ..last },
                    None => BandwidthEstimate::new(self.options.default_estimate, at_time),
                };
                if matches!(err, Error::ErrBridgeClosed) {
                    log::debug!("decision engine closed, reusing {}", fallback.target_rate);
                } else {
                    log::warn!(
                        "decision engine pull failed, reusing {}: {err}",
                        fallback.target_rate
                    );
                }
                fallback
            }
        }
    }
}

impl Drop for DuplexBridge {
    fn drop(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        if let Err(err) = child.start_kill() {
            log::debug!("decision engine already gone: {err}");
        }
        // Reap it so no zombie outlives the session.
        let reaped = self
            .runtime
            .block_on(async { timeout(CHILD_REAP_TIMEOUT, child.wait()).await });
        match reaped {
            Ok(Ok(status)) => log::debug!("decision engine exited: {status}"),
            Ok(Err(err)) => log::warn!("failed to reap decision engine: {err}"),
            Err(_) => log::warn!("decision engine did not exit after kill"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    struct Engine {
        stream: BufReader<DuplexStream>,
        runtime: Runtime,
    }

    impl Engine {
        fn answer(&mut self, text: &str) {
            self.runtime
                .block_on(self.stream.write_all(text.as_bytes()))
                .unwrap();
        }

        fn read_line(&mut self) -> String {
            let mut line = String::new();
            self.runtime
                .block_on(self.stream.read_line(&mut line))
                .unwrap();
            line
        }
    }

    fn in_memory() -> (DuplexBridge, Engine) {
        let (bridge_side, engine_side) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(bridge_side);
        let bridge = DuplexBridge::new(reader, writer, DuplexOptions::default()).unwrap();
        let engine = Engine {
            stream: BufReader::new(engine_side),
            runtime: Builder::new_current_thread().enable_all().build().unwrap(),
        };
        (bridge, engine)
    }

    #[test]
    fn request_response() {
        let (mut bridge, mut engine) = in_memory();
        engine.answer("450000\n");

        let at_time = Timestamp::from_millis(40);
        let estimate = bridge.pull_estimate(at_time);
        assert_eq!(estimate.target_rate.bps(), 450_000);
        assert_eq!(estimate.at_time, at_time);
        assert_eq!(engine.read_line(), "RequestBandwidth\n");
    }

    #[test]
    fn answer_may_carry_a_pacing_rate() {
        let (mut bridge, mut engine) = in_memory();
        engine.answer("450000 900000\n");
        let estimate = bridge.pull_estimate(Timestamp::zero());
        assert_eq!(estimate.target_rate.bps(), 450_000);
        assert_eq!(estimate.pacing_rate_hint.unwrap().bps(), 900_000);

        // A silent engine keeps the whole previous answer.
        let at_time = Timestamp::from_millis(25);
        let estimate = bridge.pull_estimate(at_time);
        assert_eq!(estimate.pacing_rate_hint.unwrap().bps(), 900_000);
        assert_eq!(estimate.at_time, at_time);
    }

    #[test]
    fn response_may_repeat_the_token() {
        let (mut bridge, mut engine) = in_memory();
        engine.answer("RequestBandwidth 320000\n");
        assert_eq!(
            bridge.pull_estimate(Timestamp::zero()).target_rate.bps(),
            320_000
        );
    }

    #[test]
    fn silent_engine_falls_back_to_default_then_previous() {
        let (mut bridge, mut engine) = in_memory();
        assert_eq!(
            bridge.pull_estimate(Timestamp::zero()).target_rate.bps(),
            DEFAULT_ESTIMATE_BPS
        );

        engine.answer("500000\n");
        assert_eq!(
            bridge.pull_estimate(Timestamp::from_millis(25)).target_rate.bps(),
            500_000
        );

        // Nothing more arrives: the previous estimate is reused.
        assert_eq!(
            bridge.pull_estimate(Timestamp::from_millis(50)).target_rate.bps(),
            500_000
        );
        assert!(!bridge.is_closed());
    }

    #[test]
    fn late_answers_are_drained_and_freshest_wins() {
        let (mut bridge, mut engine) = in_memory();
        bridge.pull_estimate(Timestamp::zero());

        engine.answer("100000\n200000\n");
        assert_eq!(
            bridge.pull_estimate(Timestamp::from_millis(25)).target_rate.bps(),
            200_000
        );
        assert_eq!(bridge.outstanding, 0);
    }

    #[test]
    fn malformed_answer_reuses_previous_estimate() {
        let (mut bridge, mut engine) = in_memory();
        engine.answer("abc\n");
        assert_eq!(
            bridge.pull_estimate(Timestamp::zero()).target_rate.bps(),
            DEFAULT_ESTIMATE_BPS
        );

        engine.answer("640000\n");
        bridge.pull_estimate(Timestamp::from_millis(25));
        engine.answer("-5\n");
        assert_eq!(
            bridge.pull_estimate(Timestamp::from_millis(50)).target_rate.bps(),
            640_000
        );
    }

    #[test]
    fn closed_engine_is_not_polled_again() {
        let (mut bridge, mut engine) = in_memory();
        engine.answer("700000\n");
        bridge.pull_estimate(Timestamp::zero());
        drop(engine);

        for i in 1..=3 {
            let estimate = bridge.pull_estimate(Timestamp::from_millis(25 * i));
            assert_eq!(estimate.target_rate.bps(), 700_000);
        }
        assert!(bridge.is_closed());
        bridge.push_state(&AggregatedState::default());
    }

    #[test]
    fn push_writes_one_json_line() {
        let (mut bridge, mut engine) = in_memory();
        let state = AggregatedState {
            last_rtt_ms: 55,
            last_loss_rate: 0.25,
            last_delay_interval_ms: 0,
            avg_receiver_side_thp_bps: 125_000.0,
        };
        bridge.push_state(&state);

        let line = engine.read_line();
        assert!(line.ends_with('\n'));
        let record: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(record["rtt"], 55);
        assert_eq!(record["loss_rate"], 0.25);
        assert_eq!(record["receiver_side_thp"], 125_000.0);
    }

    #[test]
    fn stalled_engine_never_sees_a_torn_line() {
        // Smaller than one state record, so a push stalls halfway through.
        let (bridge_side, engine_side) = tokio::io::duplex(32);
        let (reader, writer) = tokio::io::split(bridge_side);
        let options = DuplexOptions {
            response_timeout: TimeDelta::from_millis(250),
            ..Default::default()
        };
        let mut bridge = DuplexBridge::new(reader, writer, options).unwrap();

        let (start_tx, start_rx) = std::sync::mpsc::channel::<()>();
        let engine = std::thread::spawn(move || {
            let runtime = Builder::new_current_thread().enable_all().build().unwrap();
            runtime.block_on(async move {
                start_rx.recv().unwrap();
                let (read_half, mut write_half) = tokio::io::split(engine_side);
                let mut lines = BufReader::new(read_half).lines();
                let mut seen = Vec::new();
                while let Some(line) = lines.next_line().await.unwrap() {
                    if line == "RequestBandwidth" {
                        write_half.write_all(b"500000\n").await.unwrap();
                    }
                    seen.push(line);
                }
                seen
            })
        });

        let state = AggregatedState {
            last_rtt_ms: 123_456_789,
            last_loss_rate: 0.5,
            last_delay_interval_ms: 0,
            avg_receiver_side_thp_bps: 1_000_000.0,
        };
        bridge.push_state(&state);
        assert!(!bridge.pending.is_empty());
        assert_eq!(
            bridge.pull_estimate(Timestamp::zero()).target_rate.bps(),
            DEFAULT_ESTIMATE_BPS
        );

        start_tx.send(()).unwrap();
        assert_eq!(
            bridge.pull_estimate(Timestamp::from_millis(25)).target_rate.bps(),
            500_000
        );
        assert_eq!(bridge.outstanding, 0);
        assert!(bridge.pending.is_empty());
        drop(bridge);

        let seen = engine.join().unwrap();
        assert_eq!(seen.len(), 3);
        let record: serde_json::Value = serde_json::from_str(&seen[0]).unwrap();
        assert_eq!(record["rtt"], 123_456_789);
        assert_eq!(&seen[1..], ["RequestBandwidth", "RequestBandwidth"]);
    }

    #[cfg(unix)]
    #[test]
    fn spawned_engine_answers_requests() {
        let script = r#"while read -r line; do
            case "$line" in
                RequestBandwidth) echo 640000 ;;
            esac
        done"#;
        let options = DuplexOptions {
            response_timeout: TimeDelta::from_seconds(5),
            ..Default::default()
        };
        let mut bridge = DuplexBridge::spawn("sh", ["-c", script], options).unwrap();
        bridge.push_state(&AggregatedState::default());
        assert_eq!(
            bridge.pull_estimate(Timestamp::zero()).target_rate.bps(),
            640_000
        );
        drop(bridge);
    }
}
