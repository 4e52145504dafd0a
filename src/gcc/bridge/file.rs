use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;

use tokio::sync::mpsc::{self, error::TrySendError};

use super::{parse_estimate, BandwidthEstimate, DecisionBridge};
use crate::config::StateSink;
use crate::error::{Error, Result};
use crate::gcc::{data_rate::DataRate, telemetry::AggregatedState, time::Timestamp};

// Records held for a slow stdout reader before new ones are dropped.
const STATE_QUEUE_CAPACITY: usize = 256;
// An estimate line is two integers; anything past this is not read.
const MAX_ESTIMATE_LINE_BYTES: u64 = 256;

enum StateOutput {
    // Regular files accept writes without waiting on a reader.
    Direct(Box<dyn Write + Send>),
    // Written from a helper thread, since the reader may stop draining.
    Queued(mpsc::Sender<String>),
    Discard,
}

impl StateOutput {
    fn open(sink: &StateSink) -> Result<Self> {
        Ok(match sink {
            StateSink::Stdout => StateOutput::Queued(spawn_writer(io::stdout())?),
            StateSink::File(path) => {
                // A FIFO would block on open and again on every write.
                if let Ok(metadata) = fs::metadata(path) {
                    if !metadata.is_file() {
                        return Err(Error::Io(io::Error::new(
                            io::ErrorKind::InvalidInput,
                            format!("state sink {} is not a regular file", path.display()),
                        )));
                    }
                }
                StateOutput::Direct(Box::new(
                    OpenOptions::new().create(true).append(true).open(path)?,
                ))
            }
            StateSink::Discard => StateOutput::Discard,
        })
    }
}

// The writer thread exits once the bridge drops its sender and the queue is
// drained.
fn spawn_writer(mut out: impl Write + Send + 'static) -> Result<mpsc::Sender<String>> {
    let (tx, mut rx) = mpsc::channel::<String>(STATE_QUEUE_CAPACITY);
    thread::Builder::new()
        .name("bwe-state-sink".to_owned())
        .spawn(move || {
            while let Some(record) = rx.blocking_recv() {
                if let Err(err) = writeln!(out, "{record}").and_then(|_| out.flush()) {
                    log::warn!("state sink failed, no more records will be written: {err}");
                    break;
                }
            }
        })?;
    Ok(tx)
}

/// Reads the latest estimate from a file the engine rewrites, and appends
/// state records to a sink the engine tails.
///
/// The estimate file is opened and closed on every poll; the only handle
/// held across calls is a file state sink, released on drop. Pushes never
/// wait on a reader: stdout records go through a bounded queue and are
/// dropped while it is full.
pub struct FileBridge {
    estimate_path: PathBuf,
    state_output: StateOutput,
    default_estimate: DataRate,
    // None until the first poll.
    estimate_available: Option<bool>,
}

impl FileBridge {
    pub fn new(
        estimate_path: impl Into<PathBuf>,
        state_sink: &StateSink,
        default_estimate: DataRate,
    ) -> Result<Self> {
        Ok(Self::with_output(
            estimate_path.into(),
            StateOutput::open(state_sink)?,
            default_estimate,
        ))
    }

    fn with_output(
        estimate_path: PathBuf,
        state_output: StateOutput,
        default_estimate: DataRate,
    ) -> Self {
        Self {
            estimate_path,
            state_output,
            default_estimate,
            estimate_available: None,
        }
    }

    pub fn estimate_path(&self) -> &Path {
        &self.estimate_path
    }

    // Only regular files are opened, so a FIFO or device at the path can
    // never stall the poll.
    fn read_estimate(&self, at_time: Timestamp) -> Result<BandwidthEstimate> {
        let metadata = fs::metadata(&self.estimate_path).map_err(Error::ErrBridgeUnavailable)?;
        if !metadata.is_file() {
            return Err(Error::ErrBridgeUnavailable(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }
        let file = File::open(&self.estimate_path).map_err(Error::ErrBridgeUnavailable)?;
        let mut line = String::new();
        BufReader::new(file.take(MAX_ESTIMATE_LINE_BYTES))
            .read_line(&mut line)
            .map_err(Error::ErrBridgeUnavailable)?;
        parse_estimate(&line, at_time)
    }
}

impl DecisionBridge for FileBridge {
    fn push_state(&mut self, state: &AggregatedState) {
        if matches!(self.state_output, StateOutput::Discard) {
            return;
        }
        let record = match state.to_record() {
            Ok(record) => record,
            Err(err) => {
                log::warn!("failed to encode state for decision engine: {err}");
                return;
            }
        };
        match &mut self.state_output {
            StateOutput::Direct(sink) => {
                let written = writeln!(sink, "{record}").and_then(|_| sink.flush());
                match written {
                    Ok(()) => log::trace!("pushed state {record}"),
                    Err(err) => log::warn!("failed to push state to decision engine: {err}"),
                }
            }
            StateOutput::Queued(tx) => match tx.try_send(record) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    log::debug!("state sink is not draining, dropping record")
                }
                Err(TrySendError::Closed(_)) => {
                    log::warn!("state sink is gone, dropping record")
                }
            },
            StateOutput::Discard => {}
        }
    }

    fn pull_estimate(&mut self, at_time: Timestamp) -> BandwidthEstimate {
        match self.read_estimate(at_time) {
            Ok(estimate) => {
                if self.estimate_available != Some(true) {
                    log::debug!(
                        "estimate file {} is readable again",
                        self.estimate_path.display()
                    );
                }
                self.estimate_available = Some(true);
                estimate
            }
            Err(err) => {
                if self.estimate_available == Some(false) {
                    log::debug!(
                        "estimate file {} still unusable: {err}",
                        self.estimate_path.display()
                    );
                } else {
                    log::warn!(
                        "estimate file {} unusable, using default {}: {err}",
                        self.estimate_path.display(),
                        self.default_estimate
                    );
                }
                self.estimate_available = Some(false);
                BandwidthEstimate::new(self.default_estimate, at_time)
            }
        }
    }
}
