use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("pacing factor must be finite and positive, got {0}")]
    ErrInvalidPacingFactor(f64),
    #[error("{field} must be a non-negative bitrate, got {value} bps")]
    ErrNegativeRate { field: &'static str, value: i64 },
    #[error("bridge location is empty")]
    ErrEmptyBridgeLocation,
    #[error("response timeout {timeout_ms} ms must be positive and within the process interval ({interval_ms} ms)")]
    ErrInvalidResponseTimeout { timeout_ms: i64, interval_ms: i64 },
    #[error("process interval must be positive, got {0} ms")]
    ErrInvalidProcessInterval(i64),

    #[error("decision engine unavailable: {0}")]
    ErrBridgeUnavailable(#[source] io::Error),
    #[error("decision engine closed its response channel")]
    ErrBridgeClosed,
    #[error("decision engine did not answer within {0} ms")]
    ErrBridgeTimeout(i64),
    #[error("malformed decision engine response: {0:?}")]
    ErrMalformedBridgeResponse(String),

    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}
