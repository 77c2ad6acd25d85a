//! Error type shared by acquisition and reconstruction

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no Siglent spectrum analyzer at {address}: {reason}")]
    InstrumentNotFound { address: String, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("instrument did not answer within {0:?}")]
    Timeout(Duration),
    #[error("instrument closed the connection")]
    Disconnected,
    #[error("unexpected response to `{command}`: {response:?}")]
    BadResponse { command: String, response: String },
    #[error("unrecognized time unit `{0}` (expected seconds, minutes or hours)")]
    UnknownTimeUnit(String),
    #[error("unrecognized peak center `{0}` (expected a frequency in MHz, `span-center` or `track`)")]
    UnknownPeakCenter(String),
    #[error("invalid axis limits `{0}` (expected `lower,upper`, either side may be empty)")]
    BadLimits(String),
    #[error("{path}: line {line}: {reason}")]
    MalformedSweep {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("{path}: no column header within the first {lines} lines")]
    HeaderNotFound { path: PathBuf, lines: usize },
    #[error("{path}: {reason}")]
    MalformedLog { path: PathBuf, reason: String },
    #[error("run folder {0} does not exist")]
    RunNotFound(PathBuf),
    #[error("no sweep files in {0}")]
    EmptyRun(PathBuf),
    #[error("none of the sweeps in {0} could be read")]
    NoReadableSweep(PathBuf),
    #[error("trace has {got} points where this run has {expected}")]
    TraceLength { expected: usize, got: usize },
    #[error("inconsistent spectrogram shape: {0}")]
    Shape(String),
    #[error(transparent)]
    CacheEncode(#[from] bincode::error::EncodeError),
    #[error(transparent)]
    CacheDecode(#[from] bincode::error::DecodeError),
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
    #[error("could not install the Ctrl-C handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error("rendering failed: {0}")]
    Render(String),
}
