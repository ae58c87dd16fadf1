use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Invalid or incomplete configuration; always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot parse configuration file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required value `{0}`")]
    Missing(&'static str),
    #[error("invalid address `{0}`: expected host:port")]
    InvalidAddress(String),
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: String,
    },
}

/// Failures of the capture device. There is no recovery path, except for an interrupted
/// read which is simply retried: the process terminates.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("interface `{0}` not found")]
    InterfaceNotFound(String),
    #[error("interface `{0}` does not provide a supported capture channel")]
    UnsupportedChannel(String),
    #[error("cannot open capture on `{interface}`: {source}")]
    Open {
        interface: String,
        #[source]
        source: io::Error,
    },
    #[error("capture device `{interface}` failed: {source}")]
    Device {
        interface: String,
        #[source]
        source: io::Error,
    },
    #[error("capture read interrupted by a signal")]
    Interrupted,
    #[error("capture source closed")]
    Closed,
}

/// Recoverable forwarding failures: the in-flight frame is dropped and the client reconnects.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("connect to {remote} failed: {source}")]
    Connect {
        remote: String,
        #[source]
        source: io::Error,
    },
    #[error("send to {remote} failed: {source}")]
    Send {
        remote: String,
        #[source]
        source: io::Error,
    },
}

/// A single received envelope could not be decoded; the frame is skipped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

/// Loss of stream framing. Byte alignment cannot be recovered, so the connection is closed.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("announced frame length {len} exceeds maximum {max}")]
    TooLarge { len: usize, max: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors that terminate the process.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("cannot listen on {address}: {source}")]
    Listen {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("forwarding task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
