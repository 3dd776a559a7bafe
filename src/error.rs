use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

/// Rejected configuration, reported before any resource is acquired.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing configuration value: {0}")]
    Missing(&'static str),
    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("invalid {field} {value:?}: expected a plain SQL identifier")]
    InvalidIdentifier { field: &'static str, value: String },
}

/// Failures while bringing up or tearing down the SSH port forward.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("failed to spawn ssh client: {0}")]
    Spawn(io::Error),
    #[error("failed to reserve a local port: {0}")]
    LocalPort(io::Error),
    #[error("ssh exited with {status} before the tunnel was ready: {stderr}")]
    Exited { status: ExitStatus, stderr: String },
    #[error("tunnel endpoint {endpoint} not ready after {timeout:?}")]
    NotReady { endpoint: String, timeout: Duration },
    #[error("ssh process error: {0}")]
    Process(io::Error),
}

/// Why a line was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    /// Key token is a dot or starts with one.
    DotKey,
    TokenCount { expected: usize, found: usize },
}

impl std::fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedReason::DotKey => write!(f, "key starts with '.'"),
            MalformedReason::TokenCount { expected, found } => {
                write!(f, "expected {expected} tokens, found {found}")
            }
        }
    }
}

/// Outcome of a line that did not produce a record.
///
/// `Malformed` lines are counted and skipped; everything else aborts the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
    #[error("malformed line: {0}")]
    Malformed(MalformedReason),
    #[error("line contains a NUL character, which PostgreSQL text cannot store")]
    NulByte,
}

impl LineError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LineError::Malformed(_))
    }
}

/// Failures while opening a session: the tunnel, then the connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("tunnel error: {0}")]
    Tunnel(#[from] TunnelError),
    #[error("failed to connect: {0}")]
    Database(#[from] sqlx::Error),
}

/// Fatal errors of a loader run.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Connect(#[from] ConnectError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("failed to read line {line}: {source}")]
    Read { line: u64, source: io::Error },
    #[error("aborted at line {line}: {source}")]
    Aborted { line: u64, source: LineError },
}

/// Errors of a single-word lookup.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Connect(#[from] ConnectError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("stored vector is not a valid literal: {0}")]
    InvalidVector(String),
}
