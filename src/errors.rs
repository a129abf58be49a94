//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all relay failure modes.
///
/// The type is `Clone` so a single child failure can be delivered to every
/// caller that is waiting on the child at that moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or socket operation failure.
    Io(String),
    /// No child process is running, or it has not become ready yet.
    NotReady(String),
    /// The child did not answer a request before its deadline.
    Timeout(String),
    /// The child terminated while the request was outstanding.
    ProcessExited(String),
    /// The child process could not be launched.
    Spawn(String),
    /// A caller-supplied identifier is already in flight.
    DuplicateId(String),
    /// The inbound message is not a usable request.
    InvalidRequest(String),
    /// A line of child output could not be decoded. Logged, never returned to callers.
    MalformedOutput(String),
    /// Unexpected internal failure.
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code rendered in HTTP error bodies.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotReady(_) => "not_ready",
            Self::Timeout(_) => "timeout",
            Self::ProcessExited(_) => "process_exited",
            Self::Spawn(_) => "spawn_error",
            Self::DuplicateId(_) => "duplicate_id",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Config(_) | Self::Io(_) | Self::MalformedOutput(_) | Self::Internal(_) => {
                "internal_error"
            }
        }
    }

    /// Human-readable detail without the kind prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Config(msg)
            | Self::Io(msg)
            | Self::NotReady(msg)
            | Self::Timeout(msg)
            | Self::ProcessExited(msg)
            | Self::Spawn(msg)
            | Self::DuplicateId(msg)
            | Self::InvalidRequest(msg)
            | Self::MalformedOutput(msg)
            | Self::Internal(msg) => msg,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::NotReady(msg) => write!(f, "not ready: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::ProcessExited(msg) => write!(f, "process exited: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::DuplicateId(msg) => write!(f, "duplicate id: {msg}"),
            Self::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            Self::MalformedOutput(msg) => write!(f, "malformed output: {msg}"),
            Self::Internal(msg) => write!(f, "internal: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
