//! Link health and error reporting vocabulary.
//!
//! These types are shared by the transport supervisor, which produces them,
//! and by the OSC surface, which reports them to clients.

use serde::{Deserialize, Serialize};

/// State of the supervised device link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// No usable link; calls fail fast or trigger a reconnect.
    #[default]
    Disconnected,
    /// A reconnect cycle is in flight.
    Connecting,
    /// Link is up and recent calls succeeded.
    Connected,
    /// Link is up but the last calls failed; not yet torn down.
    Degraded,
}

impl LinkState {
    /// Get the wire name for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Degraded => "degraded",
        }
    }

    /// Whether register calls can be attempted without reconnecting first.
    pub fn is_up(&self) -> bool {
        matches!(self, LinkState::Connected | LinkState::Degraded)
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time view of link health.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkSnapshot {
    /// Current state.
    pub state: LinkState,
    /// Consecutive failed exchanges since the last success.
    pub consecutive_failures: u32,
    /// Exchanges attempted.
    pub calls_total: u64,
    /// Exchanges that failed.
    pub failures_total: u64,
    /// Successful reconnects.
    pub reconnects: u64,
    /// Last successful exchange (millis since epoch, 0 if never).
    pub last_success: i64,
    /// Last error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Error classification carried in error replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or out-of-range command input.
    InvalidCommand,
    /// Link down after exhausting reconnects.
    LinkUnavailable,
    /// A call exceeded its timeout on every attempt.
    TransportTimeout,
    /// The device answered with a Modbus exception.
    DeviceException,
    /// Digital I/O pin out of range or hardware failure.
    GpioFault,
    /// The device returned a value outside the register range.
    InvalidReading,
    /// Anything else.
    #[default]
    Internal,
}

impl ErrorKind {
    /// Get the wire name for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidCommand => "invalid_command",
            ErrorKind::LinkUnavailable => "link_unavailable",
            ErrorKind::TransportTimeout => "transport_timeout",
            ErrorKind::DeviceException => "device_exception",
            ErrorKind::GpioFault => "gpio_fault",
            ErrorKind::InvalidReading => "invalid_reading",
            ErrorKind::Internal => "internal",
        }
    }

    /// Whether the client may simply retry the same command later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::LinkUnavailable | ErrorKind::TransportTimeout | ErrorKind::InvalidReading
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error report sent back to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Timestamp (millis since epoch).
    pub timestamp: i64,
    /// Error classification.
    pub kind: ErrorKind,
    /// Offending field, for input errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// Address of the command that failed.
    pub command: String,
    /// Whether the error is retryable.
    pub retryable: bool,
}

impl ErrorReport {
    /// Create a report stamped with the current time.
    pub fn new(kind: ErrorKind, message: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            timestamp: crate::serialization::current_timestamp_millis(),
            kind,
            field: None,
            message: message.into(),
            command: command.into(),
            retryable: kind.is_retryable(),
        }
    }

    /// Attach the offending field.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}
