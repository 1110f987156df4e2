//! Error types for the encoder bridge.
//!
//! Each error maps to a wire [`ErrorKind`] so that every failure can be
//! answered on `/{device}/error` with a stable classification.

use osc_bridge_common::ErrorKind;
use thiserror::Error;

/// Failure of a single register exchange.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The port or connection failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// No response within the exchange timeout.
    #[error("exchange timed out")]
    Timeout,
    /// The device answered with a Modbus exception.
    #[error("device exception: {0}")]
    Exception(String),
    /// Malformed frame or unexpected response.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether the physical link should be considered lost. Garbled frames
    /// and timeouts only count toward the failure tally.
    pub fn is_link_loss(&self) -> bool {
        matches!(self, TransportError::Io(_))
    }
}

/// Failure of a supervised register call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    /// The link is down and reconnecting did not help.
    #[error("link unavailable: {0}")]
    LinkUnavailable(String),
    /// Every exchange attempt of the call timed out.
    #[error("call timed out after {attempts} attempt(s)")]
    TransportTimeout { attempts: u32 },
    /// The device rejected the request.
    #[error("device exception: {0}")]
    DeviceException(String),
}

impl LinkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LinkError::LinkUnavailable(_) => ErrorKind::LinkUnavailable,
            LinkError::TransportTimeout { .. } => ErrorKind::TransportTimeout,
            LinkError::DeviceException(_) => ErrorKind::DeviceException,
        }
    }

    /// Whether the failure says the link itself is unusable right now.
    pub fn is_link_down(&self) -> bool {
        matches!(
            self,
            LinkError::LinkUnavailable(_) | LinkError::TransportTimeout { .. }
        )
    }
}

/// Failure to take an encoder reading.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PollError {
    #[error(transparent)]
    Link(#[from] LinkError),
    /// A register held a value outside its documented range.
    #[error("register 0x{register:04X} returned {value}, expected < {limit}")]
    InvalidReading { register: u16, value: u32, limit: u32 },
}

impl PollError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PollError::Link(e) => e.kind(),
            PollError::InvalidReading { .. } => ErrorKind::InvalidReading,
        }
    }

    pub fn is_link_down(&self) -> bool {
        matches!(self, PollError::Link(e) if e.is_link_down())
    }
}

/// Digital I/O failure.
#[derive(Debug, Error)]
pub enum GpioFault {
    /// Pin index outside the configured output set.
    #[error("pin index {index} out of range (0..{available})")]
    OutOfRange { index: usize, available: usize },
    /// Driver failure on a GPIO line.
    #[error("GPIO {pin}: {source}")]
    Io {
        pin: u32,
        #[source]
        source: std::io::Error,
    },
}

/// A command that does not fit any known shape.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {field}: {reason}")]
pub struct InvalidCommand {
    /// Offending field (`address`, `interval`, `pin`, ...).
    pub field: String,
    pub reason: String,
}

impl InvalidCommand {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Any failure a command can produce.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Invalid(#[from] InvalidCommand),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Poll(#[from] PollError),
    #[error(transparent)]
    Gpio(#[from] GpioFault),
    #[error("{0}")]
    Internal(String),
}

impl CommandError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::Invalid(_) => ErrorKind::InvalidCommand,
            CommandError::Link(e) => e.kind(),
            CommandError::Poll(e) => e.kind(),
            CommandError::Gpio(_) => ErrorKind::GpioFault,
            CommandError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Offending field, if the error is about a specific input.
    pub fn field(&self) -> Option<&str> {
        match self {
            CommandError::Invalid(e) => Some(&e.field),
            CommandError::Gpio(GpioFault::OutOfRange { .. }) => Some("pin"),
            _ => None,
        }
    }
}

impl From<osc_bridge_framework::BridgeError> for CommandError {
    fn from(err: osc_bridge_framework::BridgeError) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let err = CommandError::from(InvalidCommand::new("interval", "must be > 0"));
        assert_eq!(err.kind(), ErrorKind::InvalidCommand);
        assert_eq!(err.field(), Some("interval"));
        assert_eq!(err.to_string(), "invalid interval: must be > 0");

        let err = CommandError::from(LinkError::LinkUnavailable("port missing".into()));
        assert_eq!(err.kind(), ErrorKind::LinkUnavailable);
        assert!(err.kind().is_retryable());

        let err = CommandError::from(PollError::InvalidReading {
            register: 0,
            value: 5000,
            limit: 4096,
        });
        assert_eq!(err.kind(), ErrorKind::InvalidReading);

        let err = CommandError::from(GpioFault::OutOfRange {
            index: 9,
            available: 3,
        });
        assert_eq!(err.kind(), ErrorKind::GpioFault);
        assert_eq!(err.field(), Some("pin"));
    }

    #[test]
    fn test_link_down_classification() {
        assert!(PollError::from(LinkError::TransportTimeout { attempts: 3 }).is_link_down());
        assert!(!PollError::from(LinkError::DeviceException("IllegalDataAddress".into()))
            .is_link_down());
        assert!(TransportError::Io(std::io::ErrorKind::BrokenPipe.into()).is_link_loss());
        assert!(!TransportError::Timeout.is_link_loss());
        assert!(!TransportError::Protocol("bad crc".into()).is_link_loss());
    }
}
