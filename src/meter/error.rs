//! Error types for the power meter link.

use thiserror::Error;

/// What the poll loop does after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Drop this sample, keep the previous snapshot, leave `connected` alone.
    Skip,
    /// Mark the meter disconnected and wait before the next attempt.
    Backoff,
    /// Try again straight away without touching `connected`.
    Retry,
}

/// Errors that can occur when talking to the power meter.
#[derive(Error, Debug)]
pub enum MeterError {
    /// The serial link failed or could not be opened.
    #[error("Serial transport error: {message}")]
    Transport { message: String },

    /// The device answered with a frame that is not a valid reply.
    #[error("Invalid response frame: {message}")]
    Protocol { message: String },

    /// The device answered with a Modbus exception.
    #[error("Device exception 0x{code:02X} for function 0x{function:02X}")]
    Exception { function: u8, code: u8 },

    /// Nothing came back before the timeout.
    #[error("No response from device")]
    NoResponse,

    /// The reply was well formed but its payload cannot be decoded.
    #[error("Decode error: {message}")]
    Decode { message: String },
}

impl MeterError {
    /// How the poll loop recovers from this error.
    pub fn class(&self) -> FaultClass {
        match self {
            MeterError::Transport { .. } => FaultClass::Backoff,
            MeterError::Decode { .. } => FaultClass::Skip,
            MeterError::Protocol { .. } | MeterError::Exception { .. } | MeterError::NoResponse => {
                FaultClass::Retry
            }
        }
    }

    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        MeterError::Transport {
            message: err.to_string(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        MeterError::Protocol {
            message: message.into(),
        }
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        MeterError::Decode {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for MeterError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => MeterError::NoResponse,
            _ => MeterError::transport(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_classes() {
        assert_eq!(MeterError::transport("gone").class(), FaultClass::Backoff);
        assert_eq!(MeterError::decode("short").class(), FaultClass::Skip);
        assert_eq!(MeterError::protocol("crc").class(), FaultClass::Retry);
        assert_eq!(MeterError::NoResponse.class(), FaultClass::Retry);
        assert_eq!(
            MeterError::Exception { function: 3, code: 2 }.class(),
            FaultClass::Retry
        );
    }

    #[test]
    fn test_io_timeout_is_no_response() {
        let err: MeterError = std::io::Error::from(std::io::ErrorKind::TimedOut).into();
        assert!(matches!(err, MeterError::NoResponse));

        let err: MeterError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert_eq!(err.class(), FaultClass::Backoff);
    }
}
