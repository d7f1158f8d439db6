//! Error types for chassis operations.

use thiserror::Error;

/// Channel group a read failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelGroup {
    /// Pulse counters.
    Counters,
    /// Thermocouple modules.
    Thermocouples,
    /// Analog voltage or current inputs.
    Analog,
}

impl std::fmt::Display for ChannelGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelGroup::Counters => write!(f, "counters"),
            ChannelGroup::Thermocouples => write!(f, "thermocouples"),
            ChannelGroup::Analog => write!(f, "analog inputs"),
        }
    }
}

/// Errors that can occur when talking to the instrument chassis.
#[derive(Error, Debug)]
pub enum ChassisError {
    /// The chassis went away. Terminal for the adapter that observed it.
    #[error("Chassis disconnected: {message}")]
    Disconnected { message: String },

    /// A single group read failed; the next iteration may succeed.
    #[error("Failed to read {group}: {message}")]
    ReadFailed { group: ChannelGroup, message: String },

    /// Close was requested but no tasks were open.
    #[error("No tasks to close")]
    NothingOpen,

    /// Operation not supported by the installed modules.
    #[error("Operation not supported: {message}")]
    NotSupported { message: String },
}

impl ChassisError {
    /// Whether the error ends the poll loop.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ChassisError::Disconnected { .. })
    }
}
