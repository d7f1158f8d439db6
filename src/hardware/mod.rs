//! Instrument chassis acquisition.
//!
//! The [`HardwareAdapter`] turns whatever modules are installed into one
//! fixed-width [`HardwareSnapshot`] and keeps it fresh from a background
//! thread. The chassis itself is reached through the [`ChassisBackend`]
//! trait so that the bus driver can be swapped (a simulated chassis ships in
//! [`mock`]).

pub mod adapter;
pub mod error;
pub mod layout;
pub mod mock;

pub use adapter::HardwareAdapter;
pub use error::{ChannelGroup, ChassisError};
pub use layout::{
    AnalogSource, ChassisInventory, HardwareReading, HardwareSnapshot, InstalledModule,
    ModuleKind, ANALOG_CHANNELS, PULSE_CHANNELS, THERMOCOUPLE_CHANNELS,
};
pub use mock::{MockChassis, MockChassisHandle};

/// Blocking access to an instrument chassis.
///
/// Implementations are driven from the adapter's poll thread only, never from
/// the tick loop, so every method may block on the bus.
pub trait ChassisBackend: Send {
    /// Modules detected at open time.
    fn inventory(&self) -> ChassisInventory;

    /// Instantaneous cumulative counts of the four pulse counters.
    fn read_counters(&mut self) -> Result<[u64; PULSE_CHANNELS], ChassisError>;

    /// Samples buffered since the previous call, one `Vec` per module channel.
    fn read_thermocouples(
        &mut self,
        module: InstalledModule,
    ) -> Result<Vec<Vec<f64>>, ChassisError>;

    /// Instantaneous analog input values from the chosen source.
    fn read_analog(&mut self, source: AnalogSource) -> Result<Vec<f64>, ChassisError>;

    /// Release every acquisition task.
    fn close(&mut self) -> Result<(), ChassisError>;
}

/// Backend used when no chassis driver is configured. Reports no modules, so
/// the adapter publishes a not-live reading and the pipeline records zeros.
#[derive(Debug, Default)]
pub struct NoChassis;

impl ChassisBackend for NoChassis {
    fn inventory(&self) -> ChassisInventory {
        ChassisInventory::default()
    }

    fn read_counters(&mut self) -> Result<[u64; PULSE_CHANNELS], ChassisError> {
        Err(ChassisError::NothingOpen)
    }

    fn read_thermocouples(
        &mut self,
        _module: InstalledModule,
    ) -> Result<Vec<Vec<f64>>, ChassisError> {
        Err(ChassisError::NothingOpen)
    }

    fn read_analog(&mut self, _source: AnalogSource) -> Result<Vec<f64>, ChassisError> {
        Err(ChassisError::NothingOpen)
    }

    fn close(&mut self) -> Result<(), ChassisError> {
        Err(ChassisError::NothingOpen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_chassis_is_never_live() {
        let mut adapter = HardwareAdapter::new(Box::new(NoChassis));
        adapter.start().unwrap();
        assert!(!adapter.is_streaming());

        let reading = adapter.poll_once().unwrap();
        assert!(!reading.is_live());
        assert_eq!(reading.module_count, 0);
        adapter.close();
    }
}
