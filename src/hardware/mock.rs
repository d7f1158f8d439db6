//! Mock chassis for tests and for running without hardware.
//!
//! `MockChassis` answers every read from shared state that a
//! [`MockChassisHandle`] can change at any time, including failure
//! injection. In simulated mode the counters advance and temperatures jitter
//! on every read so the pipeline has something plausible to show.

use super::{
    AnalogSource, ChannelGroup, ChassisBackend, ChassisError, ChassisInventory, InstalledModule,
    ModuleKind, ANALOG_CHANNELS, PULSE_CHANNELS, THERMOCOUPLE_CHANNELS,
};
use super::layout::THERMOCOUPLE_GROUP_WIDTH;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;

/// Ambient temperature the simulated thermocouples hover around, °F.
const SIMULATED_AMBIENT_F: f64 = 72.0;

#[derive(Debug)]
struct MockChassisState {
    counters: [u64; PULSE_CHANNELS],
    thermocouples: [f64; THERMOCOUPLE_CHANNELS],
    analog: [f64; ANALOG_CHANNELS],
    samples_per_read: usize,
    disconnected: bool,
    fail_next: Option<ChannelGroup>,
    close_calls: usize,
}

impl Default for MockChassisState {
    fn default() -> Self {
        Self {
            counters: [0; PULSE_CHANNELS],
            thermocouples: [0.0; THERMOCOUPLE_CHANNELS],
            analog: [0.0; ANALOG_CHANNELS],
            samples_per_read: 3,
            disconnected: false,
            fail_next: None,
            close_calls: 0,
        }
    }
}

/// Chassis backed by in-memory state.
pub struct MockChassis {
    inventory: ChassisInventory,
    state: Arc<Mutex<MockChassisState>>,
    simulate: bool,
}

impl MockChassis {
    /// Mock chassis with the given modules and all readings at zero.
    pub fn new(inventory: ChassisInventory) -> Self {
        Self {
            inventory,
            state: Arc::new(Mutex::new(MockChassisState::default())),
            simulate: false,
        }
    }

    /// Counter module, one 16-channel thermocouple module and a voltage module.
    pub fn standard() -> Self {
        Self::new(ChassisInventory::new(vec![
            InstalledModule { slot: 1, kind: ModuleKind::Ni9411 },
            InstalledModule { slot: 2, kind: ModuleKind::Ni9214 },
            InstalledModule { slot: 3, kind: ModuleKind::Ni9215 },
        ]))
    }

    /// Standard chassis whose readings move on every read.
    pub fn simulated() -> Self {
        Self::simulated_with(Self::standard().inventory)
    }

    /// Chassis with the given modules whose readings move on every read.
    pub fn simulated_with(inventory: ChassisInventory) -> Self {
        let chassis = Self::new(inventory);
        {
            let mut state = chassis.state.lock();
            for (i, value) in state.thermocouples.iter_mut().enumerate() {
                *value = SIMULATED_AMBIENT_F + i as f64 * 0.5;
            }
            state.analog = [4.0, 6.0];
        }
        Self {
            simulate: true,
            ..chassis
        }
    }

    /// Handle for changing readings after the chassis moved into an adapter.
    pub fn handle(&self) -> MockChassisHandle {
        MockChassisHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn check(&self, state: &mut MockChassisState, group: ChannelGroup) -> Result<(), ChassisError> {
        if state.disconnected {
            return Err(ChassisError::Disconnected {
                message: "mock chassis unplugged".to_string(),
            });
        }
        if state.fail_next == Some(group) {
            state.fail_next = None;
            return Err(ChassisError::ReadFailed {
                group,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn group_index(&self, module: InstalledModule) -> Option<usize> {
        self.inventory
            .thermocouple_modules()
            .iter()
            .position(|m| *m == module)
    }
}

impl ChassisBackend for MockChassis {
    fn inventory(&self) -> ChassisInventory {
        self.inventory.clone()
    }

    fn read_counters(&mut self) -> Result<[u64; PULSE_CHANNELS], ChassisError> {
        let mut state = self.state.lock();
        self.check(&mut state, ChannelGroup::Counters)?;
        if self.simulate {
            let mut rng = rand::thread_rng();
            for count in state.counters.iter_mut() {
                *count += rng.gen_range(0..3);
            }
        }
        Ok(state.counters)
    }

    fn read_thermocouples(
        &mut self,
        module: InstalledModule,
    ) -> Result<Vec<Vec<f64>>, ChassisError> {
        let mut state = self.state.lock();
        self.check(&mut state, ChannelGroup::Thermocouples)?;
        let group = self.group_index(module).ok_or_else(|| ChassisError::NotSupported {
            message: format!("slot {} is not a thermocouple module", module.slot),
        })?;

        let start = group * THERMOCOUPLE_GROUP_WIDTH;
        let mut rng = rand::thread_rng();
        let channels = (0..module.kind.thermocouple_channels())
            .map(|ch| {
                let value = state.thermocouples[start + ch];
                (0..state.samples_per_read)
                    .map(|_| {
                        if self.simulate {
                            value + rng.gen_range(-0.2..0.2)
                        } else {
                            value
                        }
                    })
                    .collect()
            })
            .collect();
        Ok(channels)
    }

    fn read_analog(&mut self, source: AnalogSource) -> Result<Vec<f64>, ChassisError> {
        let mut state = self.state.lock();
        self.check(&mut state, ChannelGroup::Analog)?;
        let width = match source {
            AnalogSource::Voltage => 4,
            AnalogSource::Current => 8,
        };
        let mut values = vec![0.0; width];
        values[..ANALOG_CHANNELS].copy_from_slice(&state.analog);
        Ok(values)
    }

    fn close(&mut self) -> Result<(), ChassisError> {
        let mut state = self.state.lock();
        state.close_calls += 1;
        if state.close_calls > 1 {
            return Err(ChassisError::NothingOpen);
        }
        Ok(())
    }
}

/// Shared control over a [`MockChassis`].
#[derive(Clone)]
pub struct MockChassisHandle {
    state: Arc<Mutex<MockChassisState>>,
}

impl MockChassisHandle {
    /// Set the cumulative counter values.
    pub fn set_counters(&self, counters: [u64; PULSE_CHANNELS]) {
        self.state.lock().counters = counters;
    }

    /// Set one thermocouple slot.
    pub fn set_thermocouple(&self, channel: usize, value: f64) {
        if let Some(slot) = self.state.lock().thermocouples.get_mut(channel) {
            *slot = value;
        }
    }

    /// Set both analog slots.
    pub fn set_analog(&self, analog: [f64; ANALOG_CHANNELS]) {
        self.state.lock().analog = analog;
    }

    /// Number of buffered samples returned per thermocouple channel.
    pub fn set_samples_per_read(&self, samples: usize) {
        self.state.lock().samples_per_read = samples;
    }

    /// Make the next read of `group` fail once.
    pub fn fail_next_read(&self, group: ChannelGroup) {
        self.state.lock().fail_next = Some(group);
    }

    /// Make every read report a lost connection.
    pub fn disconnect(&self) {
        self.state.lock().disconnected = true;
    }

    /// Undo [`disconnect`](Self::disconnect).
    pub fn reconnect(&self) {
        self.state.lock().disconnected = false;
    }

    /// How often `close` was called on the chassis.
    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_module_reads_eight_channels() {
        let mut chassis = MockChassis::new(ChassisInventory::default());
        chassis.handle().set_analog([0.01, 0.02]);
        let values = chassis.read_analog(AnalogSource::Current).unwrap();
        assert_eq!(values.len(), 8);
        assert_eq!(&values[..2], &[0.01, 0.02]);
    }

    #[test]
    fn test_empty_thermocouple_buffer() {
        let mut chassis = MockChassis::standard();
        chassis.handle().set_samples_per_read(0);
        let module = chassis.inventory().thermocouple_modules()[0];
        let samples = chassis.read_thermocouples(module).unwrap();
        assert_eq!(samples.len(), 16);
        assert!(samples.iter().all(Vec::is_empty));
    }

    #[test]
    fn test_simulated_counters_never_decrease() {
        let mut chassis = MockChassis::simulated();
        let mut previous = chassis.read_counters().unwrap();
        for _ in 0..20 {
            let next = chassis.read_counters().unwrap();
            assert!(next.iter().zip(previous.iter()).all(|(n, p)| n >= p));
            previous = next;
        }
    }
}
