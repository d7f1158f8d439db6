//! Mock meter transport for tests and simulation.

use super::registers::{
    encode_snapshot, ENERGY_BLOCK_COUNT, ENERGY_BLOCK_START, ENERGY_RESET_COMMAND,
    ENERGY_RESET_REGISTER, LINE_BLOCK_COUNT, LINE_BLOCK_START,
};
use super::{MeterError, MeterSnapshot, MeterTransport};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::Arc;

/// One scripted reply that overrides the normal answer.
#[derive(Debug)]
enum ScriptedReply {
    Fail(MeterError),
    Truncated,
}

#[derive(Debug, Default)]
struct MockMeterState {
    snapshot: MeterSnapshot,
    script: VecDeque<ScriptedReply>,
    writes: Vec<(u16, u16)>,
    fail_writes: bool,
    reads: usize,
}

/// Meter transport answering from in-memory state.
pub struct MockMeterTransport {
    state: Arc<Mutex<MockMeterState>>,
    simulate: bool,
}

impl MockMeterTransport {
    /// Transport reporting `snapshot` on every read.
    pub fn new(snapshot: MeterSnapshot) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockMeterState {
                snapshot,
                ..MockMeterState::default()
            })),
            simulate: false,
        }
    }

    /// Balanced three-phase load whose power drifts and energy accumulates.
    pub fn simulated() -> Self {
        let snapshot = MeterSnapshot {
            v_an: 120.0,
            v_bn: 120.0,
            v_cn: 120.0,
            v_ab: 208.0,
            v_bc: 208.0,
            v_ca: 208.0,
            i_a: 4.0,
            i_b: 4.0,
            i_c: 4.0,
            watts: 1400.0,
            power_factor: 0.97,
            ..MeterSnapshot::default()
        };
        Self {
            simulate: true,
            ..Self::new(snapshot)
        }
    }

    /// Handle for scripting replies after the transport moved into a client.
    pub fn handle(&self) -> MockMeterHandle {
        MockMeterHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl MeterTransport for MockMeterTransport {
    fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>, MeterError> {
        let mut state = self.state.lock();
        state.reads += 1;
        match state.script.pop_front() {
            Some(ScriptedReply::Fail(err)) => return Err(err),
            Some(ScriptedReply::Truncated) => return Ok(vec![0; usize::from(count) / 2]),
            None => {}
        }

        if self.simulate && start == LINE_BLOCK_START {
            let mut rng = rand::thread_rng();
            state.snapshot.watts = 1400.0 + rng.gen_range(-25.0..25.0);
            state.snapshot.energy_wh += 1.0;
        }

        let (line, energy) = encode_snapshot(&state.snapshot);
        match (start, count) {
            (LINE_BLOCK_START, LINE_BLOCK_COUNT) => Ok(line),
            (ENERGY_BLOCK_START, ENERGY_BLOCK_COUNT) => Ok(energy),
            _ => Err(MeterError::Exception {
                function: super::modbus::READ_HOLDING_REGISTERS,
                code: 0x02,
            }),
        }
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<(), MeterError> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(MeterError::transport("mock write failure"));
        }
        if address == ENERGY_RESET_REGISTER && value == ENERGY_RESET_COMMAND {
            state.snapshot.energy_wh = 0.0;
        }
        state.writes.push((address, value));
        Ok(())
    }
}

/// Shared control over a [`MockMeterTransport`].
#[derive(Clone)]
pub struct MockMeterHandle {
    state: Arc<Mutex<MockMeterState>>,
}

impl MockMeterHandle {
    /// Change the values the meter reports.
    pub fn set_snapshot(&self, snapshot: MeterSnapshot) {
        self.state.lock().snapshot = snapshot;
    }

    /// Fail the next read with `err`.
    pub fn fail_next_read(&self, err: MeterError) {
        self.state.lock().script.push_back(ScriptedReply::Fail(err));
    }

    /// Answer the next read with too few registers.
    pub fn truncate_next_read(&self) {
        self.state.lock().script.push_back(ScriptedReply::Truncated);
    }

    /// Make every register write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Register writes received so far.
    pub fn writes(&self) -> Vec<(u16, u16)> {
        self.state.lock().writes.clone()
    }

    /// Number of register reads attempted.
    pub fn reads(&self) -> usize {
        self.state.lock().reads
    }
}
