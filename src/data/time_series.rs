//! Bounded in-memory time series of fused records.

use super::record::{mean, FusedRecord, MeterFields, PulseValue};
use crate::clock::round2;
use crate::hardware::{ANALOG_CHANNELS, PULSE_CHANNELS, THERMOCOUPLE_CHANNELS};
use std::collections::VecDeque;

/// Six hours of 1 Hz records.
pub const DEFAULT_CAPACITY: usize = 6 * 60 * 60;

/// Append-only FIFO of records, never longer than its capacity.
#[derive(Debug, Clone)]
pub struct TimeSeriesLog {
    records: VecDeque<FusedRecord>,
    capacity: usize,
}

impl Default for TimeSeriesLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl TimeSeriesLog {
    /// Empty log holding at most `capacity` records (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::new(),
            capacity,
        }
    }

    /// Append a record, evicting the oldest when full.
    pub fn push(&mut self, record: FusedRecord) {
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maximum number of records.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Newest record.
    pub fn latest(&self) -> Option<&FusedRecord> {
        self.records.back()
    }

    /// Records oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &FusedRecord> + ExactSizeIterator + '_ {
        self.records.iter()
    }

    /// The last `n` records, oldest first.
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &FusedRecord> + '_ {
        self.records.iter().skip(self.records.len().saturating_sub(n))
    }

    /// Mean of `column` over the last `n` records, skipping nulls. `None` when
    /// every value in the window is null or the log is empty.
    pub fn window_mean(&self, n: usize, column: impl Fn(&FusedRecord) -> Option<f64>) -> Option<f64> {
        mean(self.tail(n).filter_map(column))
    }

    /// Windowed record over the last `n` records.
    ///
    /// Energy and cumulative pulse totals are point-in-time values and come
    /// from the newest record, pulse intervals are summed over the window, and
    /// every other column is averaged with nulls excluded. All values are
    /// rounded to 2 decimals.
    pub fn windowed(&self, n: usize) -> Option<FusedRecord> {
        let newest = self.latest()?;

        let avg = |column: &dyn Fn(&FusedRecord) -> Option<f64>| {
            self.window_mean(n, column).map(round2)
        };

        let mut pulses = [PulseValue::default(); PULSE_CHANNELS];
        for (i, pulse) in pulses.iter_mut().enumerate() {
            pulse.cumulative = round2(newest.pulses[i].cumulative);
            pulse.interval = round2(self.tail(n).map(|r| r.pulses[i].interval).sum());
        }

        let mut analog = [None; ANALOG_CHANNELS];
        for (i, slot) in analog.iter_mut().enumerate() {
            *slot = avg(&|r| r.analog[i]);
        }

        let mut thermocouples = [None; THERMOCOUPLE_CHANNELS];
        for (i, slot) in thermocouples.iter_mut().enumerate() {
            *slot = avg(&|r| r.thermocouples[i]);
        }

        Some(FusedRecord {
            time_of_day: newest.time_of_day,
            test_minutes: newest.test_minutes,
            meter: MeterFields {
                avg_voltage: avg(&|r| Some(r.meter.avg_voltage)).unwrap_or_default(),
                watts: avg(&|r| Some(r.meter.watts)).unwrap_or_default(),
                energy_wh: round2(newest.meter.energy_wh),
            },
            pulses,
            analog,
            thermocouples,
        })
    }
}
