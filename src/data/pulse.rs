//! Per-channel pulse accumulation.
//!
//! Counters report cumulative counts since the hardware task started. The
//! aggregator turns them into per-tick deltas and counts since the test
//! baseline. Invariants between resets:
//!
//! - `interval_delta == raw - previous`
//! - `cumulative == raw - baseline`

use crate::hardware::PULSE_CHANNELS;

/// Accumulation state of one counter channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PulseChannelState {
    raw: i64,
    baseline: i64,
    previous: i64,
    observed: bool,
}

impl PulseChannelState {
    /// Feed a new raw count. Returns `(interval_delta, cumulative)` in counts.
    ///
    /// The first observation becomes both baseline and previous count. A
    /// count below the previous one means the hardware counter restarted; the
    /// baseline is shifted so the cumulative total keeps growing from where
    /// it was.
    pub fn observe(&mut self, raw: u64) -> (i64, i64) {
        let raw = i64::try_from(raw).unwrap_or(i64::MAX);
        if !self.observed {
            self.observed = true;
            self.baseline = raw;
            self.previous = raw;
        } else if raw < self.previous {
            tracing::warn!(
                previous = self.previous,
                raw,
                "Pulse counter went backwards; treating as a counter restart"
            );
            self.baseline -= self.previous;
            self.previous = 0;
        }

        let delta = raw - self.previous;
        self.previous = raw;
        self.raw = raw;
        (delta, self.cumulative())
    }

    /// Make the latest raw count the new baseline.
    pub fn rebase(&mut self) {
        self.baseline = self.raw;
    }

    /// Last raw count seen.
    pub fn raw(&self) -> i64 {
        self.raw
    }

    /// Count at the last reset.
    pub fn baseline(&self) -> i64 {
        self.baseline
    }

    /// Raw count from the previous tick.
    pub fn previous(&self) -> i64 {
        self.previous
    }

    /// Counts since the baseline.
    pub fn cumulative(&self) -> i64 {
        self.raw - self.baseline
    }
}

/// The four pulse channels.
#[derive(Debug, Clone, Default)]
pub struct PulseBank {
    channels: [PulseChannelState; PULSE_CHANNELS],
}

impl PulseBank {
    /// Feed one counter reading. Returns per-channel `(delta, cumulative)`.
    pub fn observe(&mut self, raw: [u64; PULSE_CHANNELS]) -> [(i64, i64); PULSE_CHANNELS] {
        let mut out = [(0, 0); PULSE_CHANNELS];
        for ((slot, channel), count) in out.iter_mut().zip(self.channels.iter_mut()).zip(raw) {
            *slot = channel.observe(count);
        }
        out
    }

    /// Rebase every channel on its latest raw count.
    pub fn rebase(&mut self) {
        self.channels.iter_mut().for_each(PulseChannelState::rebase);
    }

    /// Channel states.
    pub fn channels(&self) -> &[PulseChannelState; PULSE_CHANNELS] {
        &self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deltas_and_cumulative_from_baseline() {
        let mut state = PulseChannelState::default();
        let seen: Vec<(i64, i64)> = [1000, 1005, 1009].into_iter().map(|r| state.observe(r)).collect();
        assert_eq!(seen, vec![(0, 0), (5, 5), (4, 9)]);
    }

    #[test]
    fn test_rebase_restarts_cumulative() {
        let mut state = PulseChannelState::default();
        state.observe(10);
        state.observe(25);
        state.rebase();
        assert_eq!(state.cumulative(), 0);

        assert_eq!(state.observe(31), (6, 6));
        assert_eq!(state.baseline(), 25);
    }

    #[test]
    fn test_delta_sum_matches_span() {
        let raws = [500u64, 503, 503, 520, 521, 600];
        let mut state = PulseChannelState::default();
        let total: i64 = raws.iter().map(|r| state.observe(*r).0).sum();
        assert_eq!(total, 600 - 500);
        assert_eq!(state.cumulative(), state.raw() - state.baseline());
    }

    #[test]
    fn test_counter_restart_keeps_total() {
        let mut state = PulseChannelState::default();
        state.observe(100);
        state.observe(140);
        assert_eq!(state.observe(5), (5, 45));
        assert_eq!(state.observe(8), (3, 48));
        assert_eq!(state.cumulative(), state.raw() - state.baseline());
    }

    #[test]
    fn test_bank_observes_each_channel() {
        let mut bank = PulseBank::default();
        bank.observe([1, 2, 3, 4]);
        let out = bank.observe([2, 4, 6, 8]);
        assert_eq!(out, [(1, 1), (2, 2), (3, 3), (4, 4)]);
        bank.rebase();
        assert!(bank.channels().iter().all(|c| c.cumulative() == 0));
    }
}
