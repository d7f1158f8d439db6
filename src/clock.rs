//! Test clock: logical seconds, drift correction and reporting-interval gating.
//!
//! The tick driver calls [`ClockEngine::tick`] once per second. Each tick
//! advances a logical second counter; when the real elapsed time runs more
//! than a second ahead of it (a late timer, a busy host) one extra step is
//! added so the test time does not fall behind the wall clock.

use crate::error::{AppResult, DaqError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonic time.
pub trait TimeSource: Send {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Production time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicTime;

impl TimeSource for MonotonicTime {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced time source for tests.
#[derive(Debug, Clone)]
pub struct ManualTime {
    now: Arc<Mutex<Instant>>,
}

impl ManualTime {
    /// Start at the current instant.
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// Supported reporting intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ReportingInterval {
    /// Every second.
    #[default]
    OneSecond,
    /// Every 5 seconds.
    FiveSeconds,
    /// Every 30 seconds.
    ThirtySeconds,
    /// Every minute.
    SixtySeconds,
}

impl ReportingInterval {
    /// Interval length in seconds.
    pub fn seconds(self) -> u32 {
        match self {
            ReportingInterval::OneSecond => 1,
            ReportingInterval::FiveSeconds => 5,
            ReportingInterval::ThirtySeconds => 30,
            ReportingInterval::SixtySeconds => 60,
        }
    }

    /// Map an interval selector position (0..=3) to an interval.
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(ReportingInterval::OneSecond),
            1 => Some(ReportingInterval::FiveSeconds),
            2 => Some(ReportingInterval::ThirtySeconds),
            3 => Some(ReportingInterval::SixtySeconds),
            _ => None,
        }
    }
}

impl TryFrom<u32> for ReportingInterval {
    type Error = DaqError;

    fn try_from(seconds: u32) -> Result<Self, Self::Error> {
        match seconds {
            1 => Ok(ReportingInterval::OneSecond),
            5 => Ok(ReportingInterval::FiveSeconds),
            30 => Ok(ReportingInterval::ThirtySeconds),
            60 => Ok(ReportingInterval::SixtySeconds),
            other => Err(DaqError::InvalidInterval(other)),
        }
    }
}

impl From<ReportingInterval> for u32 {
    fn from(interval: ReportingInterval) -> Self {
        interval.seconds()
    }
}

/// Result of one clock tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClockTick {
    /// Logical seconds since the last reset.
    pub elapsed_secs: u64,
    /// True when a record is due.
    pub emit_now: bool,
    /// Test time in minutes, rounded to 2 decimals. Updated only on emitting ticks.
    pub test_minutes: f64,
}

/// Logical test clock.
pub struct ClockEngine {
    time: Box<dyn TimeSource>,
    base: Instant,
    logical_secs: u64,
    interval: ReportingInterval,
    emit_now: bool,
    test_minutes: f64,
}

impl ClockEngine {
    /// Clock on the monotonic system clock.
    pub fn new(interval: ReportingInterval) -> Self {
        Self::with_time_source(interval, Box::new(MonotonicTime))
    }

    /// Clock on a custom time source.
    pub fn with_time_source(interval: ReportingInterval, time: Box<dyn TimeSource>) -> Self {
        let base = time.now();
        Self {
            time,
            base,
            logical_secs: 0,
            interval,
            emit_now: false,
            test_minutes: 0.0,
        }
    }

    /// Advance one logical second.
    pub fn tick(&mut self) -> ClockTick {
        let real = self.time.now().saturating_duration_since(self.base);
        self.logical_secs += 1;
        if real.as_secs_f64() - self.logical_secs as f64 > 1.0 {
            tracing::debug!(
                real_secs = real.as_secs_f64(),
                logical_secs = self.logical_secs,
                "Clock drift corrected"
            );
            self.logical_secs += 1;
        }

        self.emit_now = self.logical_secs % u64::from(self.interval.seconds()) == 0;
        if self.emit_now {
            self.test_minutes = round2(self.logical_secs as f64 / 60.0);
        }
        self.current()
    }

    /// Zero the clock and start a new base instant.
    pub fn reset(&mut self) {
        self.base = self.time.now();
        self.logical_secs = 0;
        self.emit_now = false;
        self.test_minutes = 0.0;
    }

    /// Change the reporting interval (1, 5, 30 or 60 seconds). Applies from the next tick.
    pub fn set_interval(&mut self, seconds: u32) -> AppResult<()> {
        self.interval = ReportingInterval::try_from(seconds)?;
        Ok(())
    }

    /// Current reporting interval.
    pub fn interval(&self) -> ReportingInterval {
        self.interval
    }

    /// Logical seconds since the last reset.
    pub fn elapsed_secs(&self) -> u64 {
        self.logical_secs
    }

    /// Whether the last tick was an emitting one.
    pub fn emit_now(&self) -> bool {
        self.emit_now
    }

    /// Test time in minutes as of the last emitting tick.
    pub fn test_minutes(&self) -> f64 {
        self.test_minutes
    }

    /// State of the clock as of the last tick.
    pub fn current(&self) -> ClockTick {
        ClockTick {
            elapsed_secs: self.logical_secs,
            emit_now: self.emit_now,
            test_minutes: self.test_minutes,
        }
    }
}

/// Round to 2 decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
