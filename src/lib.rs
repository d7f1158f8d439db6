//! # benchlog
//!
//! Acquisition and aggregation pipeline for bench instrumentation. Two
//! background pollers keep the latest readings of an instrument chassis
//! (pulse counters, thermocouples, analog inputs) and of a Modbus power meter
//! fresh. Once a second the [`Aggregator`](aggregator::Aggregator) fuses both
//! into one record, applies pulse conversion and sensor sanitization, keeps a
//! bounded time series and hands output records to persistence sinks.
//!
//! ## Crate Structure
//!
//! - **`clock`**: logical one-second clock with drift correction and
//!   reporting interval.
//! - **`hardware`**: chassis layout, `HardwareAdapter` poller and the
//!   `ChassisBackend` seam (a simulated chassis ships in `hardware::mock`).
//! - **`meter`**: Modbus RTU framing, register decoding and the `MeterClient`
//!   poller with its fault taxonomy.
//! - **`data`**: fused records, pulse accumulation, the time series and
//!   record sinks (CSV).
//! - **`aggregator`**: per-tick fusion and the test lifecycle.
//! - **`control`**: operator commands.
//! - **`config`** / **`logging`** / **`error`**: ambient infrastructure.
//! - **`snapshot`**: single-slot latest-value cells shared between pollers
//!   and the tick loop.

pub mod aggregator;
pub mod clock;
pub mod config;
pub mod control;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod meter;
pub mod snapshot;

pub use aggregator::{Aggregator, LiveView, TickOutcome};
pub use clock::{ClockEngine, ClockTick, ReportingInterval};
pub use config::BenchConfig;
pub use error::{AppResult, DaqError};
