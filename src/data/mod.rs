//! Fused records, pulse accumulation, the in-memory time series and record sinks.
pub mod conversion;
pub mod pulse;
pub mod record;
pub mod storage;
pub mod time_series;

pub use conversion::{ConversionConfig, PulseChannel, ValidityBand};
pub use pulse::{PulseBank, PulseChannelState};
pub use record::{FusedRecord, MeterFields, PulseValue};
pub use storage::{CsvSink, RecordSink, ThreadedSink};
pub use time_series::TimeSeriesLog;
