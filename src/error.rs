//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole pipeline.
//! Device-level failures have their own enums close to the code that produces
//! them ([`MeterError`](crate::meter::MeterError) for the serial power meter and
//! [`ChassisError`](crate::hardware::ChassisError) for the instrument chassis);
//! both convert into `DaqError` with `?`.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: figment extraction errors (missing file keys, type mismatches).
//! - **`Configuration`**: semantic errors caught by validation after loading.
//! - **`InvalidInterval`**: a reporting interval outside 1, 5, 30 or 60 seconds.
//! - **`Io`** / **`Csv`**: persistence sink failures.
//! - **`Meter`** / **`Chassis`**: device failures surfaced through one-shot calls.
//! - **`FeatureNotEnabled`**: functionality compiled out.
//!
//! None of these stop the tick loop. Poll loops classify device failures
//! themselves, and sink errors are logged by the aggregator.

use crate::hardware::ChassisError;
use crate::meter::MeterError;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration could not be extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Reporting interval outside the supported set.
    #[error("Invalid reporting interval {0}s. Must be one of: 1, 5, 30, 60")]
    InvalidInterval(u32),

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writer failure.
    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Power meter failure.
    #[error("Meter error: {0}")]
    Meter(#[from] MeterError),

    /// Instrument chassis failure.
    #[error("Chassis error: {0}")]
    Chassis(#[from] ChassisError),

    /// Optional feature compiled out.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// A worker thread could not be spawned or joined.
    #[error("Worker thread error: {0}")]
    Worker(String),
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}
