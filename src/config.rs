//! Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/benchlog.toml` (or an explicit path)
//! 2. Environment variables prefixed with `BENCHLOG_`, nested keys separated
//!    by `__` (e.g. `BENCHLOG_METER__PORT=/dev/ttyUSB1`)
//!
//! Every section has defaults, so an empty or missing file yields a working
//! configuration.
//!
//! # Example
//! ```no_run
//! use benchlog::config::BenchConfig;
//!
//! let config = BenchConfig::load_from("config/benchlog.toml")?;
//! config.validate()?;
//! println!("Meter port: {}", config.meter.port);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::clock::ReportingInterval;
use crate::data::ConversionConfig;
use crate::error::AppResult;
use crate::hardware::{ChassisInventory, ModuleKind};
use crate::meter::SerialSettings;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/benchlog.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Tick loop and time series settings
    pub pipeline: PipelineConfig,
    /// Instrument chassis settings
    pub hardware: HardwareConfig,
    /// Power meter settings
    pub meter: MeterConfig,
    /// Pulse conversion factors and validity bands
    pub conversion: ConversionConfig,
    /// Output settings
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "benchlog".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Tick loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tick period in milliseconds
    pub tick_ms: u64,
    /// Reporting interval in seconds (1, 5, 30 or 60)
    pub reporting_interval_secs: u32,
    /// Maximum records held in memory
    pub log_capacity: usize,
    /// Records returned for charting
    pub chart_tail: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            reporting_interval_secs: 1,
            log_capacity: crate::data::time_series::DEFAULT_CAPACITY,
            chart_tail: 3600,
        }
    }
}

impl PipelineConfig {
    /// Tick period.
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Parsed reporting interval.
    pub fn reporting_interval(&self) -> AppResult<ReportingInterval> {
        ReportingInterval::try_from(self.reporting_interval_secs)
    }
}

/// Chassis driver selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareDriver {
    /// No chassis attached; the pipeline runs on meter data only.
    #[default]
    None,
    /// In-process simulated chassis.
    Simulated,
}

/// One module entry for the simulated chassis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleEntry {
    /// Chassis slot
    pub slot: u8,
    /// Product type, e.g. "NI 9214"
    pub product: String,
}

/// Instrument chassis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Chassis driver
    pub driver: HardwareDriver,
    /// Wait before each read, milliseconds
    pub settle_ms: u64,
    /// Modules of the simulated chassis; empty means counter, TC and voltage modules
    pub modules: Vec<ModuleEntry>,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            driver: HardwareDriver::None,
            settle_ms: 200,
            modules: Vec::new(),
        }
    }
}

impl HardwareConfig {
    /// Settle delay.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Inventory described by `modules`, or `None` when the list is empty.
    pub fn inventory(&self) -> Option<ChassisInventory> {
        if self.modules.is_empty() {
            return None;
        }
        Some(ChassisInventory::from_product_types(
            self.modules.iter().map(|m| (m.slot, m.product.as_str())),
        ))
    }
}

/// Power meter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Use the simulated meter instead of the serial port
    pub simulate: bool,
    /// Serial port name
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Modbus unit address
    pub unit_id: u8,
    /// Transaction timeout, milliseconds
    pub timeout_ms: u64,
    /// Pause between successful polls, milliseconds
    pub poll_pause_ms: u64,
    /// Wait after a transport fault, milliseconds
    pub fault_backoff_ms: u64,
    /// Clear the meter's energy accumulators on test start and reset
    pub reset_energy_on_start: bool,
}

impl Default for MeterConfig {
    fn default() -> Self {
        let serial = SerialSettings::default();
        Self {
            simulate: false,
            port: serial.port,
            baud_rate: serial.baud_rate,
            unit_id: serial.unit_id,
            timeout_ms: 1000,
            poll_pause_ms: 100,
            fault_backoff_ms: 1000,
            reset_energy_on_start: true,
        }
    }
}

impl MeterConfig {
    /// Serial line settings.
    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            unit_id: self.unit_id,
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }

    /// Pause between successful polls.
    pub fn poll_pause(&self) -> Duration {
        Duration::from_millis(self.poll_pause_ms)
    }

    /// Wait after a transport fault.
    pub fn fault_backoff(&self) -> Duration {
        Duration::from_millis(self.fault_backoff_ms)
    }
}

/// Output configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// CSV file receiving output records; no file output when unset
    pub output: Option<PathBuf>,
}

impl BenchConfig {
    /// Load configuration from the default path and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// Provider stack used by [`load_from`](Self::load_from).
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BENCHLOG_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        self.pipeline
            .reporting_interval()
            .map_err(|e| e.to_string())?;

        if self.pipeline.tick_ms == 0 {
            return Err("tick_ms must be greater than 0".to_string());
        }
        if self.pipeline.log_capacity == 0 {
            return Err("log_capacity must be greater than 0".to_string());
        }
        if self.meter.baud_rate == 0 {
            return Err("meter baud_rate must be greater than 0".to_string());
        }

        for module in &self.hardware.modules {
            if ModuleKind::from_product_type(&module.product).is_none() {
                return Err(format!(
                    "Unsupported module '{}' in slot {}",
                    module.product, module.slot
                ));
            }
        }

        self.conversion.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = BenchConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config.application.name, "benchlog");
        assert_eq!(config.pipeline.tick_ms, 1000);
        assert_eq!(config.pipeline.log_capacity, 21_600);
        assert_eq!(config.meter.baud_rate, 19200);
        assert_eq!(config.hardware.driver, HardwareDriver::None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_sections() {
        let file = write_config(
            r#"
            [application]
            log_level = "debug"

            [pipeline]
            reporting_interval_secs = 30

            [hardware]
            driver = "simulated"
            modules = [
                { slot = 1, product = "NI 9411" },
                { slot = 2, product = "NI 9211" },
            ]

            [meter]
            port = "COM4"
            timeout_ms = 500

            [[conversion.pulse_channels]]
            name = "Electric"
            factor = 1.0
            [[conversion.pulse_channels]]
            name = "Gas"
            factor = 0.5
            [[conversion.pulse_channels]]
            name = "Water"
            factor = 1.0
            [[conversion.pulse_channels]]
            name = "Aux"
            factor = 2.0

            [storage]
            output = "data/run.csv"
            "#,
        );

        let config = BenchConfig::load_from(file.path()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(
            config.pipeline.reporting_interval().unwrap(),
            ReportingInterval::ThirtySeconds
        );
        assert_eq!(config.hardware.driver, HardwareDriver::Simulated);
        assert_eq!(config.hardware.inventory().unwrap().module_count(), 2);
        assert_eq!(config.meter.serial_settings().timeout, Duration::from_millis(500));
        assert_eq!(config.meter.serial_settings().port, "COM4");
        assert_eq!(config.conversion.factors(), [1.0, 0.5, 1.0, 2.0]);
        assert_eq!(config.storage.output, Some(PathBuf::from("data/run.csv")));
    }

    #[test]
    fn test_config_validation() {
        let mut config = BenchConfig::default();
        config.pipeline.reporting_interval_secs = 10;
        assert!(config.validate().unwrap_err().contains("10"));

        let mut config = BenchConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = BenchConfig::default();
        config.hardware.modules.push(ModuleEntry {
            slot: 4,
            product: "NI 0000".to_string(),
        });
        assert!(config.validate().unwrap_err().contains("NI 0000"));
    }
}
