//! Pulse conversion factors and sensor validity bands.

use crate::hardware::PULSE_CHANNELS;
use serde::{Deserialize, Serialize};

/// Name and scale factor of one pulse channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseChannel {
    /// Column label.
    pub name: String,
    /// Units per pulse.
    pub factor: f64,
}

impl PulseChannel {
    /// New channel definition.
    pub fn new(name: impl Into<String>, factor: f64) -> Self {
        Self {
            name: name.into(),
            factor,
        }
    }
}

/// Plausible range of a sensor. Readings outside it mean an open or
/// disconnected sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidityBand {
    /// Lowest plausible value.
    pub min: f64,
    /// Highest plausible value.
    pub max: f64,
}

impl ValidityBand {
    /// Band from `min` to `max`, inclusive.
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// `Some(value)` when finite and inside the band, `None` otherwise.
    pub fn sanitize(&self, value: f64) -> Option<f64> {
        (value.is_finite() && value >= self.min && value <= self.max).then_some(value)
    }
}

/// Conversion settings applied by the aggregator. Read once per test start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// One entry per pulse counter, in counter order.
    pub pulse_channels: Vec<PulseChannel>,
    /// Plausible thermocouple range, °F.
    #[serde(default = "default_thermocouple_band")]
    pub thermocouple_band: ValidityBand,
    /// Plausible analog input range.
    #[serde(default = "default_analog_band")]
    pub analog_band: ValidityBand,
}

fn default_thermocouple_band() -> ValidityBand {
    // Open thermocouples read far above the upper bound
    ValidityBand::new(-459.67, 3500.0)
}

fn default_analog_band() -> ValidityBand {
    ValidityBand::new(-3500.0, 3500.0)
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            pulse_channels: vec![
                PulseChannel::new("Electric", 1.0),
                PulseChannel::new("Gas", 0.1),
                PulseChannel::new("Water", 1.0),
                PulseChannel::new("Aux", 1.0),
            ],
            thermocouple_band: default_thermocouple_band(),
            analog_band: default_analog_band(),
        }
    }
}

impl ConversionConfig {
    /// Check channel count and band ordering.
    pub fn validate(&self) -> Result<(), String> {
        if self.pulse_channels.len() != PULSE_CHANNELS {
            return Err(format!(
                "Expected {} pulse channels, found {}",
                PULSE_CHANNELS,
                self.pulse_channels.len()
            ));
        }
        for channel in &self.pulse_channels {
            if !channel.factor.is_finite() {
                return Err(format!("Pulse channel '{}' has a non-finite factor", channel.name));
            }
        }
        for (name, band) in [
            ("thermocouple_band", self.thermocouple_band),
            ("analog_band", self.analog_band),
        ] {
            if !(band.min < band.max) {
                return Err(format!(
                    "Invalid {}: min {} must be below max {}",
                    name, band.min, band.max
                ));
            }
        }
        Ok(())
    }

    /// Scale factors in counter order.
    pub fn factors(&self) -> [f64; PULSE_CHANNELS] {
        let mut factors = [1.0; PULSE_CHANNELS];
        for (slot, channel) in factors.iter_mut().zip(&self.pulse_channels) {
            *slot = channel.factor;
        }
        factors
    }

    /// Channel labels in counter order.
    pub fn names(&self) -> Vec<String> {
        self.pulse_channels.iter().map(|c| c.name.clone()).collect()
    }
}
