//! The fused per-tick record.

use crate::hardware::{ANALOG_CHANNELS, PULSE_CHANNELS, THERMOCOUPLE_CHANNELS};
use chrono::NaiveTime;
use serde::Serialize;
use std::ops::Range;

/// Meter quantities carried in every record.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MeterFields {
    /// Average line voltage.
    pub avg_voltage: f64,
    /// Real power, W.
    pub watts: f64,
    /// Cumulative energy reported by the meter, Wh.
    pub energy_wh: f64,
}

/// Converted values of one pulse channel.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PulseValue {
    /// Units counted during the last tick (or window).
    pub interval: f64,
    /// Units counted since the test baseline.
    pub cumulative: f64,
}

/// One row of the time series. `None` marks a sanitized sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedRecord {
    /// Wall-clock time of day.
    #[serde(serialize_with = "serialize_time_of_day")]
    pub time_of_day: NaiveTime,
    /// Test time in minutes.
    pub test_minutes: f64,
    /// Meter quantities.
    pub meter: MeterFields,
    /// Pulse channels in counter order.
    pub pulses: [PulseValue; PULSE_CHANNELS],
    /// Analog inputs.
    pub analog: [Option<f64>; ANALOG_CHANNELS],
    /// Thermocouple temperatures, °F.
    pub thermocouples: [Option<f64>; THERMOCOUPLE_CHANNELS],
}

fn serialize_time_of_day<S: serde::Serializer>(
    time: &NaiveTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&time.format(TIME_OF_DAY_FORMAT))
}

/// Format of the time-of-day column.
pub const TIME_OF_DAY_FORMAT: &str = "%H:%M:%S";

impl FusedRecord {
    /// Record with every value at zero.
    pub fn zeroed(time_of_day: NaiveTime, test_minutes: f64) -> Self {
        Self {
            time_of_day,
            test_minutes,
            meter: MeterFields::default(),
            pulses: [PulseValue::default(); PULSE_CHANNELS],
            analog: [Some(0.0); ANALOG_CHANNELS],
            thermocouples: [Some(0.0); THERMOCOUPLE_CHANNELS],
        }
    }

    /// First thermocouple, wired as the ambient probe.
    pub fn ambient(&self) -> Option<f64> {
        self.thermocouples[0]
    }

    /// Mean of the valid thermocouples in `channels`. `None` when none are valid.
    pub fn thermocouple_mean(&self, channels: Range<usize>) -> Option<f64> {
        let end = channels.end.min(THERMOCOUPLE_CHANNELS);
        let start = channels.start.min(end);
        mean(self.thermocouples[start..end].iter().flatten().copied())
    }

    /// Column labels matching [`to_row`](Self::to_row).
    pub fn header(pulse_names: &[String]) -> Vec<String> {
        let mut header = vec![
            "Time of Day".to_string(),
            "Test Time (min)".to_string(),
            "V avg".to_string(),
            "W".to_string(),
            "Wh".to_string(),
        ];
        header.extend((0..PULSE_CHANNELS).map(|i| pulse_label(pulse_names, i)));
        header.extend((0..PULSE_CHANNELS).map(|i| format!("{} interval", pulse_label(pulse_names, i))));
        header.extend((1..=ANALOG_CHANNELS).map(|i| format!("AI {}", i)));
        header.extend((1..=THERMOCOUPLE_CHANNELS).map(|i| format!("Temp {}", i)));
        header
    }

    /// Values as text, empty for sanitized readings.
    pub fn to_row(&self) -> Vec<String> {
        let mut row = vec![
            self.time_of_day.format(TIME_OF_DAY_FORMAT).to_string(),
            self.test_minutes.to_string(),
            self.meter.avg_voltage.to_string(),
            self.meter.watts.to_string(),
            self.meter.energy_wh.to_string(),
        ];
        row.extend(self.pulses.iter().map(|p| p.cumulative.to_string()));
        row.extend(self.pulses.iter().map(|p| p.interval.to_string()));
        row.extend(self.analog.iter().chain(self.thermocouples.iter()).map(|v| {
            v.map(|v| v.to_string()).unwrap_or_default()
        }));
        row
    }
}

fn pulse_label(names: &[String], index: usize) -> String {
    names
        .get(index)
        .cloned()
        .unwrap_or_else(|| format!("Pulse {}", index + 1))
}

/// Arithmetic mean, `None` for an empty input.
pub fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> FusedRecord {
        FusedRecord::zeroed(NaiveTime::from_hms_opt(13, 5, 9).unwrap(), 1.5)
    }

    #[test]
    fn test_header_and_row_align() {
        let names: Vec<String> = ["Electric", "Gas", "Water", "Aux"].iter().map(|s| s.to_string()).collect();
        let header = FusedRecord::header(&names);
        let row = record().to_row();

        assert_eq!(header.len(), row.len());
        assert_eq!(header.len(), 5 + 8 + 2 + 32);
        assert_eq!(header[5], "Electric");
        assert_eq!(header[10], "Gas interval");
        assert_eq!(row[0], "13:05:09");
        assert_eq!(row[1], "1.5");
    }

    #[test]
    fn test_sanitized_values_are_empty_cells() {
        let mut record = record();
        record.thermocouples[3] = None;
        let row = record.to_row();
        assert_eq!(row[5 + 8 + 2 + 3], "");
        assert_eq!(row[5 + 8 + 2 + 4], "0");
    }

    #[test]
    fn test_thermocouple_mean_skips_nulls() {
        let mut record = record();
        record.thermocouples[0] = Some(70.0);
        record.thermocouples[1] = None;
        record.thermocouples[2] = Some(74.0);
        assert_eq!(record.thermocouple_mean(0..3), Some(72.0));
        assert_eq!(record.thermocouple_mean(1..2), None);
        assert_eq!(record.thermocouple_mean(30..40), Some(0.0));
    }

    #[test]
    fn test_serializes_time_of_day_as_text() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["time_of_day"], "13:05:09");
        assert_eq!(json["thermocouples"].as_array().unwrap().len(), 32);
    }
}
