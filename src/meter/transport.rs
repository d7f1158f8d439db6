//! Register-level access to the meter and the serial RTU implementation.

use super::MeterError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Register-level access to the power meter.
///
/// Calls block for at most one transaction timeout and are only made from the
/// meter poll thread.
pub trait MeterTransport: Send {
    /// Read `count` holding registers from `start`.
    fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>, MeterError>;

    /// Write one register.
    fn write_register(&mut self, address: u16, value: u16) -> Result<(), MeterError>;
}

/// Serial line profile for the meter: 8 data bits, no parity, 1 stop bit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Port name, e.g. `/dev/ttyUSB0` or `COM4`.
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Modbus unit address.
    pub unit_id: u8,
    /// Per-transaction timeout.
    pub timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 19200,
            unit_id: 1,
            timeout: Duration::from_secs(1),
        }
    }
}

/// Modbus RTU over a serial port.
///
/// The port is opened lazily and dropped after any transport failure, so the
/// next transaction reopens it.
#[cfg(feature = "instrument_serial")]
pub struct SerialMeterTransport {
    settings: SerialSettings,
    port: Option<Box<dyn serialport::SerialPort>>,
}

#[cfg(feature = "instrument_serial")]
impl SerialMeterTransport {
    /// Transport for `settings`. Does not touch the port yet.
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            port: None,
        }
    }

    /// Open the port now instead of on the first transaction.
    pub fn open(&mut self) -> Result<(), MeterError> {
        self.connect().map(|_| ())
    }

    fn connect(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>, MeterError> {
        if self.port.is_none() {
            let port = serialport::new(&self.settings.port, self.settings.baud_rate)
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::One)
                .flow_control(serialport::FlowControl::None)
                .timeout(self.settings.timeout)
                .open()
                .map_err(|e| {
                    MeterError::transport(format!("cannot open {}: {}", self.settings.port, e))
                })?;
            tracing::info!(
                port = %self.settings.port,
                baud = self.settings.baud_rate,
                "Meter serial port opened"
            );
            self.port = Some(port);
        }
        self.port
            .as_mut()
            .ok_or_else(|| MeterError::transport("serial port not open"))
    }

    fn transact<T>(
        &mut self,
        f: impl FnOnce(&mut dyn serialport::SerialPort, u8) -> Result<T, MeterError>,
    ) -> Result<T, MeterError> {
        let unit = self.settings.unit_id;
        let port = self.connect()?;
        let result = port
            .clear(serialport::ClearBuffer::Input)
            .map_err(MeterError::transport)
            .and_then(|_| f(&mut **port, unit));

        if let Err(MeterError::Transport { .. }) = &result {
            tracing::debug!(port = %self.settings.port, "Dropping meter port after transport fault");
            self.port = None;
        }
        result
    }
}

#[cfg(feature = "instrument_serial")]
impl MeterTransport for SerialMeterTransport {
    fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>, MeterError> {
        self.transact(|port, unit| super::modbus::read_holding_registers(port, unit, start, count))
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<(), MeterError> {
        self.transact(|port, unit| super::modbus::write_register(port, unit, address, value))
    }
}

/// Placeholder used when serial support is compiled out; every call fails
/// with a transport error.
#[cfg(not(feature = "instrument_serial"))]
pub struct SerialMeterTransport {
    settings: SerialSettings,
}

#[cfg(not(feature = "instrument_serial"))]
impl SerialMeterTransport {
    /// Transport for `settings`.
    pub fn new(settings: SerialSettings) -> Self {
        Self { settings }
    }

    /// Always fails: serial support is not compiled in.
    pub fn open(&mut self) -> Result<(), MeterError> {
        Err(MeterError::transport(format!(
            "cannot open {}: serial support not enabled, rebuild with --features instrument_serial",
            self.settings.port
        )))
    }
}

#[cfg(not(feature = "instrument_serial"))]
impl MeterTransport for SerialMeterTransport {
    fn read_holding_registers(&mut self, _start: u16, _count: u16) -> Result<Vec<u16>, MeterError> {
        self.open().map(|_| Vec::new())
    }

    fn write_register(&mut self, _address: u16, _value: u16) -> Result<(), MeterError> {
        self.open()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile() {
        let settings = SerialSettings::default();
        assert_eq!(settings.baud_rate, 19200);
        assert_eq!(settings.unit_id, 1);
        assert_eq!(settings.timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_missing_port_is_transport_fault() {
        let mut transport = SerialMeterTransport::new(SerialSettings {
            port: "/dev/benchlog-missing-port".to_string(),
            ..SerialSettings::default()
        });
        let err = transport.read_holding_registers(999, 26).unwrap_err();
        assert_eq!(err.class(), crate::meter::FaultClass::Backoff);
    }
}
