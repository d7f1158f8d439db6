//! Modbus RTU framing for the power meter.
//!
//! Only the two functions the meter needs are implemented: read holding
//! registers (0x03) and write multiple registers (0x10, used for single
//! register writes). Frames carry a CRC-16/MODBUS trailer, low byte first.
//!
//! The functions here work on any `Read + Write` port so they can be driven
//! by a serial port in production and by an in-memory port in tests.

use super::MeterError;
use crc::{Crc, CRC_16_MODBUS};
use std::io::{Read, Write};
use tracing::instrument;

/// Read holding registers.
pub const READ_HOLDING_REGISTERS: u8 = 0x03;
/// Write multiple registers.
pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
/// Largest register count allowed in one read.
pub const MAX_READ_REGISTERS: u16 = 125;

const EXCEPTION_FLAG: u8 = 0x80;
const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// CRC-16/MODBUS of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    MODBUS_CRC.checksum(data)
}

/// Append the CRC trailer to a frame.
pub fn with_crc(mut frame: Vec<u8>) -> Vec<u8> {
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

fn check_crc(frame: &[u8]) -> Result<(), MeterError> {
    if frame.len() < 4 {
        return Err(MeterError::protocol(format!("frame too short ({} bytes)", frame.len())));
    }
    let (body, trailer) = frame.split_at(frame.len() - 2);
    let received = u16::from_le_bytes([trailer[0], trailer[1]]);
    let expected = crc16(body);
    if received != expected {
        return Err(MeterError::protocol(format!(
            "CRC mismatch: received 0x{:04X}, expected 0x{:04X}",
            received, expected
        )));
    }
    Ok(())
}

/// Request frame for reading `count` holding registers from `start`.
pub fn read_holding_registers_request(unit: u8, start: u16, count: u16) -> Vec<u8> {
    let mut frame = vec![unit, READ_HOLDING_REGISTERS];
    frame.extend_from_slice(&start.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    with_crc(frame)
}

/// Request frame for writing one register through function 0x10.
pub fn write_register_request(unit: u8, address: u16, value: u16) -> Vec<u8> {
    let mut frame = vec![unit, WRITE_MULTIPLE_REGISTERS];
    frame.extend_from_slice(&address.to_be_bytes());
    frame.extend_from_slice(&1u16.to_be_bytes());
    frame.push(2);
    frame.extend_from_slice(&value.to_be_bytes());
    with_crc(frame)
}

fn read_bytes<P: Read + ?Sized>(port: &mut P, len: usize) -> Result<Vec<u8>, MeterError> {
    let mut buf = vec![0u8; len];
    port.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read the unit/function header, turning exception replies into errors.
fn read_header<P: Read + ?Sized>(
    port: &mut P,
    unit: u8,
    function: u8,
) -> Result<[u8; 2], MeterError> {
    let header = read_bytes(port, 2)?;
    if header[1] == function | EXCEPTION_FLAG {
        let rest = read_bytes(port, 3)?;
        let frame = [header[0], header[1], rest[0], rest[1], rest[2]];
        check_crc(&frame)?;
        return Err(MeterError::Exception {
            function,
            code: rest[0],
        });
    }
    if header[0] != unit {
        return Err(MeterError::protocol(format!(
            "reply from unit {} while talking to unit {}",
            header[0], unit
        )));
    }
    if header[1] != function {
        return Err(MeterError::protocol(format!(
            "reply for function 0x{:02X}, expected 0x{:02X}",
            header[1], function
        )));
    }
    Ok([header[0], header[1]])
}

/// Read `count` holding registers starting at `start`.
#[instrument(level = "debug", skip(port), err)]
pub fn read_holding_registers<P: Read + Write + ?Sized>(
    port: &mut P,
    unit: u8,
    start: u16,
    count: u16,
) -> Result<Vec<u16>, MeterError> {
    if count == 0 || count > MAX_READ_REGISTERS {
        return Err(MeterError::protocol(format!(
            "register count {} outside 1..={}",
            count, MAX_READ_REGISTERS
        )));
    }

    port.write_all(&read_holding_registers_request(unit, start, count))?;
    port.flush()?;

    let header = read_header(port, unit, READ_HOLDING_REGISTERS)?;
    let byte_count = read_bytes(port, 1)?[0];
    let rest = read_bytes(port, usize::from(byte_count) + 2)?;

    let mut frame = Vec::with_capacity(3 + rest.len());
    frame.extend_from_slice(&header);
    frame.push(byte_count);
    frame.extend_from_slice(&rest);
    check_crc(&frame)?;

    let expected = usize::from(count) * 2;
    if usize::from(byte_count) != expected {
        return Err(MeterError::decode(format!(
            "expected {} data bytes, got {}",
            expected, byte_count
        )));
    }

    Ok(rest[..expected]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Write one register and check the echo.
#[instrument(level = "debug", skip(port), err)]
pub fn write_register<P: Read + Write + ?Sized>(
    port: &mut P,
    unit: u8,
    address: u16,
    value: u16,
) -> Result<(), MeterError> {
    port.write_all(&write_register_request(unit, address, value))?;
    port.flush()?;

    let header = read_header(port, unit, WRITE_MULTIPLE_REGISTERS)?;
    let rest = read_bytes(port, 6)?;
    let mut frame = header.to_vec();
    frame.extend_from_slice(&rest);
    check_crc(&frame)?;

    let echoed_address = u16::from_be_bytes([rest[0], rest[1]]);
    let echoed_count = u16::from_be_bytes([rest[2], rest[3]]);
    if echoed_address != address || echoed_count != 1 {
        return Err(MeterError::protocol(format!(
            "write echo mismatch: register {} x{}",
            echoed_address, echoed_count
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{self, Cursor};

    /// In-memory port that records requests and replays a canned reply.
    pub(crate) struct FakePort {
        pub written: Vec<u8>,
        reply: Cursor<Vec<u8>>,
    }

    impl FakePort {
        pub fn replying(reply: Vec<u8>) -> Self {
            Self {
                written: Vec::new(),
                reply: Cursor::new(reply),
            }
        }
    }

    impl Read for FakePort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.reply.read(buf)?;
            if n == 0 && !buf.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"));
            }
            Ok(n)
        }
    }

    impl Write for FakePort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn read_reply(unit: u8, registers: &[u16]) -> Vec<u8> {
        let mut frame = vec![unit, READ_HOLDING_REGISTERS, (registers.len() * 2) as u8];
        for r in registers {
            frame.extend_from_slice(&r.to_be_bytes());
        }
        with_crc(frame)
    }

    #[test]
    fn test_request_frame_matches_reference() {
        assert_eq!(
            read_holding_registers_request(1, 0, 1),
            vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]
        );
    }

    #[test]
    fn test_read_registers() {
        let mut port = FakePort::replying(read_reply(1, &[0x1234, 0xABCD]));
        let registers = read_holding_registers(&mut port, 1, 999, 2).unwrap();

        assert_eq!(registers, vec![0x1234, 0xABCD]);
        assert_eq!(port.written, read_holding_registers_request(1, 999, 2));
    }

    #[test]
    fn test_exception_reply() {
        let mut port = FakePort::replying(with_crc(vec![1, 0x83, 0x02]));
        let err = read_holding_registers(&mut port, 1, 999, 26).unwrap_err();
        assert!(matches!(err, MeterError::Exception { function: 0x03, code: 0x02 }));
    }

    #[test]
    fn test_corrupted_crc_is_protocol_error() {
        let mut reply = read_reply(1, &[1, 2]);
        let last = reply.len() - 1;
        reply[last] ^= 0xFF;
        let mut port = FakePort::replying(reply);
        let err = read_holding_registers(&mut port, 1, 0, 2).unwrap_err();
        assert!(matches!(err, MeterError::Protocol { .. }));
    }

    #[test]
    fn test_short_payload_is_decode_error() {
        let mut port = FakePort::replying(read_reply(1, &[1]));
        let err = read_holding_registers(&mut port, 1, 0, 2).unwrap_err();
        assert!(matches!(err, MeterError::Decode { .. }));
    }

    #[test]
    fn test_wrong_unit_is_protocol_error() {
        let mut port = FakePort::replying(read_reply(7, &[1]));
        let err = read_holding_registers(&mut port, 1, 0, 1).unwrap_err();
        assert!(matches!(err, MeterError::Protocol { .. }));
    }

    #[test]
    fn test_silence_is_no_response() {
        let mut port = FakePort::replying(Vec::new());
        let err = read_holding_registers(&mut port, 1, 0, 1).unwrap_err();
        assert!(matches!(err, MeterError::NoResponse));
    }

    #[test]
    fn test_write_register_echo() {
        let mut echo = vec![1, WRITE_MULTIPLE_REGISTERS];
        echo.extend_from_slice(&20000u16.to_be_bytes());
        echo.extend_from_slice(&1u16.to_be_bytes());
        let mut port = FakePort::replying(with_crc(echo));

        write_register(&mut port, 1, 20000, 5555).unwrap();
        assert_eq!(port.written, write_register_request(1, 20000, 5555));
        assert_eq!(&port.written[7..9], &5555u16.to_be_bytes());
    }

    #[test]
    fn test_write_register_echo_mismatch() {
        let mut echo = vec![1, WRITE_MULTIPLE_REGISTERS];
        echo.extend_from_slice(&19999u16.to_be_bytes());
        echo.extend_from_slice(&1u16.to_be_bytes());
        let mut port = FakePort::replying(with_crc(echo));

        let err = write_register(&mut port, 1, 20000, 5555).unwrap_err();
        assert!(matches!(err, MeterError::Protocol { .. }));
    }
}
