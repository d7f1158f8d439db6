//! Register map and decoding for the power meter.
//!
//! Values are 32-bit IEEE floats or signed integers spread over two
//! registers, high word first, each word big-endian.

use super::MeterError;
use crate::clock::round2;
use serde::{Deserialize, Serialize};

/// First register of the line quantity block.
pub const LINE_BLOCK_START: u16 = 999;
/// Registers in the line quantity block.
pub const LINE_BLOCK_COUNT: u16 = 26;
/// First register of the energy block.
pub const ENERGY_BLOCK_START: u16 = 1505;
/// Registers in the energy block.
pub const ENERGY_BLOCK_COUNT: u16 = 2;
/// Register that accepts reset commands.
pub const ENERGY_RESET_REGISTER: u16 = 20000;
/// Command value that clears the energy accumulators.
pub const ENERGY_RESET_COMMAND: u16 = 5555;

// Register offsets inside the line block
const V_AN: usize = 0;
const V_BN: usize = 2;
const V_CN: usize = 4;
const V_AB: usize = 6;
const V_BC: usize = 8;
const V_CA: usize = 10;
const I_A: usize = 12;
const I_B: usize = 14;
const I_C: usize = 16;
const WATTS: usize = 18;
const POWER_FACTOR: usize = 24;

/// Decoded meter quantities.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MeterSnapshot {
    /// Average line-to-line voltage after the tie-break rule.
    pub avg_voltage: f64,
    /// Total real power, W.
    pub watts: f64,
    /// Cumulative energy, Wh.
    pub energy_wh: f64,
    /// Phase A to neutral voltage.
    pub v_an: f64,
    /// Phase B to neutral voltage.
    pub v_bn: f64,
    /// Phase C to neutral voltage.
    pub v_cn: f64,
    /// Phase A to B voltage.
    pub v_ab: f64,
    /// Phase B to C voltage.
    pub v_bc: f64,
    /// Phase C to A voltage.
    pub v_ca: f64,
    /// Phase A current.
    pub i_a: f64,
    /// Phase B current.
    pub i_b: f64,
    /// Phase C current.
    pub i_c: f64,
    /// Total power factor.
    pub power_factor: f64,
}

/// Latest meter snapshot plus link health.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MeterReading {
    /// Most recent decoded values. Retained across faults.
    pub snapshot: MeterSnapshot,
    /// False until the first successful poll and after transport faults.
    pub connected: bool,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn word_pair(registers: &[u16], offset: usize) -> Result<u32, MeterError> {
    match registers.get(offset..offset + 2) {
        Some([hi, lo]) => Ok((u32::from(*hi) << 16) | u32::from(*lo)),
        _ => Err(MeterError::decode(format!(
            "register offset {} outside block of {}",
            offset,
            registers.len()
        ))),
    }
}

/// Decode a big-endian 32-bit float at `offset`.
pub fn decode_f32(registers: &[u16], offset: usize) -> Result<f64, MeterError> {
    word_pair(registers, offset).map(|bits| f64::from(f32::from_bits(bits)))
}

/// Decode a big-endian 32-bit signed integer at `offset`.
pub fn decode_i32(registers: &[u16], offset: usize) -> Result<i64, MeterError> {
    word_pair(registers, offset).map(|bits| i64::from(bits as i32))
}

/// Average line voltage.
///
/// With exactly one phase current at zero the line voltage between the other
/// two phases is used; otherwise the mean of the three line voltages.
pub fn average_line_voltage(v_ab: f64, v_bc: f64, v_ca: f64, i_a: f64, i_b: f64, i_c: f64) -> f64 {
    let zero = [i_a == 0.0, i_b == 0.0, i_c == 0.0];
    match zero {
        [true, false, false] => v_bc,
        [false, true, false] => v_ca,
        [false, false, true] => v_ab,
        _ => round1((v_ab + v_bc + v_ca) / 3.0),
    }
}

/// Decode both register blocks into a snapshot.
pub fn decode_snapshot(line: &[u16], energy: &[u16]) -> Result<MeterSnapshot, MeterError> {
    if line.len() != usize::from(LINE_BLOCK_COUNT) {
        return Err(MeterError::decode(format!(
            "line block has {} registers, expected {}",
            line.len(),
            LINE_BLOCK_COUNT
        )));
    }
    if energy.len() != usize::from(ENERGY_BLOCK_COUNT) {
        return Err(MeterError::decode(format!(
            "energy block has {} registers, expected {}",
            energy.len(),
            ENERGY_BLOCK_COUNT
        )));
    }

    let v_ab = round1(decode_f32(line, V_AB)?);
    let v_bc = round1(decode_f32(line, V_BC)?);
    let v_ca = round1(decode_f32(line, V_CA)?);
    let i_a = round1(decode_f32(line, I_A)?);
    let i_b = round1(decode_f32(line, I_B)?);
    let i_c = round1(decode_f32(line, I_C)?);

    Ok(MeterSnapshot {
        avg_voltage: average_line_voltage(v_ab, v_bc, v_ca, i_a, i_b, i_c),
        watts: round1(decode_f32(line, WATTS)?),
        energy_wh: decode_i32(energy, 0)? as f64,
        v_an: round1(decode_f32(line, V_AN)?),
        v_bn: round1(decode_f32(line, V_BN)?),
        v_cn: round1(decode_f32(line, V_CN)?),
        v_ab,
        v_bc,
        v_ca,
        i_a,
        i_b,
        i_c,
        power_factor: round2(decode_f32(line, POWER_FACTOR)?),
    })
}

/// Encode a float into two registers, high word first.
pub fn encode_f32(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    [(bits >> 16) as u16, bits as u16]
}

/// Encode a signed integer into two registers, high word first.
pub fn encode_i32(value: i32) -> [u16; 2] {
    let bits = value as u32;
    [(bits >> 16) as u16, bits as u16]
}

/// Register blocks a meter would return for `snapshot`. Used by the mock transport.
pub fn encode_snapshot(snapshot: &MeterSnapshot) -> (Vec<u16>, Vec<u16>) {
    let mut line = vec![0u16; usize::from(LINE_BLOCK_COUNT)];
    let fields = [
        (V_AN, snapshot.v_an),
        (V_BN, snapshot.v_bn),
        (V_CN, snapshot.v_cn),
        (V_AB, snapshot.v_ab),
        (V_BC, snapshot.v_bc),
        (V_CA, snapshot.v_ca),
        (I_A, snapshot.i_a),
        (I_B, snapshot.i_b),
        (I_C, snapshot.i_c),
        (WATTS, snapshot.watts),
        (POWER_FACTOR, snapshot.power_factor),
    ];
    for (offset, value) in fields {
        line[offset..offset + 2].copy_from_slice(&encode_f32(value as f32));
    }
    let energy = encode_i32(snapshot.energy_wh as i32).to_vec();
    (line, energy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MeterSnapshot {
        MeterSnapshot {
            v_an: 120.1,
            v_bn: 119.8,
            v_cn: 120.4,
            v_ab: 208.0,
            v_bc: 207.0,
            v_ca: 209.0,
            i_a: 4.2,
            i_b: 3.9,
            i_c: 4.0,
            watts: 1450.5,
            power_factor: 0.97,
            energy_wh: 123_456.0,
            avg_voltage: 0.0,
        }
    }

    #[test]
    fn test_float_word_order() {
        // 230.5 = 0x43668000
        let registers = [0x4366, 0x8000];
        assert_eq!(decode_f32(&registers, 0).unwrap(), 230.5);
        assert_eq!(encode_f32(230.5), registers);
    }

    #[test]
    fn test_negative_integer() {
        let registers = encode_i32(-42);
        assert_eq!(registers, [0xFFFF, 0xFFD6]);
        assert_eq!(decode_i32(&registers, 0).unwrap(), -42);
    }

    #[test]
    fn test_decode_snapshot() {
        let (line, energy) = encode_snapshot(&sample());
        let snapshot = decode_snapshot(&line, &energy).unwrap();

        assert_eq!(snapshot.v_an, 120.1);
        assert_eq!(snapshot.watts, 1450.5);
        assert_eq!(snapshot.energy_wh, 123_456.0);
        assert_eq!(snapshot.power_factor, 0.97);
        assert_eq!(snapshot.avg_voltage, 208.0);
    }

    #[test]
    fn test_short_block_is_decode_error() {
        let (line, energy) = encode_snapshot(&sample());
        let err = decode_snapshot(&line[..20], &energy).unwrap_err();
        assert!(matches!(err, MeterError::Decode { .. }));
    }

    #[test]
    fn test_average_voltage_single_zero_current() {
        assert_eq!(average_line_voltage(208.0, 207.0, 209.0, 0.0, 3.0, 3.0), 207.0);
        assert_eq!(average_line_voltage(208.0, 207.0, 209.0, 3.0, 0.0, 3.0), 209.0);
        assert_eq!(average_line_voltage(208.0, 207.0, 209.0, 3.0, 3.0, 0.0), 208.0);
    }

    #[test]
    fn test_average_voltage_otherwise_mean() {
        assert_eq!(average_line_voltage(208.0, 207.0, 210.0, 1.0, 1.0, 1.0), 208.3);
        assert_eq!(average_line_voltage(208.0, 207.0, 210.0, 0.0, 0.0, 1.0), 208.3);
        assert_eq!(average_line_voltage(0.0, 0.0, 0.0, 0.0, 0.0, 0.0), 0.0);
    }
}
