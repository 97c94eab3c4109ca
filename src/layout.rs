// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Bit layouts of the Victron "extra data" records.
//
// Each record type packs its fields least-significant-bit first, little-endian
// across bytes, starting at the first decrypted byte. Field widths:
//
// | Record | Fields (bits) |
// |---|---|
// | Solar charger `0x01` | state 8, error 8, battery V 16s, battery A 16s, yield 16, PV W 16, load A 9 |
// | DC/DC converter `0x04` | state 8, error 8, input V 16, output V 16s, off reason 32 |
// | SmartLithium `0x05` | BMS flags 32, error 16, cells 8 x 7, battery V 12, balancer 4, temperature 7 |
// | Lynx Smart BMS `0x0A` | error 8, TTG 16, battery V 16, battery A 16s, IO 16, warnings 18, SoC 10, consumed Ah 20, temperature 7 |
// | Orion XS `0x0F` | state 8, error 8, output V 16, output A 16, input V 16, input A 16, off reason 32 |
//
// Fields holding their "not available" sentinel decode to `None`.

use std::fmt;

use crate::error::DecodeError;

/// Record type tag found at advertisement byte 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    SolarCharger = 0x01,
    DcDcConverter = 0x04,
    SmartLithium = 0x05,
    LynxSmartBms = 0x0A,
    OrionXs = 0x0F,
}

impl RecordType {
    /// Minimum number of decrypted bytes the layout needs.
    pub fn min_len(self) -> usize {
        match self {
            RecordType::SolarCharger => SolarChargerRecord::LEN,
            RecordType::DcDcConverter => DcDcConverterRecord::LEN,
            RecordType::SmartLithium => SmartLithiumRecord::LEN,
            RecordType::LynxSmartBms => LynxSmartBmsRecord::LEN,
            RecordType::OrionXs => OrionXsRecord::LEN,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RecordType::SolarCharger => "Solar Charger",
            RecordType::DcDcConverter => "DC/DC Converter",
            RecordType::SmartLithium => "SmartLithium",
            RecordType::LynxSmartBms => "Lynx Smart BMS",
            RecordType::OrionXs => "Orion XS",
        }
    }
}

impl TryFrom<u8> for RecordType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(RecordType::SolarCharger),
            0x04 => Ok(RecordType::DcDcConverter),
            0x05 => Ok(RecordType::SmartLithium),
            0x0A => Ok(RecordType::LynxSmartBms),
            0x0F => Ok(RecordType::OrionXs),
            other => Err(DecodeError::UnknownRecordType(other)),
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reads LSB-first bit fields from a byte slice.
pub struct BitReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    /// Read an unsigned field of up to 32 bits. Bits past the end read as zero.
    pub fn read(&mut self, width: u32) -> u32 {
        debug_assert!(width <= 32);
        let mut value = 0u32;
        for i in 0..width as usize {
            let bit = self.position + i;
            let byte = self.bytes.get(bit / 8).copied().unwrap_or(0);
            value |= u32::from((byte >> (bit % 8)) & 1) << i;
        }
        self.position += width as usize;
        value
    }

    /// Read a two's complement field of up to 32 bits.
    pub fn read_signed(&mut self, width: u32) -> i32 {
        let raw = self.read(width);
        if width < 32 && raw & (1 << (width - 1)) != 0 {
            (raw | !((1u32 << width) - 1)) as i32
        } else {
            raw as i32
        }
    }

    pub fn skip(&mut self, width: u32) {
        self.position += width as usize;
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

/// Writes LSB-first bit fields; the inverse of [`BitReader`].
///
/// Used to build record payloads for simulation and replay tooling.
#[derive(Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    position: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, width: u32, value: u32) -> &mut Self {
        for i in 0..width as usize {
            let bit = self.position + i;
            if self.bytes.len() <= bit / 8 {
                self.bytes.push(0);
            }
            if (value >> i) & 1 != 0 {
                self.bytes[bit / 8] |= 1 << (bit % 8);
            }
        }
        self.position += width as usize;
        self
    }

    pub fn write_signed(&mut self, width: u32, value: i32) -> &mut Self {
        self.write(width, value as u32)
    }

    /// Finish, zero padding the buffer to `len` bytes.
    pub fn finish(mut self, len: usize) -> Vec<u8> {
        if self.bytes.len() < len {
            self.bytes.resize(len, 0);
        }
        self.bytes
    }
}

fn scaled(raw: u32, sentinel: u32, scale: f64, offset: f64) -> Option<f64> {
    (raw != sentinel).then(|| f64::from(raw) * scale + offset)
}

fn scaled_signed(raw: i32, sentinel: i32, scale: f64) -> Option<f64> {
    (raw != sentinel).then(|| f64::from(raw) * scale)
}

fn check_len(plaintext: &[u8], needed: usize) -> Result<(), DecodeError> {
    if plaintext.len() < needed {
        return Err(DecodeError::TooShort {
            needed,
            actual: plaintext.len(),
        });
    }
    Ok(())
}

/// Solar charger (MPPT) readout.
#[derive(Debug, Clone, PartialEq)]
pub struct SolarChargerRecord {
    pub device_state: u8,
    pub charger_error: u8,
    /// Volts
    pub battery_voltage: Option<f64>,
    /// Amps
    pub battery_current: Option<f64>,
    /// kWh
    pub yield_today: Option<f64>,
    /// Watts
    pub pv_power: Option<f64>,
    /// Amps
    pub load_current: Option<f64>,
}

impl SolarChargerRecord {
    pub const LEN: usize = 12;

    pub fn parse(plaintext: &[u8]) -> Result<Self, DecodeError> {
        check_len(plaintext, Self::LEN)?;
        let mut bits = BitReader::new(plaintext);
        Ok(Self {
            device_state: bits.read(8) as u8,
            charger_error: bits.read(8) as u8,
            battery_voltage: scaled_signed(bits.read_signed(16), 0x7FFF, 0.01),
            battery_current: scaled_signed(bits.read_signed(16), 0x7FFF, 0.1),
            yield_today: scaled(bits.read(16), 0xFFFF, 0.01, 0.0),
            pv_power: scaled(bits.read(16), 0xFFFF, 1.0, 0.0),
            load_current: scaled(bits.read(9), 0x1FF, 0.1, 0.0),
        })
    }
}

/// DC/DC converter (Orion Smart) readout.
#[derive(Debug, Clone, PartialEq)]
pub struct DcDcConverterRecord {
    pub device_state: u8,
    pub charger_error: u8,
    pub input_voltage: Option<f64>,
    pub output_voltage: Option<f64>,
    pub off_reason: u32,
}

impl DcDcConverterRecord {
    pub const LEN: usize = 10;

    pub fn parse(plaintext: &[u8]) -> Result<Self, DecodeError> {
        check_len(plaintext, Self::LEN)?;
        let mut bits = BitReader::new(plaintext);
        Ok(Self {
            device_state: bits.read(8) as u8,
            charger_error: bits.read(8) as u8,
            input_voltage: scaled(bits.read(16), 0xFFFF, 0.01, 0.0),
            output_voltage: scaled_signed(bits.read_signed(16), 0x7FFF, 0.01),
            off_reason: bits.read(32),
        })
    }
}

/// SmartLithium battery readout.
#[derive(Debug, Clone, PartialEq)]
pub struct SmartLithiumRecord {
    pub bms_flags: u32,
    pub error: u16,
    /// Cell voltages; `None` where the battery reports no cell.
    pub cells: [Option<f64>; 8],
    pub battery_voltage: Option<f64>,
    pub balancer_status: u8,
    /// Degrees Celsius
    pub battery_temperature: Option<f64>,
}

impl SmartLithiumRecord {
    pub const LEN: usize = 16;
    pub const CELL_SENTINEL: u32 = 0x7F;
    pub const CELL_SCALE: f64 = 0.01;
    pub const CELL_OFFSET: f64 = 2.60;

    pub fn parse(plaintext: &[u8]) -> Result<Self, DecodeError> {
        check_len(plaintext, Self::LEN)?;
        let mut bits = BitReader::new(plaintext);
        let bms_flags = bits.read(32);
        let error = bits.read(16) as u16;
        let mut cells = [None; 8];
        for cell in cells.iter_mut() {
            *cell = scaled(
                bits.read(7),
                Self::CELL_SENTINEL,
                Self::CELL_SCALE,
                Self::CELL_OFFSET,
            );
        }
        Ok(Self {
            bms_flags,
            error,
            cells,
            battery_voltage: scaled(bits.read(12), 0xFFF, 0.01, 0.0),
            balancer_status: bits.read(4) as u8,
            battery_temperature: scaled(bits.read(7), 0x7F, 1.0, -40.0),
        })
    }
}

/// Lynx Smart BMS readout. The layout is decoded but not archived.
#[derive(Debug, Clone, PartialEq)]
pub struct LynxSmartBmsRecord {
    pub error: u8,
    /// Minutes
    pub time_to_go: Option<u16>,
    pub battery_voltage: Option<f64>,
    pub battery_current: Option<f64>,
    pub io_status: u16,
    pub warnings: u32,
    /// Percent
    pub state_of_charge: Option<f64>,
    pub consumed_ah: Option<f64>,
    pub temperature: Option<f64>,
}

impl LynxSmartBmsRecord {
    pub const LEN: usize = 16;

    pub fn parse(plaintext: &[u8]) -> Result<Self, DecodeError> {
        check_len(plaintext, Self::LEN)?;
        let mut bits = BitReader::new(plaintext);
        let error = bits.read(8) as u8;
        let ttg = bits.read(16);
        Ok(Self {
            error,
            time_to_go: (ttg != 0xFFFF).then_some(ttg as u16),
            battery_voltage: scaled(bits.read(16), 0xFFFF, 0.01, 0.0),
            battery_current: scaled_signed(bits.read_signed(16), 0x7FFF, 0.1),
            io_status: bits.read(16) as u16,
            warnings: bits.read(18),
            state_of_charge: scaled(bits.read(10), 0x3FF, 0.1, 0.0),
            consumed_ah: scaled(bits.read(20), 0xFFFFF, 0.1, 0.0),
            temperature: scaled(bits.read(7), 0x7F, 1.0, -40.0),
        })
    }
}

/// Orion XS DC/DC charger readout.
#[derive(Debug, Clone, PartialEq)]
pub struct OrionXsRecord {
    pub device_state: u8,
    pub charger_error: u8,
    pub output_voltage: Option<f64>,
    pub output_current: Option<f64>,
    pub input_voltage: Option<f64>,
    pub input_current: Option<f64>,
    pub off_reason: u32,
}

impl OrionXsRecord {
    pub const LEN: usize = 14;

    pub fn parse(plaintext: &[u8]) -> Result<Self, DecodeError> {
        check_len(plaintext, Self::LEN)?;
        let mut bits = BitReader::new(plaintext);
        Ok(Self {
            device_state: bits.read(8) as u8,
            charger_error: bits.read(8) as u8,
            output_voltage: scaled(bits.read(16), 0x7FFF, 0.01, 0.0),
            output_current: scaled(bits.read(16), 0x7FFF, 0.01, 0.0),
            input_voltage: scaled(bits.read(16), 0xFFFF, 0.01, 0.0),
            input_current: scaled(bits.read(16), 0xFFFF, 0.01, 0.0),
            off_reason: bits.read(32),
        })
    }
}

/// Typed fields of one decrypted record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordFields {
    SolarCharger(SolarChargerRecord),
    DcDcConverter(DcDcConverterRecord),
    SmartLithium(SmartLithiumRecord),
    LynxSmartBms(LynxSmartBmsRecord),
    OrionXs(OrionXsRecord),
}

impl RecordFields {
    /// Decode `plaintext` with the layout selected by `record_type`.
    pub fn parse(record_type: RecordType, plaintext: &[u8]) -> Result<Self, DecodeError> {
        Ok(match record_type {
            RecordType::SolarCharger => Self::SolarCharger(SolarChargerRecord::parse(plaintext)?),
            RecordType::DcDcConverter => {
                Self::DcDcConverter(DcDcConverterRecord::parse(plaintext)?)
            }
            RecordType::SmartLithium => Self::SmartLithium(SmartLithiumRecord::parse(plaintext)?),
            RecordType::LynxSmartBms => Self::LynxSmartBms(LynxSmartBmsRecord::parse(plaintext)?),
            RecordType::OrionXs => Self::OrionXs(OrionXsRecord::parse(plaintext)?),
        })
    }

    pub fn record_type(&self) -> RecordType {
        match self {
            RecordFields::SolarCharger(_) => RecordType::SolarCharger,
            RecordFields::DcDcConverter(_) => RecordType::DcDcConverter,
            RecordFields::SmartLithium(_) => RecordType::SmartLithium,
            RecordFields::LynxSmartBms(_) => RecordType::LynxSmartBms,
            RecordFields::OrionXs(_) => RecordType::OrionXs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_reader_spans_bytes() {
        // 0b1_0110_0101 spread over two bytes, LSB first
        let bytes = [0b0110_0101, 0b0000_0001];
        let mut bits = BitReader::new(&bytes);
        assert_eq!(bits.read(4), 0b0101);
        assert_eq!(bits.read(5), 0b1_0110);
        assert_eq!(bits.position(), 9);
    }

    #[test]
    fn test_bit_reader_sign_extends() {
        let bytes = (-123i16).to_le_bytes();
        let mut bits = BitReader::new(&bytes);
        assert_eq!(bits.read_signed(16), -123);

        let mut bits = BitReader::new(&[0x7F]);
        assert_eq!(bits.read_signed(7), -1);
    }

    #[test]
    fn test_bit_writer_inverts_reader() {
        let mut writer = BitWriter::new();
        writer.write(7, 0x55).write(12, 0xABC).write_signed(16, -2);
        let bytes = writer.finish(6);
        assert_eq!(bytes.len(), 6);

        let mut bits = BitReader::new(&bytes);
        assert_eq!(bits.read(7), 0x55);
        assert_eq!(bits.read(12), 0xABC);
        assert_eq!(bits.read_signed(16), -2);
    }

    #[test]
    fn test_record_type_dispatch() {
        assert_eq!(RecordType::try_from(0x05), Ok(RecordType::SmartLithium));
        assert_eq!(RecordType::try_from(0x0F), Ok(RecordType::OrionXs));
        assert_eq!(
            RecordType::try_from(0xFF),
            Err(DecodeError::UnknownRecordType(0xFF))
        );
    }

    #[test]
    fn test_short_plaintext_rejected() {
        let result = SmartLithiumRecord::parse(&[0u8; 15]);
        assert_eq!(
            result,
            Err(DecodeError::TooShort {
                needed: 16,
                actual: 15
            })
        );
    }

    #[test]
    fn test_solar_charger_fields() {
        let mut writer = BitWriter::new();
        writer
            .write(8, 3) // bulk
            .write(8, 0)
            .write_signed(16, 1324)
            .write_signed(16, -15)
            .write(16, 123)
            .write(16, 250)
            .write(9, 0x1FF);
        let record = SolarChargerRecord::parse(&writer.finish(SolarChargerRecord::LEN)).unwrap();
        assert_eq!(record.device_state, 3);
        assert!((record.battery_voltage.unwrap() - 13.24).abs() < 1e-9);
        assert!((record.battery_current.unwrap() + 1.5).abs() < 1e-9);
        assert!((record.yield_today.unwrap() - 1.23).abs() < 1e-9);
        assert_eq!(record.pv_power, Some(250.0));
        assert_eq!(record.load_current, None);
    }

    #[test]
    fn test_lynx_layout_decodes() {
        let mut writer = BitWriter::new();
        writer
            .write(8, 0)
            .write(16, 0xFFFF)
            .write(16, 1310)
            .write_signed(16, -42)
            .write(16, 0)
            .write(18, 0)
            .write(10, 875)
            .write(20, 125)
            .write(7, 65);
        let record = LynxSmartBmsRecord::parse(&writer.finish(LynxSmartBmsRecord::LEN)).unwrap();
        assert_eq!(record.time_to_go, None);
        assert!((record.battery_voltage.unwrap() - 13.10).abs() < 1e-9);
        assert!((record.battery_current.unwrap() + 4.2).abs() < 1e-9);
        assert!((record.state_of_charge.unwrap() - 87.5).abs() < 1e-9);
        assert_eq!(record.temperature, Some(25.0));
    }
}
