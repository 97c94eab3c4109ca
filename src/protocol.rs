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

// Victron "instant readout" advertisement framing.
//
// Manufacturer data layout (after the 16-bit manufacturer ID):
//
// ```text
// [0]     record prefix, always 0x10
// [1..3]  model id
// [3]     readout type
// [4]     record type (see `RecordType`)
// [5..7]  nonce / data counter, low bytes of the AES-CTR IV
// [7]     first byte of the device encryption key
// [8..]   AES-128-CTR encrypted record
// ```

use std::fmt;

use crate::address::DeviceAddress;
use crate::error::DecodeError;
use crate::layout::{RecordFields, RecordType};
use crate::sample::DeviceSample;

/// Bluetooth SIG company identifier of Victron Energy BV.
pub const VICTRON_MANUFACTURER_ID: u16 = 0x02E1;

pub const HEADER_LEN: usize = 8;
pub const RECORD_TYPE_INDEX: usize = 4;
pub const NONCE_INDEX: usize = 5;
pub const KEY_CHECK_INDEX: usize = 7;

/// Largest encrypted record accepted.
pub const MAX_CIPHERTEXT_LEN: usize = 32;

/// Raw manufacturer data as received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAdvertisement {
    pub manufacturer_id: u16,
    pub data: Vec<u8>,
}

impl RawAdvertisement {
    pub fn new(manufacturer_id: u16, data: Vec<u8>) -> Self {
        Self {
            manufacturer_id,
            data,
        }
    }

    pub fn is_victron(&self) -> bool {
        self.manufacturer_id == VICTRON_MANUFACTURER_ID
    }

    pub fn record_type_byte(&self) -> Option<u8> {
        self.data.get(RECORD_TYPE_INDEX).copied()
    }

    pub fn nonce(&self) -> Option<[u8; 2]> {
        Some([*self.data.get(NONCE_INDEX)?, *self.data.get(NONCE_INDEX + 1)?])
    }

    pub fn key_check(&self) -> Option<u8> {
        self.data.get(KEY_CHECK_INDEX).copied()
    }
}

impl fmt::Display for RawAdvertisement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{}", self.manufacturer_id, hex::encode(&self.data))
    }
}

/// Advertisement bytes after decryption.
///
/// The header is kept, the nonce and key-check bytes (5..8) are zeroed to mark
/// the record as decoded, and the ciphertext is replaced by the plaintext.
/// This is the form written to the raw logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedPayload {
    bytes: Vec<u8>,
}

impl DecryptedPayload {
    pub(crate) fn from_parts(header: &[u8], plaintext: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(HEADER_LEN + plaintext.len());
        bytes.extend_from_slice(&header[..HEADER_LEN]);
        bytes[NONCE_INDEX..HEADER_LEN].fill(0);
        bytes.extend_from_slice(plaintext);
        Self { bytes }
    }

    /// Accept bytes read back from a raw log line.
    pub fn from_logged(bytes: Vec<u8>) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::TooShort {
                needed: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        if bytes[NONCE_INDEX..HEADER_LEN].iter().any(|b| *b != 0) {
            return Err(DecodeError::NotDecrypted);
        }
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn plaintext(&self) -> &[u8] {
        &self.bytes[HEADER_LEN..]
    }

    pub fn record_type_byte(&self) -> u8 {
        self.bytes[RECORD_TYPE_INDEX]
    }

    pub fn record_type(&self) -> Result<RecordType, DecodeError> {
        RecordType::try_from(self.record_type_byte())
    }

    /// Decode the plaintext with the layout the record type selects.
    pub fn fields(&self) -> Result<RecordFields, DecodeError> {
        RecordFields::parse(self.record_type()?, self.plaintext())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

/// A decrypted advertisement together with its decoded fields.
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptedRecord {
    pub address: DeviceAddress,
    pub nonce: [u8; 2],
    pub payload: DecryptedPayload,
    pub fields: RecordFields,
}

impl DecryptedRecord {
    pub fn record_type(&self) -> RecordType {
        self.fields.record_type()
    }

    /// Convert to an archivable sample stamped with `time` (unix seconds).
    ///
    /// Returns `None` for record types that are decoded but not archived.
    pub fn to_sample(&self, time: i64) -> Option<DeviceSample> {
        DeviceSample::from_fields(&self.fields, time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_advertisement_accessors() {
        let data = hex::decode("1000eba00535a2d92d331d1ab2f30574993493ead132be09").unwrap();
        let raw = RawAdvertisement::new(VICTRON_MANUFACTURER_ID, data);
        assert!(raw.is_victron());
        assert_eq!(raw.record_type_byte(), Some(0x05));
        assert_eq!(raw.nonce(), Some([0x35, 0xA2]));
        assert_eq!(raw.key_check(), Some(0xD9));
        assert!(raw.to_string().starts_with("02e1:1000eba005"));
    }

    #[test]
    fn test_payload_zeroes_marker_bytes() {
        let header = [0x10, 0x00, 0xEB, 0xA0, 0x05, 0x35, 0xA2, 0xD9];
        let payload = DecryptedPayload::from_parts(&header, &[1, 2, 3]);
        assert_eq!(payload.as_bytes(), &[0x10, 0x00, 0xEB, 0xA0, 0x05, 0, 0, 0, 1, 2, 3]);
        assert_eq!(payload.plaintext(), &[1, 2, 3]);
        assert_eq!(payload.to_hex(), "1000eba005000000010203");
    }

    #[test]
    fn test_from_logged_requires_marker() {
        let encrypted = vec![0x10, 0x00, 0xEB, 0xA0, 0x05, 0x35, 0xA2, 0xD9, 0xFF];
        assert_eq!(
            DecryptedPayload::from_logged(encrypted),
            Err(DecodeError::NotDecrypted)
        );
        assert!(matches!(
            DecryptedPayload::from_logged(vec![0x10, 0x00]),
            Err(DecodeError::TooShort { .. })
        ));
    }
}
