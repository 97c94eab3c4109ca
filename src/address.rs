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

// Bluetooth device address used to key every per-device structure

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// 48-bit Bluetooth device address.
///
/// Bytes are stored in display order (most significant first), so the derived
/// ordering matches the numeric value of the address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DeviceAddress([u8; 6]);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid device address '{0}', expected XX:XX:XX:XX:XX:XX")]
pub struct AddressParseError(pub String);

impl DeviceAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }

    /// Address as a 48-bit integer.
    pub fn as_u64(&self) -> u64 {
        self.0.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
    }

    /// Twelve upper-case hex digits without separators, as used in file names.
    pub fn compact(&self) -> String {
        hex::encode_upper(self.0)
    }

    /// Parse the separator-free form produced by [`DeviceAddress::compact`].
    pub fn from_compact(s: &str) -> Result<Self, AddressParseError> {
        let decoded = hex::decode(s).map_err(|_| AddressParseError(s.to_string()))?;
        let bytes: [u8; 6] = decoded
            .try_into()
            .map_err(|_| AddressParseError(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for DeviceAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(|| AddressParseError(s.to_string()))?;
            if part.len() != 2 || !part.bytes().all(|c| c.is_ascii_hexdigit()) {
                return Err(AddressParseError(s.to_string()));
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| AddressParseError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(AddressParseError(s.to_string()));
        }
        Ok(Self(bytes))
    }
}
