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

// Manufacturer data decryption.
//
// The record following the 8-byte header is AES-128 in counter mode. The
// initial counter block is the two nonce bytes followed by fourteen zero
// bytes, incremented big-endian.

use aes::cipher::{KeyIvInit, StreamCipher};

use crate::address::DeviceAddress;
use crate::error::DecodeError;
use crate::keys::EncryptionKey;
use crate::protocol::{
    DecryptedPayload, DecryptedRecord, RawAdvertisement, HEADER_LEN, KEY_CHECK_INDEX,
    MAX_CIPHERTEXT_LEN, NONCE_INDEX, VICTRON_MANUFACTURER_ID,
};

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;

/// Stateless decoder for Victron instant readout advertisements.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManufacturerDataDecoder;

impl ManufacturerDataDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decrypt `raw` without interpreting the record.
    ///
    /// Returns the payload in its logged form and the nonce that was used.
    /// Unknown record types decrypt successfully so they can still be logged.
    pub fn decrypt(
        &self,
        raw: &RawAdvertisement,
        key: &EncryptionKey,
    ) -> Result<(DecryptedPayload, [u8; 2]), DecodeError> {
        if !raw.is_victron() {
            return Err(DecodeError::ForeignManufacturer(raw.manufacturer_id));
        }
        let data = raw.data.as_slice();
        if data.len() < HEADER_LEN {
            return Err(DecodeError::TooShort {
                needed: HEADER_LEN,
                actual: data.len(),
            });
        }

        // Only a quick check that the advertisement matches the stored key.
        let expected = key
            .first_byte()
            .ok_or_else(|| DecodeError::DecryptFailed("empty encryption key".to_string()))?;
        if data[KEY_CHECK_INDEX] != expected {
            return Err(DecodeError::KeyMismatch {
                expected,
                found: data[KEY_CHECK_INDEX],
            });
        }

        let ciphertext = &data[HEADER_LEN..];
        if ciphertext.len() > MAX_CIPHERTEXT_LEN {
            return Err(DecodeError::DecryptFailed(format!(
                "ciphertext of {} bytes exceeds {}",
                ciphertext.len(),
                MAX_CIPHERTEXT_LEN
            )));
        }

        let nonce = [data[NONCE_INDEX], data[NONCE_INDEX + 1]];
        let mut iv = [0u8; 16];
        iv[..2].copy_from_slice(&nonce);

        let mut cipher = Aes128Ctr::new_from_slices(key.as_bytes(), &iv)
            .map_err(|e| DecodeError::DecryptFailed(format!("invalid key: {}", e)))?;
        let mut plaintext = ciphertext.to_vec();
        cipher
            .try_apply_keystream(&mut plaintext)
            .map_err(|e| DecodeError::DecryptFailed(e.to_string()))?;

        Ok((DecryptedPayload::from_parts(data, &plaintext), nonce))
    }

    /// Decrypt and decode one advertisement from `address`.
    pub fn decode(
        &self,
        address: DeviceAddress,
        manufacturer_id: u16,
        data: &[u8],
        key: &EncryptionKey,
    ) -> Result<DecryptedRecord, DecodeError> {
        let raw = RawAdvertisement::new(manufacturer_id, data.to_vec());
        let (payload, nonce) = self.decrypt(&raw, key)?;
        let fields = payload.fields()?;
        Ok(DecryptedRecord {
            address,
            nonce,
            payload,
            fields,
        })
    }
}

/// Encrypt `plaintext` into advertisement form.
///
/// Counter mode is symmetric, so this is the inverse of
/// [`ManufacturerDataDecoder::decrypt`]. Used to build replay fixtures.
pub fn encrypt_record(
    header: [u8; HEADER_LEN],
    plaintext: &[u8],
    key: &EncryptionKey,
) -> Result<Vec<u8>, DecodeError> {
    let mut iv = [0u8; 16];
    iv[..2].copy_from_slice(&header[NONCE_INDEX..NONCE_INDEX + 2]);
    let mut cipher = Aes128Ctr::new_from_slices(key.as_bytes(), &iv)
        .map_err(|e| DecodeError::DecryptFailed(format!("invalid key: {}", e)))?;
    let mut body = plaintext.to_vec();
    cipher
        .try_apply_keystream(&mut body)
        .map_err(|e| DecodeError::DecryptFailed(e.to_string()))?;

    let mut data = header.to_vec();
    data.extend_from_slice(&body);
    Ok(data)
}
