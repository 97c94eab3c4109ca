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

// Error types for the decode, archive and key-store layers
//
// Decode errors are per-advertisement and never fatal: the pipeline drops the
// advertisement and carries on with the next event. Archive errors cause an
// on-disk cache to be discarded and rebuilt from the raw logs. An empty key
// store is fatal at startup.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("payload too short: need {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },

    #[error("key mismatch: advertisement key byte {found:#04x}, stored key starts with {expected:#04x}")]
    KeyMismatch { expected: u8, found: u8 },

    #[error("decryption failed: {0}")]
    DecryptFailed(String),

    #[error("unknown record type {0:#04x}")]
    UnknownRecordType(u8),

    #[error("manufacturer {0:#06x} is not Victron Energy")]
    ForeignManufacturer(u16),

    /// A logged record that does not carry the zeroed decoded marker.
    #[error("record is not decrypted")]
    NotDecrypted,
}

impl DecodeError {
    /// Whether this failure is the expected "unknown device type" case
    /// rather than a damaged or undecryptable advertisement.
    pub fn is_unknown_record(&self) -> bool {
        matches!(self, DecodeError::UnknownRecordType(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArchiveError {
    /// Corresponds to a stale or truncated cache; it must be discarded, never partially loaded.
    #[error("archive size mismatch: expected {expected} rows, found {found}")]
    SizeMismatch { expected: usize, found: usize },

    #[error("cache is missing its header line")]
    MissingHeader,

    #[error("malformed cache header: {0}")]
    MalformedHeader(String),

    #[error("unknown sample kind '{0}'")]
    UnknownSampleKind(String),

    #[error("malformed row {row}: {reason}")]
    MalformedRow { row: usize, reason: String },
}

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("no Victron encryption keys found in {}", .0.display())]
    Empty(PathBuf),

    #[error("failed to read key file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
