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

// Victron BLE instant readout logger
//
// This crate decodes the encrypted manufacturer data that Victron Energy
// devices broadcast over Bluetooth LE and keeps a multi-resolution history
// per device:
// - Decrypts AES-128-CTR payloads with per-device keys from a key file
// - Decodes solar charger, DC/DC converter, SmartLithium, Lynx Smart BMS and
//   Orion XS record layouts
// - Folds readings into day/week/month/year rolling archives
// - Appends raw decrypted records to monthly log files and persists
//   archives as text caches for fast restarts

pub mod address;
pub mod archive;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod decoder;
pub mod error;
pub mod keys;
pub mod layout;
pub mod logline;
pub mod protocol;
pub mod recorder;
pub mod sample;
pub mod storage;
pub mod transport;

// Re-export main types
pub use address::DeviceAddress;
pub use archive::{ArchiveRegistry, RollingArchive, TOTAL_SLOTS};
pub use buffer::{FlushTask, SampleSinkQueue};
pub use codec::ArchiveCodec;
pub use config::{load_config, load_config_with_env, LoggerConfig};
pub use decoder::ManufacturerDataDecoder;
pub use error::{ArchiveError, DecodeError, KeyStoreError};
pub use keys::{EncryptionKey, EncryptionKeyRegistry};
pub use layout::{RecordFields, RecordType};
pub use protocol::{DecryptedPayload, DecryptedRecord, RawAdvertisement, VICTRON_MANUFACTURER_ID};
pub use recorder::{Recorder, RestoreSummary};
pub use sample::{Aggregate, DeviceSample, Granularity, SampleKind};
pub use storage::{FilesystemBackend, StorageBackend};
pub use transport::{AdvertisementEvent, AdvertisementSource, DeviceEvent, LineSource};
