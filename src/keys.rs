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

// Per-device encryption keys loaded from a line-oriented key file
//
// Each line holds a colon separated address followed by whitespace and the
// hex encoded key, e.g. `CE:A5:D7:7B:CD:81 d9b3...`. Lines without an
// address are ignored. The registry re-reads the file only when its
// modification time moves forward, and swaps in the complete new key set so
// readers never observe a partial reload.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, PoisonError, RwLock};
use std::time::SystemTime;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::address::DeviceAddress;
use crate::error::KeyStoreError;

static KEY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"((?:[[:xdigit:]]{2}:){5}[[:xdigit:]]{2})[ \t]+([[:xdigit:]]+)")
        .expect("key line pattern is valid")
});

/// Symmetric key for one device. `Debug` never prints key material.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey(Vec<u8>);

impl EncryptionKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(s.trim()).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn first_byte(&self) -> Option<u8> {
        self.0.first().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey({} bytes)", self.0.len())
    }
}

pub type KeySet = HashMap<DeviceAddress, EncryptionKey>;

/// Parse the contents of a key file. Malformed keys are skipped.
pub fn parse_key_file(content: &str) -> KeySet {
    let mut keys = KeySet::new();
    for line in content.lines() {
        if line.trim_start().starts_with('#') {
            continue;
        }
        let Some(caps) = KEY_LINE.captures(line) else {
            continue;
        };
        let Ok(address) = caps[1].parse::<DeviceAddress>() else {
            continue;
        };
        match EncryptionKey::from_hex(&caps[2]) {
            Ok(key) => {
                debug!("[{}] key of {} bytes", address, key.len());
                keys.insert(address, key);
            }
            Err(e) => warn!("[{}] ignoring malformed key: {}", address, e),
        }
    }
    keys
}

/// Process-wide address to key mapping.
pub struct EncryptionKeyRegistry {
    path: PathBuf,
    keys: RwLock<Arc<KeySet>>,
    last_modified: Mutex<Option<SystemTime>>,
}

impl EncryptionKeyRegistry {
    /// Registry backed by `path`. Nothing is read until [`Self::reload_if_changed`].
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            keys: RwLock::new(Arc::new(KeySet::new())),
            last_modified: Mutex::new(None),
        }
    }

    /// Registry holding a fixed key set, with no backing file.
    pub fn from_keys(keys: KeySet) -> Self {
        Self {
            path: PathBuf::new(),
            keys: RwLock::new(Arc::new(keys)),
            last_modified: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the key file if its modification time is newer than the last
    /// successful read. Returns whether a new key set was installed.
    pub fn reload_if_changed(&self) -> Result<bool, KeyStoreError> {
        let io_error = |source| KeyStoreError::Io {
            path: self.path.clone(),
            source,
        };
        let modified = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map_err(io_error)?;

        let mut last = self
            .last_modified
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if last.is_some_and(|seen| modified <= seen) {
            return Ok(false);
        }

        info!("Reading: {}", self.path.display());
        let content = std::fs::read_to_string(&self.path).map_err(io_error)?;
        let keys = parse_key_file(&content);
        info!("Loaded {} encryption keys", keys.len());
        self.replace(keys);
        *last = Some(modified);
        Ok(true)
    }

    /// Install a complete key set.
    pub fn replace(&self, keys: KeySet) {
        *self.keys.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(keys);
    }

    /// Current key set; stays consistent even if a reload happens meanwhile.
    pub fn snapshot(&self) -> Arc<KeySet> {
        Arc::clone(&self.keys.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn lookup(&self, address: &DeviceAddress) -> Option<EncryptionKey> {
        self.snapshot().get(address).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Fail with [`KeyStoreError::Empty`] when no keys are known.
    pub fn require_keys(&self) -> Result<(), KeyStoreError> {
        if self.is_empty() {
            return Err(KeyStoreError::Empty(self.path.clone()));
        }
        Ok(())
    }
}
