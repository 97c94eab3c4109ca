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

// Configuration types for victron-ble-logger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggerConfig {
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub recorder: RecorderSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Encryption key file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeysConfig {
    #[serde(default = "default_key_file")]
    pub file: PathBuf,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            file: default_key_file(),
        }
    }
}

/// Where raw logs and archive caches live; either may be left out
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub log_directory: Option<PathBuf>,

    #[serde(default)]
    pub cache_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecorderSettings {
    /// How long log lines stay buffered before being appended
    #[serde(default = "default_log_flush_interval")]
    pub log_flush_interval_seconds: u64,

    /// A cache is rewritten once the archive is this much newer than the file
    #[serde(default = "default_cache_max_age")]
    pub cache_max_age_seconds: u64,

    #[serde(default = "default_key_reload_interval")]
    pub key_reload_interval_seconds: u64,

    #[serde(default = "default_queue_capacity")]
    pub flush_queue_capacity: usize,

    #[serde(default = "default_retries")]
    pub max_retries: u32,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            log_flush_interval_seconds: default_log_flush_interval(),
            cache_max_age_seconds: default_cache_max_age(),
            key_reload_interval_seconds: default_key_reload_interval(),
            flush_queue_capacity: default_queue_capacity(),
            max_retries: default_retries(),
        }
    }
}

impl RecorderSettings {
    pub fn log_flush_interval(&self) -> Duration {
        Duration::from_secs(self.log_flush_interval_seconds)
    }

    pub fn key_reload_interval(&self) -> Duration {
        Duration::from_secs(self.key_reload_interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String, // "text", "compact"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_key_file() -> PathBuf { PathBuf::from("victronencryptionkeys.txt") }
fn default_log_flush_interval() -> u64 { 60 }
fn default_cache_max_age() -> u64 { 3600 }
fn default_key_reload_interval() -> u64 { 60 }
fn default_queue_capacity() -> usize { 1024 }
fn default_retries() -> u32 { 3 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
