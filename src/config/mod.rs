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

// Configuration module for victron-ble-logger
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Configuration validation
// - Default values

mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::*;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<LoggerConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
///
/// Without a file, defaults are used.
pub fn load_config_with_env<P: AsRef<Path>>(path: Option<P>) -> Result<LoggerConfig> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => LoggerConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Allow environment variables to override config values
pub fn apply_env_overrides(config: &mut LoggerConfig) {
    if let Ok(key_file) = std::env::var("VICTRON_KEY_FILE") {
        config.keys.file = PathBuf::from(key_file);
    }

    if let Ok(log_dir) = std::env::var("VICTRON_LOG_DIR") {
        config.storage.log_directory = Some(PathBuf::from(log_dir));
    }

    if let Ok(cache_dir) = std::env::var("VICTRON_CACHE_DIR") {
        config.storage.cache_directory = Some(PathBuf::from(cache_dir));
    }
}
