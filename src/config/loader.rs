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

// Configuration loader with environment variable substitution

use super::types::*;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}:]+)(?::-([^}]+))?\}").expect("env var pattern is valid")
});

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 2] = ["text", "compact"];

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<LoggerConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;
        Self::parse(&content)
    }

    /// Parse configuration text
    pub fn parse(content: &str) -> Result<LoggerConfig> {
        let content = Self::substitute_env_vars(content);

        let config: LoggerConfig =
            serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${VICTRON_LOG_DIR:-/var/log/victron} -> /var/log/victron (if unset)
    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default_value = caps.get(2).map(|m| m.as_str());

                match std::env::var(var_name) {
                    Ok(value) => value,
                    Err(_) => match default_value {
                        Some(default) => default.to_string(),
                        // Keep original if no default and var not found
                        None => format!("${{{}}}", var_name),
                    },
                }
            })
            .to_string()
    }

    /// Validate configuration
    pub fn validate(config: &LoggerConfig) -> Result<()> {
        if config.keys.file.as_os_str().is_empty() {
            bail!("keys.file cannot be empty");
        }

        let recorder = &config.recorder;
        if recorder.log_flush_interval_seconds == 0 {
            bail!("recorder.log_flush_interval_seconds must be > 0");
        }
        if recorder.cache_max_age_seconds == 0 {
            bail!("recorder.cache_max_age_seconds must be > 0");
        }
        if recorder.key_reload_interval_seconds == 0 {
            bail!("recorder.key_reload_interval_seconds must be > 0");
        }
        if recorder.flush_queue_capacity == 0 {
            bail!("recorder.flush_queue_capacity must be > 0");
        }

        let level = config.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            bail!(
                "Unknown logging.level '{}'. Supported: {}",
                config.logging.level,
                LOG_LEVELS.join(", ")
            );
        }
        if !LOG_FORMATS.contains(&config.logging.format.as_str()) {
            bail!(
                "Unknown logging.format '{}'. Supported: {}",
                config.logging.format,
                LOG_FORMATS.join(", ")
            );
        }

        Ok(())
    }
}
