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

// Storage backend trait for raw logs and archive caches

use anyhow::Result;
use async_trait::async_trait;

use crate::address::DeviceAddress;

/// A raw log file known to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLog {
    /// File name; logs replay in ascending name order
    pub name: String,
    pub address: DeviceAddress,
    /// Unix seconds
    pub modified: i64,
}

/// Storage for the two kinds of persistent state: append-only monthly raw
/// logs, and one archive cache per device.
///
/// Backends without a configured location for either kind accept writes and
/// drop them, and list nothing.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Initialize the backend (create directories if needed)
    async fn initialize(&self) -> Result<()>;

    /// Append lines to the device's log for the UTC month containing `time`
    async fn append_log_lines(
        &self,
        address: &DeviceAddress,
        time: i64,
        lines: &[String],
    ) -> Result<()>;

    /// Append with retry logic (optional, has default implementation)
    async fn append_with_retry(
        &self,
        address: &DeviceAddress,
        time: i64,
        lines: &[String],
        max_retries: u32,
    ) -> Result<()> {
        use tokio::time::{sleep, Duration};
        use tracing::{info, warn};

        let mut attempt = 0;
        let mut delay = Duration::from_millis(100);

        loop {
            match self.append_log_lines(address, time, lines).await {
                Ok(_) => {
                    if attempt > 0 {
                        info!("[{}] log append succeeded after {} retries", address, attempt);
                    }
                    return Ok(());
                }
                Err(e) if attempt < max_retries => {
                    warn!(
                        "[{}] log append failed (attempt {}/{}): {}. Retrying in {:?}",
                        address,
                        attempt + 1,
                        max_retries,
                        e,
                        delay
                    );
                    sleep(delay).await;
                    delay *= 2; // Exponential backoff
                    delay = delay.min(Duration::from_secs(5));
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        "[{}] log append failed after {} attempts: {}",
                        address,
                        max_retries,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Raw logs in replay order
    async fn list_logs(&self) -> Result<Vec<StoredLog>>;

    async fn read_log(&self, log: &StoredLog) -> Result<String>;

    /// Whether caches are persisted at all
    fn stores_caches(&self) -> bool;

    /// Modification time of the device's cache, `None` if there is none
    async fn cache_modified(&self, address: &DeviceAddress) -> Result<Option<i64>>;

    /// Replace the device's cache and stamp it with `modified`
    async fn write_cache(&self, address: &DeviceAddress, contents: &str, modified: i64)
        -> Result<()>;

    /// Contents of every cache, keyed by file name
    async fn load_caches(&self) -> Result<Vec<(String, String)>>;

    /// Health check
    async fn health_check(&self) -> Result<bool>;

    /// Get backend type identifier
    fn backend_type(&self) -> &str;
}
