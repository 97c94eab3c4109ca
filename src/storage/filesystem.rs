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

// Filesystem backend implementation
//
//   <log_directory>/victron-CEA5D77BCD81-2024-01.txt
//   <cache_directory>/victron-CEA5D77BCD81-cache.txt

use super::backend::{StorageBackend, StoredLog};
use crate::address::DeviceAddress;
use crate::config::StorageConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use regex::Regex;
use std::fs::FileTimes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

static LOG_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^victron-([[:xdigit:]]{12})-[[:digit:]]{4}-[[:digit:]]{2}\.txt$")
        .expect("log file pattern is valid")
});

static CACHE_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^victron-([[:xdigit:]]{12})-cache\.txt$").expect("cache file pattern is valid")
});

/// Monthly log file name for `address` at `time` (UTC).
pub fn log_file_name(address: &DeviceAddress, time: i64) -> String {
    match DateTime::from_timestamp(time, 0) {
        Some(t) => format!("victron-{}-{}.txt", address.compact(), t.format("%Y-%m")),
        None => format!("victron-{}.txt", address.compact()),
    }
}

pub fn cache_file_name(address: &DeviceAddress) -> String {
    format!("victron-{}-cache.txt", address.compact())
}

fn address_in(pattern: &Regex, name: &str) -> Option<DeviceAddress> {
    let caps = pattern.captures(name)?;
    DeviceAddress::from_compact(&caps[1]).ok()
}

fn to_unix(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

fn from_unix(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

async fn modified_time(path: &Path) -> Result<Option<i64>> {
    match fs::metadata(path).await {
        Ok(metadata) => {
            let modified = metadata
                .modified()
                .with_context(|| format!("No modification time for {}", path.display()))?;
            Ok(Some(to_unix(modified)))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to stat {}", path.display())),
    }
}

/// Filesystem backend writing plain text logs and caches
pub struct FilesystemBackend {
    log_directory: Option<PathBuf>,
    cache_directory: Option<PathBuf>,
}

impl FilesystemBackend {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            log_directory: config.log_directory.clone(),
            cache_directory: config.cache_directory.clone(),
        }
    }

    pub fn log_directory(&self) -> Option<&Path> {
        self.log_directory.as_deref()
    }

    pub fn cache_directory(&self) -> Option<&Path> {
        self.cache_directory.as_deref()
    }

    /// Ensure directory exists
    async fn ensure_directory(path: &Path) -> Result<()> {
        if !path.exists() {
            info!("Creating directory: {}", path.display());
            fs::create_dir_all(path)
                .await
                .with_context(|| format!("Failed to create directory {}", path.display()))?;
        }
        Ok(())
    }

    /// File names in `dir` matching `pattern`, sorted
    async fn matching_files(dir: &Path, pattern: &Regex) -> Result<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to read directory {}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !pattern.is_match(&name) {
                continue;
            }
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                files.push((name, entry.path()));
            }
        }
        files.sort();
        Ok(files)
    }

    async fn check_writable(dir: &Path) -> bool {
        match fs::metadata(dir).await {
            Ok(metadata) if metadata.is_dir() => {
                let test_file = dir.join(".health_check_test");
                match fs::File::create(&test_file).await {
                    Ok(mut f) => {
                        if let Err(e) = f.write_all(b"test").await {
                            warn!("Health check failed - cannot write: {}", e);
                            return false;
                        }
                        let _ = fs::remove_file(&test_file).await;
                        true
                    }
                    Err(e) => {
                        warn!("Health check failed - cannot create file: {}", e);
                        false
                    }
                }
            }
            Ok(_) => {
                warn!(
                    "Health check failed - not a directory: {}",
                    dir.display()
                );
                false
            }
            Err(e) => {
                warn!(
                    "Health check failed - cannot access {}: {}",
                    dir.display(),
                    e
                );
                false
            }
        }
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn initialize(&self) -> Result<()> {
        for dir in [&self.log_directory, &self.cache_directory].into_iter().flatten() {
            Self::ensure_directory(dir).await?;
        }
        Ok(())
    }

    async fn append_log_lines(
        &self,
        address: &DeviceAddress,
        time: i64,
        lines: &[String],
    ) -> Result<()> {
        let Some(dir) = &self.log_directory else {
            debug!("[{}] no log directory, discarding {} lines", address, lines.len());
            return Ok(());
        };
        if lines.is_empty() {
            return Ok(());
        }

        let path = dir.join(log_file_name(address, time));
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open log file {}", path.display()))?;

        let mut buf = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in lines {
            buf.push_str(line);
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())
            .await
            .context("Failed to write log lines")?;
        file.flush().await.context("Failed to flush log file")?;

        debug!("Appended {} lines to {}", lines.len(), path.display());
        Ok(())
    }

    async fn list_logs(&self) -> Result<Vec<StoredLog>> {
        let Some(dir) = &self.log_directory else {
            return Ok(Vec::new());
        };
        let mut logs = Vec::new();
        for (name, path) in Self::matching_files(dir, &LOG_FILE).await? {
            let Some(address) = address_in(&LOG_FILE, &name) else {
                continue;
            };
            let modified = modified_time(&path).await?.unwrap_or(0);
            logs.push(StoredLog {
                name,
                address,
                modified,
            });
        }
        Ok(logs)
    }

    async fn read_log(&self, log: &StoredLog) -> Result<String> {
        let dir = self
            .log_directory
            .as_ref()
            .context("No log directory configured")?;
        let path = dir.join(&log.name);
        info!("Reading: {}", path.display());
        // Logs may contain NUL padding after a crash, so read bytes and convert lossily.
        let bytes = fs::read(&path)
            .await
            .with_context(|| format!("Failed to read log file {}", path.display()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn stores_caches(&self) -> bool {
        self.cache_directory.is_some()
    }

    async fn cache_modified(&self, address: &DeviceAddress) -> Result<Option<i64>> {
        match &self.cache_directory {
            Some(dir) => modified_time(&dir.join(cache_file_name(address))).await,
            None => Ok(None),
        }
    }

    async fn write_cache(
        &self,
        address: &DeviceAddress,
        contents: &str,
        modified: i64,
    ) -> Result<()> {
        let Some(dir) = &self.cache_directory else {
            return Ok(());
        };
        let path = dir.join(cache_file_name(address));
        let tmp_path = path.with_extension("txt.tmp");
        info!("Writing: {}", path.display());

        let mut file = fs::File::create(&tmp_path)
            .await
            .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
        file.write_all(contents.as_bytes())
            .await
            .context("Failed to write cache")?;
        file.flush().await.context("Failed to flush cache")?;

        let stamp = from_unix(modified);
        let file = file.into_std().await;
        file.set_times(FileTimes::new().set_accessed(stamp).set_modified(stamp))
            .with_context(|| format!("Failed to set times on {}", tmp_path.display()))?;
        drop(file);

        fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    async fn load_caches(&self) -> Result<Vec<(String, String)>> {
        let Some(dir) = &self.cache_directory else {
            return Ok(Vec::new());
        };
        let mut caches = Vec::new();
        for (name, path) in Self::matching_files(dir, &CACHE_FILE).await? {
            info!("Reading: {}", path.display());
            match fs::read_to_string(&path).await {
                Ok(contents) => caches.push((name, contents)),
                Err(e) => warn!("Skipping unreadable cache {}: {}", path.display(), e),
            }
        }
        Ok(caches)
    }

    async fn health_check(&self) -> Result<bool> {
        for dir in [&self.log_directory, &self.cache_directory].into_iter().flatten() {
            if !Self::check_writable(dir).await {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn backend_type(&self) -> &str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // 2024-01-01T00:00:00Z
    const MIDNIGHT: i64 = 1_704_067_200;

    fn address() -> DeviceAddress {
        "CE:A5:D7:7B:CD:81".parse().unwrap()
    }

    fn create_test_backend() -> (FilesystemBackend, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            log_directory: Some(temp_dir.path().join("logs")),
            cache_directory: Some(temp_dir.path().join("cache")),
        };
        (FilesystemBackend::new(&config), temp_dir)
    }

    #[test]
    fn test_file_names() {
        assert_eq!(
            log_file_name(&address(), MIDNIGHT),
            "victron-CEA5D77BCD81-2024-01.txt"
        );
        assert_eq!(cache_file_name(&address()), "victron-CEA5D77BCD81-cache.txt");
        assert_eq!(
            address_in(&LOG_FILE, "victron-CEA5D77BCD81-2024-01.txt"),
            Some(address())
        );
        assert_eq!(address_in(&LOG_FILE, "victron-CEA5D77BCD81-cache.txt"), None);
    }

    #[tokio::test]
    async fn test_initialize() {
        let (backend, _temp_dir) = create_test_backend();
        backend.initialize().await.unwrap();
        assert!(backend.log_directory().unwrap().exists());
        assert!(backend.cache_directory().unwrap().exists());
        assert!(backend.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_append_and_list_logs() {
        let (backend, _temp_dir) = create_test_backend();
        backend.initialize().await.unwrap();

        let lines = vec!["one".to_string(), "two".to_string()];
        backend.append_log_lines(&address(), MIDNIGHT, &lines).await.unwrap();
        backend
            .append_log_lines(&address(), MIDNIGHT, &["three".to_string()])
            .await
            .unwrap();
        // previous month
        backend
            .append_log_lines(&address(), MIDNIGHT - 10, &["zero".to_string()])
            .await
            .unwrap();

        let logs = backend.list_logs().await.unwrap();
        let names: Vec<&str> = logs.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "victron-CEA5D77BCD81-2023-12.txt",
                "victron-CEA5D77BCD81-2024-01.txt"
            ]
        );
        assert_eq!(
            backend.read_log(&logs[1]).await.unwrap(),
            "one\ntwo\nthree\n"
        );
    }

    #[tokio::test]
    async fn test_cache_write_sets_modified_time() {
        let (backend, _temp_dir) = create_test_backend();
        backend.initialize().await.unwrap();

        assert_eq!(backend.cache_modified(&address()).await.unwrap(), None);
        backend
            .write_cache(&address(), "Cache: test\n", MIDNIGHT)
            .await
            .unwrap();
        assert_eq!(
            backend.cache_modified(&address()).await.unwrap(),
            Some(MIDNIGHT)
        );

        let caches = backend.load_caches().await.unwrap();
        assert_eq!(
            caches,
            vec![(
                "victron-CEA5D77BCD81-cache.txt".to_string(),
                "Cache: test\n".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_unconfigured_directories_discard() {
        let backend = FilesystemBackend::new(&StorageConfig::default());
        backend.initialize().await.unwrap();
        backend
            .append_log_lines(&address(), MIDNIGHT, &["x".to_string()])
            .await
            .unwrap();
        assert!(backend.list_logs().await.unwrap().is_empty());
        assert!(!backend.stores_caches());
        assert!(backend.load_caches().await.unwrap().is_empty());
    }
}
