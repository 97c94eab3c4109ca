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

// Advertisement recorder
//
// Per advertisement: key lookup, decrypt, queue the raw log line, decode,
// insert into the device archive. Around that: restoring archives at
// startup, periodic log and cache flushes, and key file reloads.

use anyhow::Result;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use crate::address::DeviceAddress;
use crate::archive::ArchiveRegistry;
use crate::buffer::SampleSinkQueue;
use crate::codec::ArchiveCodec;
use crate::config::RecorderSettings;
use crate::decoder::ManufacturerDataDecoder;
use crate::keys::EncryptionKeyRegistry;
use crate::logline::{format_log_line, format_timestamp, parse_log_line};
use crate::protocol::{DecryptedRecord, RawAdvertisement};
use crate::sample::{DeviceSample, Granularity};
use crate::storage::StorageBackend;
use crate::transport::{AdvertisementEvent, DeviceEvent};

/// Readings stamped further ahead of the local clock are rejected; one would
/// otherwise hold the archive in the future and hide every later sample.
pub const MAX_FUTURE_SKEW_SECONDS: i64 = 24 * 3600;

fn is_plausible(time: i64, now: i64) -> bool {
    time <= now.saturating_add(MAX_FUTURE_SKEW_SECONDS)
}

/// What a restore pass found on storage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub caches_loaded: usize,
    pub caches_discarded: usize,
    pub logs_replayed: usize,
    pub logs_skipped: usize,
    pub samples_replayed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    /// Advertisements turned into archived samples
    pub decoded: u64,
    /// Advertisements that failed to decrypt or decode, or were stamped
    /// implausibly far ahead
    pub dropped: u64,
}

pub struct Recorder {
    settings: RecorderSettings,
    decoder: ManufacturerDataDecoder,
    keys: Arc<EncryptionKeyRegistry>,
    archives: ArchiveRegistry,
    sink: SampleSinkQueue,
    storage: Arc<dyn StorageBackend>,
    names: DashMap<DeviceAddress, String>,
    decoded: AtomicU64,
    dropped: AtomicU64,
}

impl Recorder {
    pub fn new(
        settings: RecorderSettings,
        keys: Arc<EncryptionKeyRegistry>,
        storage: Arc<dyn StorageBackend>,
    ) -> Self {
        let sink = SampleSinkQueue::new(
            settings.flush_queue_capacity,
            settings.log_flush_interval(),
        );
        Self {
            settings,
            decoder: ManufacturerDataDecoder::new(),
            keys,
            archives: ArchiveRegistry::new(),
            sink,
            storage,
            names: DashMap::new(),
            decoded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn archives(&self) -> &ArchiveRegistry {
        &self.archives
    }

    pub fn query(&self, address: &DeviceAddress, granularity: Granularity) -> Vec<DeviceSample> {
        self.archives.query(address, granularity)
    }

    pub fn device_name(&self, address: &DeviceAddress) -> Option<String> {
        self.names.get(address).map(|n| n.clone())
    }

    pub fn stats(&self) -> RecorderStats {
        RecorderStats {
            decoded: self.decoded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn label(&self, address: &DeviceAddress) -> String {
        match self.names.get(address) {
            Some(name) => format!("{} {}", address, name.as_str()),
            None => address.to_string(),
        }
    }

    /// Process one transport event. Returns the archived sample, if any.
    pub async fn handle_event(&self, event: AdvertisementEvent) -> Option<DeviceSample> {
        let time = event
            .time
            .unwrap_or_else(|| chrono::Utc::now().timestamp());
        match event.event {
            DeviceEvent::Name { address, name } => {
                let previous = self.names.insert(address, name.clone());
                if previous.as_deref() != Some(name.as_str()) {
                    debug!("[{}] name: {}", address, name);
                }
                None
            }
            DeviceEvent::ManufacturerData {
                address,
                advertisement,
            } => self.handle_advertisement(address, &advertisement, time).await,
        }
    }

    async fn handle_advertisement(
        &self,
        address: DeviceAddress,
        advertisement: &RawAdvertisement,
        time: i64,
    ) -> Option<DeviceSample> {
        if !advertisement.is_victron() {
            trace!("[{}] ignoring manufacturer {:04x}", address, advertisement.manufacturer_id);
            return None;
        }
        if !is_plausible(time, chrono::Utc::now().timestamp()) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("[{}] dropped advertisement stamped in the future: {}", address, time);
            return None;
        }
        let Some(key) = self.keys.lookup(&address) else {
            trace!("[{}] no encryption key", address);
            return None;
        };

        let (payload, nonce) = match self.decoder.decrypt(advertisement, &key) {
            Ok(decrypted) => decrypted,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("[{}] dropped advertisement: {}", address, e);
                return None;
            }
        };

        // Logged before decoding so unknown record types are kept raw.
        self.sink.push(address, format_log_line(time, &payload)).await;

        let fields = match payload.fields() {
            Ok(fields) => fields,
            Err(e) if e.is_unknown_record() => {
                debug!("[{}] {}", address, e);
                return None;
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("[{}] undecodable record: {}", address, e);
                return None;
            }
        };

        let record = DecryptedRecord {
            address,
            nonce,
            payload,
            fields,
        };
        let Some(sample) = record.to_sample(time) else {
            debug!("[{}] {} record decoded, not archived", address, record.record_type());
            return None;
        };

        self.decoded.fetch_add(1, Ordering::Relaxed);
        info!("[{}] [{}] {}", format_timestamp(time), self.label(&address), sample);
        if self.archives.insert(address, sample.clone()) {
            Some(sample)
        } else {
            None
        }
    }

    /// Rebuild archives from caches, then replay newer raw logs, then
    /// refresh the caches.
    pub async fn restore(&self) -> Result<RestoreSummary> {
        let mut summary = RestoreSummary::default();

        for (name, contents) in self.storage.load_caches().await? {
            match ArchiveCodec::deserialize(&contents) {
                Ok((address, archive)) => {
                    debug!("[{}] restored archive from {}", address, name);
                    self.archives.restore(address, archive);
                    summary.caches_loaded += 1;
                }
                Err(e) => {
                    warn!("Discarding cache {}: {}", name, e);
                    summary.caches_discarded += 1;
                }
            }
        }

        for log in self.storage.list_logs().await? {
            if let Some(latest) = self.archives.latest_time(&log.address) {
                if log.modified < latest {
                    debug!("Skipping {}: older than archive", log.name);
                    summary.logs_skipped += 1;
                    continue;
                }
            }
            let contents = match self.storage.read_log(&log).await {
                Ok(contents) => contents,
                Err(e) => {
                    warn!("Skipping {}: {:#}", log.name, e);
                    continue;
                }
            };
            summary.samples_replayed += self.replay_log(log.address, &contents);
            summary.logs_replayed += 1;
        }

        self.flush_caches().await?;
        info!(
            "Restored {} archives ({} caches, {} logs replayed, {} skipped)",
            self.archives.len(),
            summary.caches_loaded,
            summary.logs_replayed,
            summary.logs_skipped
        );
        Ok(summary)
    }

    /// Insert every decodable line of a raw log, in sorted line order.
    /// Returns the number of samples inserted.
    pub fn replay_log(&self, address: DeviceAddress, contents: &str) -> usize {
        let mut lines: Vec<&str> = contents.lines().collect();
        lines.sort_unstable();

        let now = chrono::Utc::now().timestamp();
        let mut inserted = 0;
        for line in lines {
            let Some(entry) = parse_log_line(line) else {
                continue;
            };
            if !is_plausible(entry.time, now) {
                warn!("[{}] skipping log line stamped in the future: {}", address, entry.time);
                continue;
            }
            let Ok(fields) = entry.payload.fields() else {
                continue;
            };
            let Some(sample) = DeviceSample::from_fields(&fields, entry.time) else {
                continue;
            };
            if self.archives.insert(address, sample) {
                inserted += 1;
            }
        }
        inserted
    }

    /// Write all buffered log lines to storage. Returns the number of lines written.
    pub async fn flush_logs(&self) -> usize {
        self.sink.flush_all().await;

        let mut written = 0;
        for task in self.sink.drain() {
            match self
                .storage
                .append_with_retry(
                    &task.address,
                    task.created_at,
                    &task.lines,
                    self.settings.max_retries,
                )
                .await
            {
                Ok(()) => written += task.lines.len(),
                Err(e) => error!(
                    "[{}] lost {} log lines: {:#}",
                    task.address,
                    task.lines.len(),
                    e
                ),
            }
        }
        written
    }

    /// Rewrite caches that are older than the configured age. Returns the
    /// number of caches written.
    pub async fn flush_caches(&self) -> Result<usize> {
        if !self.storage.stores_caches() {
            return Ok(0);
        }

        let max_age = self.settings.cache_max_age_seconds as i64;
        let mut written = 0;
        for address in self.archives.addresses() {
            let Some(archive) = self.archives.snapshot(&address) else {
                continue;
            };
            let latest = archive.latest_time();
            let modified = self.storage.cache_modified(&address).await?.unwrap_or(0);
            if latest.saturating_sub(modified) <= max_age {
                continue;
            }

            let contents = ArchiveCodec::serialize(&address, &archive);
            match self.storage.write_cache(&address, &contents, latest).await {
                Ok(()) => written += 1,
                Err(e) => error!("[{}] cache write failed: {:#}", address, e),
            }
        }
        Ok(written)
    }

    /// Re-read the key file if it changed. Returns whether keys were replaced.
    pub fn reload_keys(&self) -> bool {
        match self.keys.reload_if_changed() {
            Ok(changed) => changed,
            Err(e) => {
                warn!("Key file reload failed: {}", e);
                false
            }
        }
    }

    /// Flush everything still in memory
    pub async fn shutdown(&self) -> Result<()> {
        let lines = self.flush_logs().await;
        let caches = self.flush_caches().await?;
        let stats = self.stats();
        info!(
            "Flushed {} log lines and {} caches; {} decoded, {} dropped",
            lines, caches, stats.decoded, stats.dropped
        );
        Ok(())
    }
}
