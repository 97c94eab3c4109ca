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

use crossbeam::queue::ArrayQueue;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::address::DeviceAddress;

/// Log lines of one device ready to be appended to storage
#[derive(Debug, Clone)]
pub struct FlushTask {
    pub address: DeviceAddress,
    pub lines: Vec<String>,
    /// Unix seconds when the lines left the buffer; selects the monthly log file
    pub created_at: i64,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Double-buffered line buffer for a single device
pub struct DeviceLogBuffer {
    address: DeviceAddress,

    // Double buffer
    front_buffer: RwLock<Vec<String>>,
    back_buffer: RwLock<Vec<String>>,
    active_is_front: AtomicBool, // true = front is active, false = back is active

    max_buffer_duration: Duration,
    last_flush_time: AtomicI64,

    // Statistics
    total_lines: AtomicUsize,
    total_bytes: AtomicUsize,

    flush_queue: Arc<ArrayQueue<FlushTask>>,
}

impl DeviceLogBuffer {
    pub fn new(
        address: DeviceAddress,
        max_buffer_duration: Duration,
        flush_queue: Arc<ArrayQueue<FlushTask>>,
    ) -> Self {
        Self {
            address,
            front_buffer: RwLock::new(Vec::new()),
            back_buffer: RwLock::new(Vec::new()),
            active_is_front: AtomicBool::new(true),
            max_buffer_duration,
            last_flush_time: AtomicI64::new(now()),
            total_lines: AtomicUsize::new(0),
            total_bytes: AtomicUsize::new(0),
            flush_queue,
        }
    }

    /// Append a line to the active buffer
    pub async fn push_line(&self, line: String) {
        let active_is_front = self.active_is_front.load(Ordering::Acquire);
        let buffer = if active_is_front {
            &self.front_buffer
        } else {
            &self.back_buffer
        };

        let line_size = line.len();
        buffer.write().await.push(line);

        self.total_lines.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(line_size, Ordering::Relaxed);

        if self.should_flush() {
            self.trigger_flush().await;
        }
    }

    fn should_flush(&self) -> bool {
        let elapsed = now() - self.last_flush_time.load(Ordering::Relaxed);
        if elapsed >= self.max_buffer_duration.as_secs() as i64 {
            debug!(
                "[{}] time threshold reached: {} seconds",
                self.address, elapsed
            );
            return true;
        }
        false
    }

    async fn trigger_flush(&self) {
        // Swap buffers atomically
        let was_front = self.active_is_front.fetch_xor(true, Ordering::AcqRel);
        let buffer_to_flush = if was_front {
            &self.front_buffer
        } else {
            &self.back_buffer
        };

        let lines = std::mem::take(&mut *buffer_to_flush.write().await);

        self.total_lines.store(0, Ordering::Relaxed);
        self.total_bytes.store(0, Ordering::Relaxed);
        let created_at = now();
        self.last_flush_time.store(created_at, Ordering::Relaxed);

        if lines.is_empty() {
            return;
        }
        debug!("[{}] flushing {} log lines", self.address, lines.len());

        let task = FlushTask {
            address: self.address,
            lines,
            created_at,
        };
        if self.flush_queue.push(task).is_err() {
            warn!("[{}] flush queue full, dropping log lines", self.address);
        }
    }

    /// Move whatever is buffered to the flush queue
    pub async fn force_flush(&self) {
        self.trigger_flush().await;
    }

    /// (lines, bytes) waiting in the active buffer
    pub fn stats(&self) -> (usize, usize) {
        (
            self.total_lines.load(Ordering::Relaxed),
            self.total_bytes.load(Ordering::Relaxed),
        )
    }
}

/// Per-address FIFO of formatted log lines awaiting durable storage.
///
/// Lines reach storage in the order they were pushed for each address.
pub struct SampleSinkQueue {
    buffers: DashMap<DeviceAddress, Arc<DeviceLogBuffer>>,
    flush_queue: Arc<ArrayQueue<FlushTask>>,
    max_buffer_duration: Duration,
}

impl SampleSinkQueue {
    pub fn new(capacity: usize, max_buffer_duration: Duration) -> Self {
        Self {
            buffers: DashMap::new(),
            flush_queue: Arc::new(ArrayQueue::new(capacity)),
            max_buffer_duration,
        }
    }

    fn buffer(&self, address: DeviceAddress) -> Arc<DeviceLogBuffer> {
        self.buffers
            .entry(address)
            .or_insert_with(|| {
                Arc::new(DeviceLogBuffer::new(
                    address,
                    self.max_buffer_duration,
                    Arc::clone(&self.flush_queue),
                ))
            })
            .clone()
    }

    pub async fn push(&self, address: DeviceAddress, line: String) {
        // Clone the Arc so no map guard is held across the await.
        let buffer = self.buffer(address);
        buffer.push_line(line).await;
    }

    /// Move every buffered line to the flush queue.
    pub async fn flush_all(&self) {
        let buffers: Vec<_> = self.buffers.iter().map(|e| Arc::clone(e.value())).collect();
        for buffer in buffers {
            buffer.force_flush().await;
        }
    }

    /// Take all queued flush tasks in queue order.
    pub fn drain(&self) -> Vec<FlushTask> {
        std::iter::from_fn(|| self.flush_queue.pop()).collect()
    }

    /// Lines not yet handed to the flush queue.
    pub fn pending_lines(&self) -> usize {
        self.buffers.iter().map(|e| e.value().stats().0).sum()
    }

    pub fn queued_tasks(&self) -> usize {
        self.flush_queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(last: u8) -> DeviceAddress {
        DeviceAddress::new([0xCE, 0xA5, 0xD7, 0x7B, 0xCD, last])
    }

    #[tokio::test]
    async fn test_lines_held_until_flush() {
        let queue = SampleSinkQueue::new(16, Duration::from_secs(3600));
        queue.push(address(1), "a".to_string()).await;
        queue.push(address(1), "b".to_string()).await;
        queue.push(address(2), "c".to_string()).await;

        assert_eq!(queue.pending_lines(), 3);
        assert_eq!(queue.queued_tasks(), 0);

        queue.flush_all().await;
        assert_eq!(queue.pending_lines(), 0);

        let mut tasks = queue.drain();
        tasks.sort_by_key(|t| t.address);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].lines, vec!["a", "b"]);
        assert_eq!(tasks[1].lines, vec!["c"]);
        assert!(queue.drain().is_empty());
    }

    #[tokio::test]
    async fn test_zero_duration_flushes_each_line() {
        let queue = SampleSinkQueue::new(16, Duration::ZERO);
        queue.push(address(1), "a".to_string()).await;
        queue.push(address(1), "b".to_string()).await;

        let lines: Vec<String> = queue.drain().into_iter().flat_map(|t| t.lines).collect();
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_empty_flush_queues_nothing() {
        let queue = SampleSinkQueue::new(16, Duration::from_secs(60));
        queue.push(address(1), "a".to_string()).await;
        queue.flush_all().await;
        queue.flush_all().await;
        assert_eq!(queue.drain().len(), 1);
    }
}
