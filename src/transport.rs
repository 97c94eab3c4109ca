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

// Advertisement event sources
//
// The BLE stack itself lives outside this crate. Events arrive as text lines
// in the form a scanner front end prints them:
//
//   [CE:A5:D7:7B:CD:81] ManufacturerData: 02e1:1000eba00535a2d9...
//   [CE:A5:D7:7B:CD:81] Name: SmartLithium 12.8V
//
// A line may start with a timestamp token (ISO-8601 UTC or unix seconds);
// events without one are stamped on arrival.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::debug;

use crate::address::DeviceAddress;
use crate::logline::parse_timestamp;
use crate::protocol::RawAdvertisement;

static EVENT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(\S+)\s+)?\[((?:[[:xdigit:]]{2}:){5}[[:xdigit:]]{2})\]\s+(ManufacturerData|Name):\s*(.*?)\s*$",
    )
    .expect("event line pattern is valid")
});

static MANUFACTURER_DATA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([[:xdigit:]]{4}):([[:xdigit:]]*)$").expect("manufacturer data pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    ManufacturerData {
        address: DeviceAddress,
        advertisement: RawAdvertisement,
    },
    Name {
        address: DeviceAddress,
        name: String,
    },
}

impl DeviceEvent {
    pub fn address(&self) -> DeviceAddress {
        match self {
            DeviceEvent::ManufacturerData { address, .. } | DeviceEvent::Name { address, .. } => {
                *address
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementEvent {
    /// Unix seconds supplied by the source, if any
    pub time: Option<i64>,
    pub event: DeviceEvent,
}

/// Source of advertisement events
#[async_trait]
pub trait AdvertisementSource: Send {
    /// Next event, or `None` once the source is exhausted.
    ///
    /// Must be cancel safe: the recorder polls it inside `tokio::select!`.
    async fn next_event(&mut self) -> Result<Option<AdvertisementEvent>>;

    /// Source type identifier
    fn source_type(&self) -> &str;
}

/// Parse one event line. Unrecognised lines yield `None`.
pub fn parse_event_line(line: &str) -> Option<AdvertisementEvent> {
    let caps = EVENT_LINE.captures(line.trim_start_matches('\0'))?;
    let time = match caps.get(1) {
        Some(token) => Some(parse_timestamp(token.as_str())?),
        None => None,
    };
    let address: DeviceAddress = caps[2].parse().ok()?;
    let value = &caps[4];

    let event = match &caps[3] {
        "Name" => DeviceEvent::Name {
            address,
            name: value.to_string(),
        },
        _ => {
            let data = MANUFACTURER_DATA.captures(value)?;
            let manufacturer_id = u16::from_str_radix(&data[1], 16).ok()?;
            let bytes = hex::decode(&data[2]).ok()?;
            DeviceEvent::ManufacturerData {
                address,
                advertisement: RawAdvertisement::new(manufacturer_id, bytes),
            }
        }
    };
    Some(AdvertisementEvent { time, event })
}

/// Reads events from a line-oriented text stream
pub struct LineSource<R> {
    lines: Lines<R>,
    line_number: usize,
}

impl<R: AsyncBufRead + Unpin + Send> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }
}

impl LineSource<BufReader<File>> {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .await
            .with_context(|| format!("Failed to open input: {}", path.display()))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl LineSource<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> AdvertisementSource for LineSource<R> {
    async fn next_event(&mut self) -> Result<Option<AdvertisementEvent>> {
        while let Some(line) = self
            .lines
            .next_line()
            .await
            .context("Failed to read input line")?
        {
            self.line_number += 1;
            if let Some(event) = parse_event_line(&line) {
                return Ok(Some(event));
            }
            if !line.trim().is_empty() {
                debug!("Skipping input line {}: {}", self.line_number, line);
            }
        }
        Ok(None)
    }

    fn source_type(&self) -> &str {
        "lines"
    }
}
