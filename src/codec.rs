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

// Text cache format for rolling archives.
//
// ```text
// Cache: CE:A5:D7:7B:CD:81 victron-ble-logger/0.1.0 SmartLithium
// <time>\t<averages>\t<value>...      one row per slot, storage order
// ```
//
// Values use the shortest representation that parses back to the same
// `f64` (exponent form for very large or small magnitudes), so a serialized
// archive reloads bit for bit.

use std::fmt::Write;

use crate::address::DeviceAddress;
use crate::archive::{RollingArchive, TOTAL_SLOTS};
use crate::error::ArchiveError;
use crate::sample::{Aggregate, DeviceSample, SampleKind};

pub const CACHE_MAGIC: &str = "Cache:";

/// Written into every cache header.
pub const CACHE_VERSION: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

pub struct ArchiveCodec;

impl ArchiveCodec {
    pub fn serialize(address: &DeviceAddress, archive: &RollingArchive) -> String {
        let mut out = String::with_capacity(TOTAL_SLOTS * 64);
        // Writing into a String cannot fail.
        let _ = writeln!(
            out,
            "{} {} {} {}",
            CACHE_MAGIC,
            address,
            CACHE_VERSION,
            archive.kind()
        );
        for sample in archive.slots() {
            let _ = write!(out, "{}\t{}", sample.time(), sample.averages());
            for value in sample.values() {
                // Debug switches to exponent form for the placeholder extremes.
                let _ = write!(out, "\t{:?}", value);
            }
            out.push('\n');
        }
        out
    }

    /// Parse a cache. Anything but exactly [`TOTAL_SLOTS`] rows is rejected.
    pub fn deserialize(text: &str) -> Result<(DeviceAddress, RollingArchive), ArchiveError> {
        let mut lines = text.lines();
        let header = lines.next().ok_or(ArchiveError::MissingHeader)?;
        let (address, kind) = Self::parse_header(header)?;

        let rows: Vec<&str> = lines.collect();
        if rows.len() != TOTAL_SLOTS {
            return Err(ArchiveError::SizeMismatch {
                expected: TOTAL_SLOTS,
                found: rows.len(),
            });
        }

        let slots = rows
            .iter()
            .enumerate()
            .map(|(row, line)| Self::parse_row(kind, row, line))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((address, RollingArchive::from_slots(slots)?))
    }

    /// Address and sample kind from a header line.
    pub fn parse_header(line: &str) -> Result<(DeviceAddress, SampleKind), ArchiveError> {
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some(CACHE_MAGIC) {
            return Err(ArchiveError::MissingHeader);
        }
        let address = tokens
            .next()
            .ok_or_else(|| ArchiveError::MalformedHeader(line.to_string()))?
            .parse::<DeviceAddress>()
            .map_err(|e| ArchiveError::MalformedHeader(e.to_string()))?;
        // The writer version is informational; any version is accepted.
        let _version = tokens
            .next()
            .ok_or_else(|| ArchiveError::MalformedHeader(line.to_string()))?;
        let kind = tokens
            .next()
            .ok_or_else(|| ArchiveError::MalformedHeader(line.to_string()))?
            .parse::<SampleKind>()?;
        Ok((address, kind))
    }

    fn parse_row(
        kind: SampleKind,
        row: usize,
        line: &str,
    ) -> Result<DeviceSample, ArchiveError> {
        let malformed = |reason: String| ArchiveError::MalformedRow { row, reason };
        let mut tokens = line.split_whitespace();

        let time = tokens
            .next()
            .ok_or_else(|| malformed("empty row".to_string()))?
            .parse::<i64>()
            .map_err(|e| malformed(format!("time: {}", e)))?;
        let averages = tokens
            .next()
            .ok_or_else(|| malformed("missing averages".to_string()))?
            .parse::<u32>()
            .map_err(|e| malformed(format!("averages: {}", e)))?;
        let values = tokens
            .map(|t| t.parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| malformed(format!("value: {}", e)))?;

        kind.from_values(time, averages, &values)
            .map_err(|e| match e {
                ArchiveError::MalformedRow { reason, .. } => malformed(reason),
                other => other,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{Granularity, SmartLithiumSample};

    // 2024-01-01T00:00:00Z
    const MIDNIGHT: i64 = 1_704_067_200;

    fn address() -> DeviceAddress {
        "CE:A5:D7:7B:CD:81".parse().unwrap()
    }

    fn archive() -> RollingArchive {
        let sample = |time: i64, voltage: f64| {
            DeviceSample::SmartLithium(SmartLithiumSample {
                time,
                averages: 1,
                cells: [3.31, 3.29, 3.3, 3.32, 0.0, 0.0, 0.0, 0.0],
                voltage,
                temperature: 17.0,
                temperature_min: 17.0,
                temperature_max: 17.0,
            })
        };
        let mut archive = RollingArchive::new(sample(MIDNIGHT, 13.21));
        for i in 1..40 {
            archive.insert(sample(MIDNIGHT + i * 97, 13.21 + i as f64 / 1000.0));
        }
        archive
    }

    #[test]
    fn test_serialize_layout() {
        let text = ArchiveCodec::serialize(&address(), &archive());
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some(format!("Cache: CE:A5:D7:7B:CD:81 {} SmartLithium", CACHE_VERSION).as_str())
        );
        assert_eq!(lines.count(), TOTAL_SLOTS);

        let first_row: Vec<&str> = text.lines().nth(1).unwrap().split('\t').collect();
        assert_eq!(first_row.len(), 2 + SmartLithiumSample::FIELD_COUNT);
    }

    #[test]
    fn test_round_trip_is_exact() {
        let original = archive();
        assert!(!original.query(Granularity::Day).is_empty());

        let text = ArchiveCodec::serialize(&address(), &original);
        let (address, restored) = ArchiveCodec::deserialize(&text).unwrap();
        assert_eq!(address, self::address());
        assert_eq!(restored, original);
    }

    #[test]
    fn test_placeholder_extremes_stay_compact() {
        let text = ArchiveCodec::serialize(&address(), &archive());
        let placeholder = text.lines().last().unwrap();
        assert!(placeholder.ends_with("\t1.7976931348623157e308\t-1.7976931348623157e308"));
        assert!(text.lines().all(|row| row.len() < 200));

        let (_, restored) = ArchiveCodec::deserialize(&text).unwrap();
        let DeviceSample::SmartLithium(last) = restored.slots().last().unwrap() else {
            panic!("expected SmartLithium slot");
        };
        assert_eq!(last.temperature_min, f64::MAX);
        assert_eq!(last.temperature_max, -f64::MAX);
    }

    #[test]
    fn test_truncated_cache_rejected() {
        let text = ArchiveCodec::serialize(&address(), &archive());
        let truncated: String = text.lines().take(100).map(|l| format!("{}\n", l)).collect();
        assert_eq!(
            ArchiveCodec::deserialize(&truncated).unwrap_err(),
            ArchiveError::SizeMismatch {
                expected: TOTAL_SLOTS,
                found: 99
            }
        );
    }

    #[test]
    fn test_bad_header_rejected() {
        assert_eq!(
            ArchiveCodec::deserialize("").unwrap_err(),
            ArchiveError::MissingHeader
        );
        assert_eq!(
            ArchiveCodec::deserialize("Bogus: CE:A5:D7:7B:CD:81 v1 SmartLithium\n").unwrap_err(),
            ArchiveError::MissingHeader
        );
        assert!(matches!(
            ArchiveCodec::parse_header("Cache: CE:A5:D7:7B:CD:81 v1 Lynx"),
            Err(ArchiveError::UnknownSampleKind(_))
        ));
        assert!(matches!(
            ArchiveCodec::parse_header("Cache: not-an-address v1 SmartLithium"),
            Err(ArchiveError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_malformed_row_reports_index() {
        let text = ArchiveCodec::serialize(&address(), &archive());
        let damaged = text.replacen("\t1\t", "\tx\t", 1);
        assert!(matches!(
            ArchiveCodec::deserialize(&damaged),
            Err(ArchiveError::MalformedRow { .. })
        ));
    }
}
