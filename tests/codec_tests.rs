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

use victron_ble_logger::codec::{CACHE_MAGIC, CACHE_VERSION};
use victron_ble_logger::sample::{OrionXsSample, SmartLithiumSample};
use victron_ble_logger::{
    ArchiveCodec, ArchiveError, DeviceAddress, DeviceSample, Granularity, RollingArchive,
    SampleKind, TOTAL_SLOTS,
};

// 2024-03-10T00:00:00Z
const T0: i64 = 1_710_028_800;

fn address() -> DeviceAddress {
    "CE:A5:D7:7B:CD:81".parse().unwrap()
}

fn battery(time: i64, voltage: f64, temperature: f64) -> DeviceSample {
    DeviceSample::SmartLithium(SmartLithiumSample {
        time,
        averages: 1,
        cells: [3.31, 3.32, 3.3, 3.33, 0.0, 0.0, 0.0, 0.0],
        voltage,
        temperature,
        temperature_min: temperature,
        temperature_max: temperature,
    })
}

fn archive() -> RollingArchive {
    let mut archive = RollingArchive::new(battery(T0, 13.28, 18.0));
    for k in 1..40 {
        archive.insert(battery(T0 + k * 97, 13.28 + k as f64 / 300.0, 18.0 + k as f64 / 7.0));
    }
    archive
}

#[test]
fn test_cache_layout() {
    let text = ArchiveCodec::serialize(&address(), &archive());
    let mut lines = text.lines();

    assert_eq!(
        lines.next(),
        Some(format!("{} CE:A5:D7:7B:CD:81 {} SmartLithium", CACHE_MAGIC, CACHE_VERSION).as_str())
    );
    let rows: Vec<&str> = lines.collect();
    assert_eq!(rows.len(), TOTAL_SLOTS);
    assert!(rows
        .iter()
        .all(|row| row.split('\t').count() == 2 + SampleKind::SmartLithium.field_count()));
}

#[test]
fn test_restored_archive_is_identical() {
    let original = archive();
    let text = ArchiveCodec::serialize(&address(), &original);

    let (restored_address, restored) = ArchiveCodec::deserialize(&text).unwrap();
    assert_eq!(restored_address, address());
    assert_eq!(restored, original);
    assert_eq!(
        restored.query(Granularity::Day),
        original.query(Granularity::Day)
    );
    assert_eq!(ArchiveCodec::serialize(&address(), &restored), text);
}

#[test]
fn test_other_writer_version_accepted() {
    let text = ArchiveCodec::serialize(&address(), &archive())
        .replacen(CACHE_VERSION, "victron-ble-logger/0.0.9", 1);
    assert!(ArchiveCodec::deserialize(&text).is_ok());
}

#[test]
fn test_truncated_cache_rejected() {
    let text = ArchiveCodec::serialize(&address(), &archive());
    let truncated: Vec<&str> = text.lines().take(TOTAL_SLOTS).collect();

    assert_eq!(
        ArchiveCodec::deserialize(&truncated.join("\n")),
        Err(ArchiveError::SizeMismatch {
            expected: TOTAL_SLOTS,
            found: TOTAL_SLOTS - 1
        })
    );
}

#[test]
fn test_bad_headers_rejected() {
    assert_eq!(ArchiveCodec::deserialize(""), Err(ArchiveError::MissingHeader));
    assert_eq!(
        ArchiveCodec::parse_header("Archive: CE:A5:D7:7B:CD:81 v1 SmartLithium"),
        Err(ArchiveError::MissingHeader)
    );
    assert!(matches!(
        ArchiveCodec::parse_header("Cache: not-an-address v1 SmartLithium"),
        Err(ArchiveError::MalformedHeader(_))
    ));
    assert_eq!(
        ArchiveCodec::parse_header("Cache: CE:A5:D7:7B:CD:81 v1 Inverter"),
        Err(ArchiveError::UnknownSampleKind("Inverter".to_string()))
    );
    assert_eq!(
        ArchiveCodec::parse_header("Cache: CE:A5:D7:7B:CD:81 v1 OrionXs"),
        Ok((address(), SampleKind::OrionXs))
    );
}

#[test]
fn test_row_with_wrong_column_count_rejected() {
    let orion = RollingArchive::new(DeviceSample::OrionXs(OrionXsSample {
        time: T0,
        averages: 1,
        output_voltage: 13.5,
        output_current: 12.0,
        input_voltage: 24.1,
        input_current: 7.2,
    }));
    let text = ArchiveCodec::serialize(&address(), &orion);
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    lines[3].push_str("\t1.0");

    assert!(matches!(
        ArchiveCodec::deserialize(&lines.join("\n")),
        Err(ArchiveError::MalformedRow { row: 2, .. })
    ));
}
