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

use victron_ble_logger::transport::parse_event_line;
use victron_ble_logger::{
    AdvertisementSource, DeviceAddress, DeviceEvent, LineSource, VICTRON_MANUFACTURER_ID,
};

#[test]
fn test_manufacturer_data_line() {
    let event = parse_event_line(
        "2024-01-01T12:00:00Z [CE:A5:D7:7B:CD:81] ManufacturerData: 02e1:1000a0a0014b0cd9aabb",
    )
    .unwrap();
    assert_eq!(event.time, Some(1_704_110_400));

    let DeviceEvent::ManufacturerData {
        address,
        advertisement,
    } = event.event
    else {
        panic!("expected manufacturer data");
    };
    assert_eq!(address, "CE:A5:D7:7B:CD:81".parse::<DeviceAddress>().unwrap());
    assert_eq!(advertisement.manufacturer_id, VICTRON_MANUFACTURER_ID);
    assert_eq!(advertisement.data.len(), 10);
    assert_eq!(advertisement.record_type_byte(), Some(0x01));
}

#[test]
fn test_name_line_without_time() {
    let event = parse_event_line("[f0:9a:51:7e:22:c4] Name: SmartSolar HQ2231ABCDE ").unwrap();
    assert_eq!(event.time, None);
    assert_eq!(
        event.event,
        DeviceEvent::Name {
            address: "F0:9A:51:7E:22:C4".parse().unwrap(),
            name: "SmartSolar HQ2231ABCDE".to_string(),
        }
    );
}

#[test]
fn test_unrecognised_lines() {
    assert!(parse_event_line("").is_none());
    assert!(parse_event_line("[CE:A5:D7:7B:CD:81] RSSI: -71").is_none());
    assert!(parse_event_line("[CE:A5:D7:7B:CD] Name: short").is_none());
    assert!(parse_event_line("[CE:A5:D7:7B:CD:81] ManufacturerData: 02e1:abc").is_none());
    assert!(parse_event_line("yesterday [CE:A5:D7:7B:CD:81] Name: x").is_none());
}

#[tokio::test]
async fn test_line_source_skips_noise() {
    let input = "\
scan started
1704110400 [CE:A5:D7:7B:CD:81] Name: SmartLithium 12.8V

1704110401 [CE:A5:D7:7B:CD:81] ManufacturerData: 004c:0215
";
    let mut source = LineSource::new(input.as_bytes());
    assert_eq!(source.source_type(), "lines");

    let first = source.next_event().await.unwrap().unwrap();
    assert!(matches!(first.event, DeviceEvent::Name { .. }));
    assert_eq!(first.time, Some(1_704_110_400));

    let second = source.next_event().await.unwrap().unwrap();
    assert_eq!(second.time, Some(1_704_110_401));
    let DeviceEvent::ManufacturerData { advertisement, .. } = second.event else {
        panic!("expected manufacturer data");
    };
    assert!(!advertisement.is_victron());

    assert!(source.next_event().await.unwrap().is_none());
}
