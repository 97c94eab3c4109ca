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

use victron_ble_logger::archive::HEAD_SLOTS;
use victron_ble_logger::sample::{SmartLithiumSample, SolarChargerSample};
use victron_ble_logger::{
    Aggregate, ArchiveRegistry, DeviceAddress, DeviceSample, Granularity, RollingArchive,
    TOTAL_SLOTS,
};

// 2024-01-01T00:00:00Z
const T0: i64 = 1_704_067_200;

fn solar(time: i64, pv_power: f64) -> DeviceSample {
    DeviceSample::SolarCharger(SolarChargerSample {
        time,
        averages: 1,
        battery_voltage: 13.2,
        pv_power,
        ..Default::default()
    })
}

/// Archive fed one sample every 301 seconds, a little over two days.
fn two_days() -> RollingArchive {
    let mut archive = RollingArchive::new(solar(T0, 0.0));
    for k in 1..600 {
        archive.insert(solar(T0 + k * 301, k as f64));
    }
    archive
}

#[test]
fn test_slot_layout() {
    assert_eq!(TOTAL_SLOTS, 2534);
    assert_eq!(
        HEAD_SLOTS
            + Granularity::ALL
                .iter()
                .map(|g| g.slot_count())
                .sum::<usize>(),
        TOTAL_SLOTS
    );
    assert_eq!(Granularity::Day.period(), 300);
    assert_eq!(Granularity::Week.period(), 1800);
    assert_eq!(Granularity::Month.period(), 7200);
    assert_eq!(Granularity::Year.period(), 86400);
}

#[test]
fn test_boundary_classification() {
    assert_eq!(Granularity::classify(T0), Granularity::Year);
    assert_eq!(Granularity::classify(T0 + 2 * 3600), Granularity::Month);
    assert_eq!(Granularity::classify(T0 + 3600), Granularity::Week);
    assert_eq!(Granularity::classify(T0 + 1800), Granularity::Week);
    assert_eq!(Granularity::classify(T0 + 300), Granularity::Day);
}

#[test]
fn test_day_region_fills_with_steady_samples() {
    let archive = two_days();
    assert_eq!(archive.slots().count(), TOTAL_SLOTS);
    assert_eq!(archive.latest_time(), T0 + 599 * 301);

    let day = archive.query(Granularity::Day);
    assert!(day.len() >= 590, "only {} day samples", day.len());
    assert_eq!(day[0].time(), archive.latest_time());
    assert!(day.iter().all(|s| s.is_valid()));

    let region: Vec<i64> = archive
        .region(Granularity::Day)
        .iter()
        .map(|s| s.time())
        .collect();
    assert!(region.windows(2).all(|w| w[0] > w[1]));
    assert!(region.iter().all(|t| t % 300 == 0));
}

#[test]
fn test_coarse_regions_follow_boundaries() {
    let archive = two_days();

    let week = archive.query(Granularity::Week);
    let month = archive.query(Granularity::Month);
    let year = archive.query(Granularity::Year);

    assert!(week.len() > month.len());
    assert!(month.len() > year.len());
    assert!(year.len() >= 2);
    assert_eq!(year.last().map(|s| s.time()), Some(T0));
    // Once the day region is full, each half-hour folds six day samples.
    assert!(week.iter().any(|s| s.averages() >= 6));

    for sample in &week {
        assert!(sample.is_valid());
        assert!(matches!(
            Granularity::classify(sample.time()),
            Granularity::Week | Granularity::Month | Granularity::Year
        ));
    }
    for sample in &month {
        assert!(Granularity::classify(sample.time()) >= Granularity::Month);
    }
    assert!(year
        .iter()
        .all(|s| Granularity::classify(s.time()) == Granularity::Year));
}

#[test]
fn test_duplicate_and_stale_samples_do_not_advance() {
    let mut archive = two_days();
    let before = archive.clone();

    archive.insert(solar(archive.latest_time(), 999.0));
    archive.insert(solar(T0, 999.0));
    assert_eq!(archive, before);
}

#[test]
fn test_long_gap_is_filled_with_accumulator_copies() {
    let mut archive = RollingArchive::new(solar(T0, 10.0));
    archive.insert(solar(T0 + 3 * 300 + 5, 20.0));

    let day = archive.region(Granularity::Day);
    assert_eq!(day[0].time(), T0 + 900);
    assert_eq!(day[1].time(), T0 + 600);
    assert_eq!(day[2].time(), T0 + 300);
    assert_eq!(day[3].time(), T0);
    assert!(day.iter().take(4).all(|s| s.averages() == 2));
    assert!(!day[4].is_valid());
}

#[test]
fn test_registry_keeps_devices_apart() {
    let registry = ArchiveRegistry::new();
    let solar_address: DeviceAddress = "F0:9A:51:7E:22:C4".parse().unwrap();
    let battery_address: DeviceAddress = "CE:A5:D7:7B:CD:81".parse().unwrap();

    assert!(registry.insert(solar_address, solar(T0, 100.0)));
    let battery = DeviceSample::SmartLithium(SmartLithiumSample {
        time: T0 + 5,
        averages: 1,
        voltage: 13.3,
        ..Default::default()
    });
    assert!(registry.insert(battery_address, battery));

    assert_eq!(registry.len(), 2);
    assert_eq!(registry.addresses(), vec![battery_address, solar_address]);
    assert_eq!(registry.latest_time(&solar_address), Some(T0));
    assert_eq!(registry.latest_time(&battery_address), Some(T0 + 5));

    let unknown: DeviceAddress = "00:11:22:33:44:55".parse().unwrap();
    assert!(registry.query(&unknown, Granularity::Day).is_empty());
    assert_eq!(registry.latest_time(&unknown), None);
}
