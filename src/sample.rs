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

// Archivable device samples.
//
// A sample is one engineering-unit reading, or the weighted average of
// several. `averages` counts how many readings were folded in; a sample with
// `averages == 0` is a placeholder that holds only a timestamp.

use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

use chrono::{DateTime, Timelike};

use crate::error::ArchiveError;
use crate::layout::{
    DcDcConverterRecord, OrionXsRecord, RecordFields, SmartLithiumRecord, SolarChargerRecord,
};

/// Archive resolution tiers, finest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Granularity {
    Day,
    Week,
    Month,
    Year,
}

impl Granularity {
    pub const ALL: [Granularity; 4] = [
        Granularity::Day,
        Granularity::Week,
        Granularity::Month,
        Granularity::Year,
    ];

    /// Number of slots in this tier's region.
    pub const fn slot_count(self) -> usize {
        match self {
            Granularity::Day | Granularity::Week | Granularity::Month => 600,
            Granularity::Year => 2 * 366,
        }
    }

    /// Nominal seconds covered by one slot.
    pub const fn period(self) -> i64 {
        match self {
            Granularity::Day => 300,
            Granularity::Week => 1800,
            Granularity::Month => 7200,
            Granularity::Year => 86400,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Year => "year",
        }
    }

    /// Truncate `time` to the preceding boundary of this tier.
    pub fn truncate(self, time: i64) -> i64 {
        time.saturating_sub(time.rem_euclid(self.period()))
    }

    /// Coarsest tier whose boundary `time` falls on, judged by UTC wall clock.
    ///
    /// 00:00 is a year boundary, any other even hour on the hour a month
    /// boundary, :00 and :30 week boundaries, everything else day only.
    pub fn classify(time: i64) -> Granularity {
        let Some(utc) = DateTime::from_timestamp(time, 0) else {
            return Granularity::Day;
        };
        match (utc.hour(), utc.minute()) {
            (0, 0) => Granularity::Year,
            (h, 0) if h % 2 == 0 => Granularity::Month,
            (_, 0) | (_, 30) => Granularity::Week,
            _ => Granularity::Day,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            "month" => Ok(Granularity::Month),
            "year" => Ok(Granularity::Year),
            other => Err(format!("unknown granularity '{}'", other)),
        }
    }
}

/// Operations the rolling archive needs from a sample type.
pub trait Aggregate: Clone + fmt::Debug {
    /// Unix seconds.
    fn time(&self) -> i64;

    fn set_time(&mut self, time: i64);

    fn averages(&self) -> u32;

    fn is_valid(&self) -> bool {
        self.averages() > 0
    }

    /// A sample of the same kind with no readings, stamped `time`.
    fn placeholder(&self, time: i64) -> Self;

    /// Whether `other` can share an archive with `self`.
    fn same_kind(&self, _other: &Self) -> bool {
        true
    }

    /// Fold `other` into `self` as a weighted running average.
    /// Invalid samples are ignored.
    fn merge(&mut self, other: &Self);
}

fn weighted(a: f64, a_count: u32, b: f64, b_count: u32) -> f64 {
    let total = f64::from(a_count) + f64::from(b_count);
    (a * f64::from(a_count) + b * f64::from(b_count)) / total
}

/// Solar charger reading.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SolarChargerSample {
    pub time: i64,
    pub averages: u32,
    pub battery_voltage: f64,
    pub battery_current: f64,
    pub yield_today: f64,
    pub pv_power: f64,
    pub load_current: f64,
}

impl SolarChargerSample {
    pub const FIELD_COUNT: usize = 5;

    pub fn from_record(record: &SolarChargerRecord, time: i64) -> Self {
        Self {
            time,
            averages: 1,
            battery_voltage: record.battery_voltage.unwrap_or_default(),
            battery_current: record.battery_current.unwrap_or_default(),
            yield_today: record.yield_today.unwrap_or_default(),
            pv_power: record.pv_power.unwrap_or_default(),
            load_current: record.load_current.unwrap_or_default(),
        }
    }

    pub fn values(&self) -> Vec<f64> {
        vec![
            self.battery_voltage,
            self.battery_current,
            self.yield_today,
            self.pv_power,
            self.load_current,
        ]
    }

    fn from_values(time: i64, averages: u32, v: &[f64]) -> Self {
        Self {
            time,
            averages,
            battery_voltage: v[0],
            battery_current: v[1],
            yield_today: v[2],
            pv_power: v[3],
            load_current: v[4],
        }
    }
}

impl AddAssign<&SolarChargerSample> for SolarChargerSample {
    fn add_assign(&mut self, b: &SolarChargerSample) {
        if b.averages == 0 {
            return;
        }
        let (n, m) = (self.averages, b.averages);
        self.time = self.time.max(b.time);
        self.battery_voltage = weighted(self.battery_voltage, n, b.battery_voltage, m);
        self.battery_current = weighted(self.battery_current, n, b.battery_current, m);
        self.yield_today = weighted(self.yield_today, n, b.yield_today, m);
        self.pv_power = weighted(self.pv_power, n, b.pv_power, m);
        self.load_current = weighted(self.load_current, n, b.load_current, m);
        self.averages += m;
    }
}

impl fmt::Display for SolarChargerSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(Solar Charger) Battery: {}V {}A Yield: {}kWh PV: {}W Load: {}A",
            self.battery_voltage,
            self.battery_current,
            self.yield_today,
            self.pv_power,
            self.load_current
        )
    }
}

/// DC/DC converter reading.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DcDcConverterSample {
    pub time: i64,
    pub averages: u32,
    pub input_voltage: f64,
    pub output_voltage: f64,
}

impl DcDcConverterSample {
    pub const FIELD_COUNT: usize = 2;

    pub fn from_record(record: &DcDcConverterRecord, time: i64) -> Self {
        Self {
            time,
            averages: 1,
            input_voltage: record.input_voltage.unwrap_or_default(),
            output_voltage: record.output_voltage.unwrap_or_default(),
        }
    }

    pub fn values(&self) -> Vec<f64> {
        vec![self.input_voltage, self.output_voltage]
    }

    fn from_values(time: i64, averages: u32, v: &[f64]) -> Self {
        Self {
            time,
            averages,
            input_voltage: v[0],
            output_voltage: v[1],
        }
    }
}

impl AddAssign<&DcDcConverterSample> for DcDcConverterSample {
    fn add_assign(&mut self, b: &DcDcConverterSample) {
        if b.averages == 0 {
            return;
        }
        let (n, m) = (self.averages, b.averages);
        self.time = self.time.max(b.time);
        self.input_voltage = weighted(self.input_voltage, n, b.input_voltage, m);
        self.output_voltage = weighted(self.output_voltage, n, b.output_voltage, m);
        self.averages += m;
    }
}

impl fmt::Display for DcDcConverterSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(DC/DC Converter) Input: {}V Output: {}V",
            self.input_voltage, self.output_voltage
        )
    }
}

/// SmartLithium battery reading with running temperature extremes.
///
/// A cell the battery does not report stays at 0.0.
#[derive(Debug, Clone, PartialEq)]
pub struct SmartLithiumSample {
    pub time: i64,
    pub averages: u32,
    pub cells: [f64; 8],
    pub voltage: f64,
    pub temperature: f64,
    pub temperature_min: f64,
    pub temperature_max: f64,
}

impl Default for SmartLithiumSample {
    fn default() -> Self {
        Self {
            time: 0,
            averages: 0,
            cells: [0.0; 8],
            voltage: 0.0,
            temperature: 0.0,
            temperature_min: f64::MAX,
            temperature_max: -f64::MAX,
        }
    }
}

impl SmartLithiumSample {
    pub const FIELD_COUNT: usize = 12;

    pub fn from_record(record: &SmartLithiumRecord, time: i64) -> Self {
        let temperature = record.battery_temperature;
        Self {
            time,
            averages: 1,
            cells: record.cells.map(Option::unwrap_or_default),
            voltage: record.battery_voltage.unwrap_or_default(),
            temperature: temperature.unwrap_or_default(),
            // A missing reading must not drag the running extremes towards zero.
            temperature_min: temperature.unwrap_or(f64::MAX),
            temperature_max: temperature.unwrap_or(-f64::MAX),
        }
    }

    /// Cells that reported a voltage.
    pub fn cell_count(&self) -> usize {
        self.cells.iter().filter(|c| **c != 0.0).count()
    }

    pub fn min_temperature(&self) -> f64 {
        self.temperature.min(self.temperature_min)
    }

    pub fn max_temperature(&self) -> f64 {
        self.temperature.max(self.temperature_max)
    }

    pub fn values(&self) -> Vec<f64> {
        let mut values = self.cells.to_vec();
        values.extend([
            self.voltage,
            self.temperature,
            self.temperature_min,
            self.temperature_max,
        ]);
        values
    }

    fn from_values(time: i64, averages: u32, v: &[f64]) -> Self {
        let mut cells = [0.0; 8];
        cells.copy_from_slice(&v[..8]);
        Self {
            time,
            averages,
            cells,
            voltage: v[8],
            temperature: v[9],
            temperature_min: v[10],
            temperature_max: v[11],
        }
    }
}

impl AddAssign<&SmartLithiumSample> for SmartLithiumSample {
    fn add_assign(&mut self, b: &SmartLithiumSample) {
        if b.averages == 0 {
            return;
        }
        let (n, m) = (self.averages, b.averages);
        self.time = self.time.max(b.time);
        for (cell, other) in self.cells.iter_mut().zip(b.cells) {
            *cell = weighted(*cell, n, other, m);
        }
        self.voltage = weighted(self.voltage, n, b.voltage, m);
        self.temperature = weighted(self.temperature, n, b.temperature, m);
        self.temperature_min = self.temperature_min.min(b.temperature_min);
        self.temperature_max = self.temperature_max.max(b.temperature_max);
        self.averages += m;
    }
}

impl fmt::Display for SmartLithiumSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(SmartLithium)")?;
        for cell in self.cells.iter().filter(|c| **c != 0.0) {
            write!(f, " Cell: {}V", cell)?;
        }
        write!(
            f,
            " Voltage: {}V Temperature: {}\u{00B0}C",
            self.voltage, self.temperature
        )
    }
}

/// Orion XS DC/DC charger reading.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrionXsSample {
    pub time: i64,
    pub averages: u32,
    pub output_voltage: f64,
    pub output_current: f64,
    pub input_voltage: f64,
    pub input_current: f64,
}

impl OrionXsSample {
    pub const FIELD_COUNT: usize = 4;

    pub fn from_record(record: &OrionXsRecord, time: i64) -> Self {
        Self {
            time,
            averages: 1,
            output_voltage: record.output_voltage.unwrap_or_default(),
            output_current: record.output_current.unwrap_or_default(),
            input_voltage: record.input_voltage.unwrap_or_default(),
            input_current: record.input_current.unwrap_or_default(),
        }
    }

    pub fn values(&self) -> Vec<f64> {
        vec![
            self.output_voltage,
            self.output_current,
            self.input_voltage,
            self.input_current,
        ]
    }

    fn from_values(time: i64, averages: u32, v: &[f64]) -> Self {
        Self {
            time,
            averages,
            output_voltage: v[0],
            output_current: v[1],
            input_voltage: v[2],
            input_current: v[3],
        }
    }
}

impl AddAssign<&OrionXsSample> for OrionXsSample {
    fn add_assign(&mut self, b: &OrionXsSample) {
        if b.averages == 0 {
            return;
        }
        let (n, m) = (self.averages, b.averages);
        self.time = self.time.max(b.time);
        self.output_voltage = weighted(self.output_voltage, n, b.output_voltage, m);
        self.output_current = weighted(self.output_current, n, b.output_current, m);
        self.input_voltage = weighted(self.input_voltage, n, b.input_voltage, m);
        self.input_current = weighted(self.input_current, n, b.input_current, m);
        self.averages += m;
    }
}

impl fmt::Display for OrionXsSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(Orion XS) Output: {}V {}A Input: {}V {}A",
            self.output_voltage, self.output_current, self.input_voltage, self.input_current
        )
    }
}

/// Which sample variant an archive holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    SolarCharger,
    DcDcConverter,
    SmartLithium,
    OrionXs,
}

impl SampleKind {
    pub fn name(self) -> &'static str {
        match self {
            SampleKind::SolarCharger => "SolarCharger",
            SampleKind::DcDcConverter => "DcDcConverter",
            SampleKind::SmartLithium => "SmartLithium",
            SampleKind::OrionXs => "OrionXs",
        }
    }

    /// Number of value columns after time and averages.
    pub fn field_count(self) -> usize {
        match self {
            SampleKind::SolarCharger => SolarChargerSample::FIELD_COUNT,
            SampleKind::DcDcConverter => DcDcConverterSample::FIELD_COUNT,
            SampleKind::SmartLithium => SmartLithiumSample::FIELD_COUNT,
            SampleKind::OrionXs => OrionXsSample::FIELD_COUNT,
        }
    }

    pub fn placeholder(self, time: i64) -> DeviceSample {
        match self {
            SampleKind::SolarCharger => DeviceSample::SolarCharger(SolarChargerSample {
                time,
                ..Default::default()
            }),
            SampleKind::DcDcConverter => DeviceSample::DcDcConverter(DcDcConverterSample {
                time,
                ..Default::default()
            }),
            SampleKind::SmartLithium => DeviceSample::SmartLithium(SmartLithiumSample {
                time,
                ..Default::default()
            }),
            SampleKind::OrionXs => DeviceSample::OrionXs(OrionXsSample {
                time,
                ..Default::default()
            }),
        }
    }

    /// Rebuild a sample from its value columns.
    pub fn from_values(
        self,
        time: i64,
        averages: u32,
        values: &[f64],
    ) -> Result<DeviceSample, ArchiveError> {
        if values.len() != self.field_count() {
            return Err(ArchiveError::MalformedRow {
                row: 0,
                reason: format!(
                    "{} expects {} values, found {}",
                    self.name(),
                    self.field_count(),
                    values.len()
                ),
            });
        }
        Ok(match self {
            SampleKind::SolarCharger => {
                DeviceSample::SolarCharger(SolarChargerSample::from_values(time, averages, values))
            }
            SampleKind::DcDcConverter => DeviceSample::DcDcConverter(
                DcDcConverterSample::from_values(time, averages, values),
            ),
            SampleKind::SmartLithium => {
                DeviceSample::SmartLithium(SmartLithiumSample::from_values(time, averages, values))
            }
            SampleKind::OrionXs => {
                DeviceSample::OrionXs(OrionXsSample::from_values(time, averages, values))
            }
        })
    }
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SampleKind {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SolarCharger" => Ok(SampleKind::SolarCharger),
            "DcDcConverter" => Ok(SampleKind::DcDcConverter),
            "SmartLithium" => Ok(SampleKind::SmartLithium),
            "OrionXs" => Ok(SampleKind::OrionXs),
            other => Err(ArchiveError::UnknownSampleKind(other.to_string())),
        }
    }
}

/// A reading from any archivable device type.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceSample {
    SolarCharger(SolarChargerSample),
    DcDcConverter(DcDcConverterSample),
    SmartLithium(SmartLithiumSample),
    OrionXs(OrionXsSample),
}

impl DeviceSample {
    /// Sample for decoded `fields`, or `None` when the record type is not archived.
    pub fn from_fields(fields: &RecordFields, time: i64) -> Option<Self> {
        match fields {
            RecordFields::SolarCharger(r) => Some(Self::SolarCharger(
                SolarChargerSample::from_record(r, time),
            )),
            RecordFields::DcDcConverter(r) => Some(Self::DcDcConverter(
                DcDcConverterSample::from_record(r, time),
            )),
            RecordFields::SmartLithium(r) => Some(Self::SmartLithium(
                SmartLithiumSample::from_record(r, time),
            )),
            RecordFields::OrionXs(r) => Some(Self::OrionXs(OrionXsSample::from_record(r, time))),
            RecordFields::LynxSmartBms(_) => None,
        }
    }

    pub fn kind(&self) -> SampleKind {
        match self {
            DeviceSample::SolarCharger(_) => SampleKind::SolarCharger,
            DeviceSample::DcDcConverter(_) => SampleKind::DcDcConverter,
            DeviceSample::SmartLithium(_) => SampleKind::SmartLithium,
            DeviceSample::OrionXs(_) => SampleKind::OrionXs,
        }
    }

    /// Value columns in cache order.
    pub fn values(&self) -> Vec<f64> {
        match self {
            DeviceSample::SolarCharger(s) => s.values(),
            DeviceSample::DcDcConverter(s) => s.values(),
            DeviceSample::SmartLithium(s) => s.values(),
            DeviceSample::OrionXs(s) => s.values(),
        }
    }
}

impl Aggregate for DeviceSample {
    fn time(&self) -> i64 {
        match self {
            DeviceSample::SolarCharger(s) => s.time,
            DeviceSample::DcDcConverter(s) => s.time,
            DeviceSample::SmartLithium(s) => s.time,
            DeviceSample::OrionXs(s) => s.time,
        }
    }

    fn set_time(&mut self, time: i64) {
        match self {
            DeviceSample::SolarCharger(s) => s.time = time,
            DeviceSample::DcDcConverter(s) => s.time = time,
            DeviceSample::SmartLithium(s) => s.time = time,
            DeviceSample::OrionXs(s) => s.time = time,
        }
    }

    fn averages(&self) -> u32 {
        match self {
            DeviceSample::SolarCharger(s) => s.averages,
            DeviceSample::DcDcConverter(s) => s.averages,
            DeviceSample::SmartLithium(s) => s.averages,
            DeviceSample::OrionXs(s) => s.averages,
        }
    }

    fn placeholder(&self, time: i64) -> Self {
        self.kind().placeholder(time)
    }

    fn same_kind(&self, other: &Self) -> bool {
        self.kind() == other.kind()
    }

    /// Samples of different kinds never merge.
    fn merge(&mut self, other: &Self) {
        match (self, other) {
            (DeviceSample::SolarCharger(a), DeviceSample::SolarCharger(b)) => *a += b,
            (DeviceSample::DcDcConverter(a), DeviceSample::DcDcConverter(b)) => *a += b,
            (DeviceSample::SmartLithium(a), DeviceSample::SmartLithium(b)) => *a += b,
            (DeviceSample::OrionXs(a), DeviceSample::OrionXs(b)) => *a += b,
            _ => {}
        }
    }
}

impl fmt::Display for DeviceSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSample::SolarCharger(s) => fmt::Display::fmt(s, f),
            DeviceSample::DcDcConverter(s) => fmt::Display::fmt(s, f),
            DeviceSample::SmartLithium(s) => fmt::Display::fmt(s, f),
            DeviceSample::OrionXs(s) => fmt::Display::fmt(s, f),
        }
    }
}
