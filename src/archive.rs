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

// Multi-resolution rolling archive.
//
// Each device keeps a fixed number of slots: the current reading, a running
// accumulator, and four newest-first regions (day, week, month, year). When
// the accumulator has spanned more than one day period it is pushed onto the
// day region, and wall-clock boundaries decide whether the coarser regions
// receive a fresh average of the most recent day slots.

use std::collections::VecDeque;
use std::iter;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace, warn};

use crate::address::DeviceAddress;
use crate::error::ArchiveError;
use crate::sample::{Aggregate, DeviceSample, Granularity, SampleKind};

/// `current` and `accumulator`.
pub const HEAD_SLOTS: usize = 2;

pub const TOTAL_SLOTS: usize = HEAD_SLOTS
    + Granularity::Day.slot_count()
    + Granularity::Week.slot_count()
    + Granularity::Month.slot_count()
    + Granularity::Year.slot_count();

// Day slots folded into one year, month and week slot.
const YEAR_FOLD: usize = 12 * 24;
const MONTH_FOLD: usize = 12 * 2;
const WEEK_FOLD: usize = 6;

const DAY_PERIOD: i64 = Granularity::Day.period();

// Seconds covered by the year region; a gap longer than this leaves nothing
// of the old history in any region.
const ARCHIVE_SPAN: i64 = Granularity::Year.slot_count() as i64 * Granularity::Year.period();

#[derive(Debug, Clone, PartialEq)]
pub struct RollingArchive<S: Aggregate = DeviceSample> {
    current: S,
    accumulator: S,
    regions: [VecDeque<S>; 4],
}

impl<S: Aggregate> RollingArchive<S> {
    /// Archive seeded with its first sample.
    ///
    /// Region slots get placeholder timestamps walking backwards from the
    /// sample, each region continuing where the previous one ended.
    pub fn new(sample: S) -> Self {
        let mut time = sample.time();
        let regions = Granularity::ALL.map(|granularity| {
            (0..granularity.slot_count())
                .map(|_| {
                    time = time.saturating_sub(granularity.period());
                    sample.placeholder(time)
                })
                .collect::<VecDeque<_>>()
        });
        Self {
            current: sample.clone(),
            accumulator: sample,
            regions,
        }
    }

    /// Rebuild from slots in storage order. The slot count must be exact.
    pub fn from_slots(slots: Vec<S>) -> Result<Self, ArchiveError> {
        if slots.len() != TOTAL_SLOTS {
            return Err(ArchiveError::SizeMismatch {
                expected: TOTAL_SLOTS,
                found: slots.len(),
            });
        }
        let mut slots = slots.into_iter();
        let (Some(current), Some(accumulator)) = (slots.next(), slots.next()) else {
            return Err(ArchiveError::SizeMismatch {
                expected: TOTAL_SLOTS,
                found: 0,
            });
        };
        let regions = Granularity::ALL.map(|granularity| {
            slots
                .by_ref()
                .take(granularity.slot_count())
                .collect::<VecDeque<_>>()
        });
        Ok(Self {
            current,
            accumulator,
            regions,
        })
    }

    /// Every slot in storage order: current, accumulator, day, week, month, year.
    pub fn slots(&self) -> impl Iterator<Item = &S> + '_ {
        iter::once(&self.current)
            .chain(iter::once(&self.accumulator))
            .chain(self.regions.iter().flatten())
    }

    pub fn current(&self) -> &S {
        &self.current
    }

    pub fn accumulator(&self) -> &S {
        &self.accumulator
    }

    pub fn region(&self, granularity: Granularity) -> &VecDeque<S> {
        &self.regions[granularity as usize]
    }

    /// Time of the most recent sample.
    pub fn latest_time(&self) -> i64 {
        self.current.time()
    }

    /// Fold a new sample in.
    ///
    /// Samples not newer than the current one are ignored. Returns `false`
    /// and leaves the archive untouched when `sample` is of another kind.
    pub fn insert(&mut self, sample: S) -> bool {
        if !self.current.same_kind(&sample) {
            return false;
        }
        if sample.time() > self.current.time() {
            let gap = sample
                .time()
                .saturating_sub(self.region(Granularity::Day)[0].time());
            if gap > ARCHIVE_SPAN {
                debug!(
                    "gap of more than {}s before {}, reseeding archive",
                    ARCHIVE_SPAN,
                    sample.time()
                );
                *self = Self::new(sample);
                return true;
            }
            self.accumulator.merge(&sample);
            self.current = sample;
        }

        let mut shifted = false;
        while self
            .accumulator
            .time()
            .saturating_sub(self.region(Granularity::Day)[0].time())
            > DAY_PERIOD
        {
            self.shift_day();
            shifted = true;
        }
        if shifted {
            self.accumulator = self.accumulator.placeholder(0);
        }
        true
    }

    fn shift_day(&mut self) {
        let mut head = self.accumulator.clone();
        head.set_time(Granularity::Day.truncate(head.time()));

        let day = &mut self.regions[Granularity::Day as usize];
        day.pop_back();
        if let Some(previous) = day.front() {
            // A gap is filled one period at a time with copies of the accumulator.
            if head.time().saturating_sub(previous.time()) > DAY_PERIOD {
                head.set_time(previous.time().saturating_add(DAY_PERIOD));
            }
        }
        let boundary = Granularity::classify(head.time());
        trace!("day slot {} ({} boundary)", head.time(), boundary);
        day.push_front(head);

        if boundary == Granularity::Year {
            self.push_folded(Granularity::Year, YEAR_FOLD);
        }
        if boundary >= Granularity::Month {
            self.push_folded(Granularity::Month, MONTH_FOLD);
        }
        if boundary >= Granularity::Week {
            self.push_folded(Granularity::Week, WEEK_FOLD);
        }
    }

    /// Push the average of the newest `count` valid day slots onto `target`.
    fn push_folded(&mut self, target: Granularity, count: usize) {
        let mut folded = self.accumulator.placeholder(0);
        for sample in self
            .region(Granularity::Day)
            .iter()
            .take(count)
            .take_while(|s| s.is_valid())
        {
            folded.merge(sample);
        }

        let region = &mut self.regions[target as usize];
        region.pop_back();
        region.push_front(folded);
    }

    /// Valid samples of one region, newest first.
    ///
    /// The day view reports the latest sample time on its first entry.
    pub fn query(&self, granularity: Granularity) -> Vec<S> {
        let mut samples: Vec<S> = self
            .region(granularity)
            .iter()
            .take_while(|s| s.is_valid())
            .cloned()
            .collect();
        if granularity == Granularity::Day {
            if let Some(first) = samples.first_mut() {
                first.set_time(self.current.time());
            }
        }
        samples
    }
}

impl RollingArchive<DeviceSample> {
    pub fn kind(&self) -> SampleKind {
        self.current.kind()
    }
}

/// Archives for every known device.
///
/// Each entry is locked independently, so inserts for different devices do
/// not contend.
#[derive(Debug, Default)]
pub struct ArchiveRegistry {
    archives: DashMap<DeviceAddress, RollingArchive>,
}

impl ArchiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a sample, creating the archive on first sight of `address`.
    ///
    /// Returns `false` when the sample kind does not match the existing archive.
    pub fn insert(&self, address: DeviceAddress, sample: DeviceSample) -> bool {
        match self.archives.entry(address) {
            Entry::Occupied(mut entry) => {
                let archive = entry.get_mut();
                let kind = sample.kind();
                if !archive.insert(sample) {
                    warn!(
                        "[{}] dropping {} sample for {} archive",
                        address,
                        kind,
                        archive.kind()
                    );
                    return false;
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(RollingArchive::new(sample));
            }
        }
        true
    }

    /// Install an archive loaded from a cache, replacing any existing one.
    pub fn restore(&self, address: DeviceAddress, archive: RollingArchive) {
        self.archives.insert(address, archive);
    }

    pub fn query(&self, address: &DeviceAddress, granularity: Granularity) -> Vec<DeviceSample> {
        self.archives
            .get(address)
            .map(|archive| archive.query(granularity))
            .unwrap_or_default()
    }

    pub fn latest_time(&self, address: &DeviceAddress) -> Option<i64> {
        self.archives.get(address).map(|a| a.latest_time())
    }

    /// Copy of one archive, for serialization outside the entry lock.
    pub fn snapshot(&self, address: &DeviceAddress) -> Option<RollingArchive> {
        self.archives.get(address).map(|a| a.clone())
    }

    /// Known addresses in ascending order.
    pub fn addresses(&self) -> Vec<DeviceAddress> {
        let mut addresses: Vec<_> = self.archives.iter().map(|e| *e.key()).collect();
        addresses.sort();
        addresses
    }

    pub fn len(&self) -> usize {
        self.archives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archives.is_empty()
    }
}
