//! Groups irregular raw readings into fixed-width display slots.
//!
//! Bucket edges sit on multiples of the bucket width counted from the Unix
//! epoch on the display timezone's wall clock, so sliding the requested
//! window never moves them and a local day stays one bucket across a
//! daylight saving change. Buckets without a single usable value are left
//! out.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::{
    model::{MetricStats, RangeSelector, RawReading, Slot},
    ranges::{classify, Metric},
};

pub const TIMESTAMP_LOCAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Label pattern for a slot of the given range.
pub fn label_format(range: RangeSelector) -> &'static str {
    match range {
        RangeSelector::FiveMinutes
        | RangeSelector::FifteenMinutes
        | RangeSelector::OneHour => "%H:%M",
        RangeSelector::Latest
        | RangeSelector::OneDay
        | RangeSelector::TwoDays => "%d/%m %H:%M",
        RangeSelector::SevenDays | RangeSelector::ThirtyDays => "%d/%m/%Y",
    }
}

/// Aggregates with UTC labels and UTC-anchored buckets.
pub fn aggregate(readings: &[RawReading], range: RangeSelector) -> Vec<Slot> {
    aggregate_in(readings, range, &Utc)
}

/// Aggregates with labels and bucket edges in `tz`.
pub fn aggregate_in<Tz: TimeZone>(
    readings: &[RawReading],
    range: RangeSelector,
    tz: &Tz,
) -> Vec<Slot> {
    let Some(width) = range.bucket_seconds() else {
        return latest_slot(readings, tz).into_iter().collect();
    };

    // keyed by local wall-clock start, which also orders them
    let mut buckets: BTreeMap<NaiveDateTime, Bucket> = BTreeMap::new();
    for reading in readings {
        if let Some(start) = local_bucket_start(&reading.timestamp, width, tz)
        {
            buckets.entry(start).or_default().push(reading);
        }
    }

    buckets
        .into_iter()
        .filter_map(|(local_start, bucket)| {
            bucket.into_slot(local_start, range, tz)
        })
        .collect()
}

/// Wall-clock start of the bucket holding `timestamp` in `tz`.
fn local_bucket_start<Tz: TimeZone>(
    timestamp: &DateTime<Utc>,
    width: i64,
    tz: &Tz,
) -> Option<NaiveDateTime> {
    let local =
        timestamp.with_timezone(tz).naive_local().and_utc().timestamp();
    let start = local.div_euclid(width) * width;
    DateTime::from_timestamp(start, 0).map(|start| start.naive_utc())
}

fn latest_slot<Tz: TimeZone>(readings: &[RawReading], tz: &Tz) -> Option<Slot> {
    let latest = readings.iter().max_by_key(|r| r.timestamp)?;

    let mut bucket = Bucket::default();
    bucket.push(latest);
    let local = latest.timestamp.with_timezone(tz).naive_local();
    let mut slot = bucket.into_slot(local, RangeSelector::Latest, tz)?;
    slot.bucket_start = Some(latest.timestamp);
    Some(slot)
}

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    min: f64,
    max: f64,
    mean: f64,
    count: u32,
}

impl Accumulator {
    fn new(value: f64) -> Self {
        Accumulator {
            min: value,
            max: value,
            mean: value,
            count: 1,
        }
    }

    fn push(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.count += 1;
        // running mean stays finite where a plain sum could overflow
        let count = f64::from(self.count);
        self.mean += value / count - self.mean / count;
    }

    fn stats(&self, metric: Metric) -> MetricStats {
        MetricStats {
            min: self.min,
            avg: self.mean,
            max: self.max,
            out_of_range: classify(metric, Some(self.min))
                || classify(metric, Some(self.max)),
        }
    }
}

#[derive(Debug, Default)]
struct Bucket {
    metrics: BTreeMap<Metric, Accumulator>,
    earliest: Option<DateTime<Utc>>,
}

impl Bucket {
    fn push(&mut self, reading: &RawReading) {
        self.earliest = Some(match self.earliest {
            Some(earliest) => earliest.min(reading.timestamp),
            None => reading.timestamp,
        });
        for metric in Metric::ALL {
            let Some(value) = reading.value(metric) else {
                continue;
            };
            self.metrics
                .entry(metric)
                .and_modify(|acc| acc.push(value))
                .or_insert_with(|| Accumulator::new(value));
        }
    }

    fn into_slot<Tz: TimeZone>(
        self,
        local_start: NaiveDateTime,
        range: RangeSelector,
        tz: &Tz,
    ) -> Option<Slot> {
        if self.metrics.is_empty() {
            return None;
        }

        // a start inside a skipped hour falls back to the first sample
        let start = tz
            .from_local_datetime(&local_start)
            .earliest()
            .map(|start| start.with_timezone(&Utc))
            .or(self.earliest);

        let mut slot = Slot::new(
            local_start.format(label_format(range)).to_string(),
            local_start.format(TIMESTAMP_LOCAL_FORMAT).to_string(),
        );
        slot.bucket_start = start;

        for (metric, acc) in self.metrics {
            slot.set_stats(metric, acc.stats(metric));
        }

        Some(slot)
    }
}
