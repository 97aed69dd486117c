use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{helpers::deserialize_metric, ranges::Metric};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricStats {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    /// Some sample in the bucket fell outside the metric's normal band.
    pub out_of_range: bool,
}

/// One chart/table row. The flat metric fields carry the bucket average
/// (`None` when the bucket had no usable sample for that metric); `stats`
/// carries min/avg/max per metric present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub label: String,
    pub timestamp_local: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_start: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_metric")]
    pub temperature: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_metric")]
    pub moisture: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_metric")]
    pub ec: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_metric")]
    pub ph: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_metric")]
    pub n: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_metric")]
    pub p: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_metric")]
    pub k: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stats: BTreeMap<Metric, MetricStats>,
}

impl Slot {
    pub fn new(label: String, timestamp_local: String) -> Self {
        Slot {
            label,
            timestamp_local,
            bucket_start: None,
            temperature: None,
            moisture: None,
            ec: None,
            ph: None,
            n: None,
            p: None,
            k: None,
            stats: BTreeMap::new(),
        }
    }

    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Temperature => self.temperature,
            Metric::Moisture => self.moisture,
            Metric::Ec => self.ec,
            Metric::Ph => self.ph,
            Metric::N => self.n,
            Metric::P => self.p,
            Metric::K => self.k,
        }
    }

    pub fn stats(&self, metric: Metric) -> Option<&MetricStats> {
        self.stats.get(&metric)
    }

    /// Records the statistics for `metric`; the flat field takes the average.
    pub fn set_stats(&mut self, metric: Metric, stats: MetricStats) {
        let field = match metric {
            Metric::Temperature => &mut self.temperature,
            Metric::Moisture => &mut self.moisture,
            Metric::Ec => &mut self.ec,
            Metric::Ph => &mut self.ph,
            Metric::N => &mut self.n,
            Metric::P => &mut self.p,
            Metric::K => &mut self.k,
        };
        *field = Some(stats.avg);
        self.stats.insert(metric, stats);
    }

    pub fn is_empty(&self) -> bool {
        Metric::ALL.iter().all(|m| self.value(*m).is_none())
    }
}
