use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{helpers::deserialize_metric, ranges::Metric};

/// One sample as stored by the collector. Metric fields that are missing,
/// null or not coercible to a finite number read as `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    #[serde(default)]
    pub device: String,
    pub timestamp: DateTime<Utc>,
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
}

impl RawReading {
    pub fn new(device: &str, timestamp: DateTime<Utc>) -> Self {
        RawReading {
            device: device.to_owned(),
            timestamp,
            temperature: None,
            moisture: None,
            ec: None,
            ph: None,
            n: None,
            p: None,
            k: None,
        }
    }

    pub fn with(mut self, metric: Metric, value: f64) -> Self {
        *self.slot_mut(metric) = Some(value);
        self
    }

    pub fn value(&self, metric: Metric) -> Option<f64> {
        let value = match metric {
            Metric::Temperature => self.temperature,
            Metric::Moisture => self.moisture,
            Metric::Ec => self.ec,
            Metric::Ph => self.ph,
            Metric::N => self.n,
            Metric::P => self.p,
            Metric::K => self.k,
        };
        value.filter(|v| v.is_finite())
    }

    fn slot_mut(&mut self, metric: Metric) -> &mut Option<f64> {
        match metric {
            Metric::Temperature => &mut self.temperature,
            Metric::Moisture => &mut self.moisture,
            Metric::Ec => &mut self.ec,
            Metric::Ph => &mut self.ph,
            Metric::N => &mut self.n,
            Metric::P => &mut self.p,
            Metric::K => &mut self.k,
        }
    }
}

/// `deserialize_with` adapter for reading lists. An entry that is not a
/// valid reading, e.g. one with a malformed timestamp, is dropped instead
/// of failing the whole payload.
pub fn deserialize_readings<'de, D>(
    deserializer: D,
) -> Result<Vec<RawReading>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<Value>>::deserialize(deserializer)?;
    let values = values.unwrap_or_default();
    let total = values.len();

    let readings: Vec<RawReading> = values
        .into_iter()
        .filter_map(|value| serde_json::from_value(value).ok())
        .collect();

    if readings.len() < total {
        debug!(dropped = total - readings.len(), "skipped malformed readings");
    }
    Ok(readings)
}

/// Single-reading counterpart of [`deserialize_readings`].
pub fn deserialize_optional_reading<'de, D>(
    deserializer: D,
) -> Result<Option<RawReading>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| serde_json::from_value(value).ok()))
}
