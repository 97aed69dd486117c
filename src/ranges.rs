//! Normal operating bands for every soil/climate metric and the
//! classifier/formatter built on them. Aggregation and display both call
//! into this table, so "anomalous" means the same thing everywhere.

use std::{fmt, io, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::helpers::parse_metric_value;

/// Placeholder rendered for missing values.
pub const MISSING_VALUE: &str = "-";

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Temperature,
    Moisture,
    Ec,
    Ph,
    N,
    P,
    K,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::Temperature,
        Metric::Moisture,
        Metric::Ec,
        Metric::Ph,
        Metric::N,
        Metric::P,
        Metric::K,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Moisture => "moisture",
            Metric::Ec => "ec",
            Metric::Ph => "ph",
            Metric::N => "n",
            Metric::P => "p",
            Metric::K => "k",
        }
    }

    pub fn range(&self) -> &'static MetricRange {
        match self {
            Metric::Temperature => &METRIC_RANGES[0],
            Metric::Moisture => &METRIC_RANGES[1],
            Metric::Ec => &METRIC_RANGES[2],
            Metric::Ph => &METRIC_RANGES[3],
            Metric::N => &METRIC_RANGES[4],
            Metric::P => &METRIC_RANGES[5],
            Metric::K => &METRIC_RANGES[6],
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Metric {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<Metric, Self::Err> {
        match value {
            "temperature" => Ok(Metric::Temperature),
            "moisture" => Ok(Metric::Moisture),
            "ec" => Ok(Metric::Ec),
            "ph" => Ok(Metric::Ph),
            "n" => Ok(Metric::N),
            "p" => Ok(Metric::P),
            "k" => Ok(Metric::K),
            _ => Err(io::Error::other("Metric not supported")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricRange {
    pub metric: Metric,
    pub min: f64,
    pub max: f64,
    pub unit: &'static str,
}

impl MetricRange {
    /// Values on the boundary are in range.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

pub static METRIC_RANGES: [MetricRange; 7] = [
    MetricRange {
        metric: Metric::Temperature,
        min: 15.0,
        max: 35.0,
        unit: "°C",
    },
    MetricRange {
        metric: Metric::Moisture,
        min: 20.0,
        max: 90.0,
        unit: "%",
    },
    MetricRange {
        metric: Metric::Ec,
        min: 0.2,
        max: 3.0,
        unit: "µS/cm",
    },
    MetricRange {
        metric: Metric::Ph,
        min: 5.5,
        max: 7.5,
        unit: "",
    },
    MetricRange {
        metric: Metric::N,
        min: 0.0,
        max: 200.0,
        unit: "mg/kg",
    },
    MetricRange {
        metric: Metric::P,
        min: 0.0,
        max: 200.0,
        unit: "mg/kg",
    },
    MetricRange {
        metric: Metric::K,
        min: 0.0,
        max: 300.0,
        unit: "mg/kg",
    },
];

/// Looks a range up by metric key; unknown keys have none.
pub fn range_for(metric: &str) -> Option<&'static MetricRange> {
    Metric::from_str(metric).ok().map(|m| m.range())
}

/// Typed classification used by aggregation. Absent values are never
/// out of range.
pub fn classify(metric: Metric, value: Option<f64>) -> bool {
    match value {
        Some(v) if v.is_finite() => !metric.range().contains(v),
        _ => false,
    }
}

/// True iff `value` is a usable number outside the metric's band.
/// Missing, non-numeric and unknown-metric inputs are never out of range.
pub fn is_out_of_range(metric: &str, value: &Value) -> bool {
    match Metric::from_str(metric) {
        Ok(metric) => classify(metric, parse_metric_value(value)),
        Err(_) => false,
    }
}

/// Renders a value for tables and tooltips: two decimals plus unit,
/// `"-"` when missing, and the raw text for anything non-numeric.
pub fn format_value(metric: &str, value: &Value) -> String {
    if value.is_null() {
        return MISSING_VALUE.to_string();
    }

    match parse_metric_value(value) {
        Some(number) => {
            let unit = range_for(metric).map(|r| r.unit).unwrap_or("");
            format_number(number, unit)
        },
        None => match value {
            Value::String(s) => s.to_owned(),
            other => other.to_string(),
        },
    }
}

pub fn format_number(number: f64, unit: &str) -> String {
    if unit.is_empty() {
        format!("{:.2}", number)
    } else {
        format!("{:.2} {}", number, unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_temperature_boundaries() {
        assert!(!is_out_of_range("temperature", &json!(15)));
        assert!(is_out_of_range("temperature", &json!(14.999)));
        assert!(!is_out_of_range("temperature", &json!(35)));
        assert!(is_out_of_range("temperature", &json!(35.001)));
        assert!(!is_out_of_range("temperature", &json!(null)));
    }

    #[test]
    fn test_other_ranges() {
        assert!(is_out_of_range("moisture", &json!(19.9)));
        assert!(!is_out_of_range("ec", &json!(0.2)));
        assert!(is_out_of_range("ec", &json!(3.01)));
        assert!(is_out_of_range("ph", &json!(7.6)));
        assert!(is_out_of_range("n", &json!(-1)));
        assert!(!is_out_of_range("p", &json!(200)));
        assert!(!is_out_of_range("k", &json!(300)));
        assert!(is_out_of_range("k", &json!(300.5)));
    }

    #[test]
    fn test_fails_open() {
        assert!(!is_out_of_range("salinity", &json!(1_000_000)));
        assert!(!is_out_of_range("temperature", &json!("hot")));
        assert!(!is_out_of_range("temperature", &json!({"v": 99})));
        assert!(is_out_of_range("temperature", &json!("40")));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value("temperature", &json!(21.456)), "21.46 °C");
        assert_eq!(format_value("moisture", &json!("45")), "45.00 %");
        assert_eq!(format_value("ph", &json!(6.5)), "6.50");
        assert_eq!(format_value("salinity", &json!(2)), "2.00");
        assert_eq!(format_value("temperature", &json!(null)), MISSING_VALUE);
        assert_eq!(format_value("temperature", &json!("offline")), "offline");
        assert_eq!(format_value("k", &json!(true)), "true");
    }

    #[test]
    fn test_table_matches_metric() {
        for metric in Metric::ALL {
            assert_eq!(metric.range().metric, metric);
            assert_eq!(range_for(metric.as_str()), Some(metric.range()));
        }
    }
}
