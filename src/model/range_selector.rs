use std::{fmt, str::FromStr};

use crate::error::Error;

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// History window picked in the dashboard. The backend decides which
/// samples fall in the window; the selector here only fixes how they are
/// grouped for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RangeSelector {
    Latest,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    #[default]
    OneDay,
    TwoDays,
    SevenDays,
    ThirtyDays,
}

impl RangeSelector {
    pub fn as_str(&self) -> &'static str {
        match self {
            RangeSelector::Latest => "latest",
            RangeSelector::FiveMinutes => "5m",
            RangeSelector::FifteenMinutes => "15m",
            RangeSelector::OneHour => "1h",
            RangeSelector::OneDay => "24h",
            RangeSelector::TwoDays => "2d",
            RangeSelector::SevenDays => "7d",
            RangeSelector::ThirtyDays => "30d",
        }
    }

    /// Width of one display bucket in seconds, `None` for `latest`.
    pub fn bucket_seconds(&self) -> Option<i64> {
        match self {
            RangeSelector::Latest => None,
            RangeSelector::FiveMinutes
            | RangeSelector::FifteenMinutes
            | RangeSelector::OneHour => Some(5 * MINUTE),
            RangeSelector::OneDay => Some(HOUR),
            RangeSelector::TwoDays => Some(4 * HOUR),
            RangeSelector::SevenDays => Some(DAY),
            RangeSelector::ThirtyDays => Some(7 * DAY),
        }
    }
}

impl fmt::Display for RangeSelector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RangeSelector {
    type Err = Error;

    fn from_str(value: &str) -> Result<RangeSelector, Self::Err> {
        match value {
            "latest" => Ok(RangeSelector::Latest),
            "5m" => Ok(RangeSelector::FiveMinutes),
            "15m" => Ok(RangeSelector::FifteenMinutes),
            "1h" => Ok(RangeSelector::OneHour),
            "24h" => Ok(RangeSelector::OneDay),
            "2d" => Ok(RangeSelector::TwoDays),
            "7d" => Ok(RangeSelector::SevenDays),
            "30d" => Ok(RangeSelector::ThirtyDays),
            other => Err(Error::InvalidOption {
                option: format!(
                    "range '{}'. Valid options: \
                     latest, 5m, 15m, 1h, 24h, 2d, 7d, 30d",
                    other
                ),
            }),
        }
    }
}
