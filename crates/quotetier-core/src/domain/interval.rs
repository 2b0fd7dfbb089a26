use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Granularity of a price observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "realtime")]
    RealTime,
    #[serde(rename = "1day")]
    OneDay,
    #[serde(rename = "1hour")]
    OneHour,
    #[serde(rename = "5min")]
    FiveMinutes,
    #[serde(rename = "1min")]
    OneMinute,
}

impl Interval {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RealTime => "realtime",
            Self::OneDay => "1day",
            Self::OneHour => "1hour",
            Self::FiveMinutes => "5min",
            Self::OneMinute => "1min",
        }
    }

    /// Whether this interval describes a bar series rather than a spot quote.
    pub const fn is_series(self) -> bool {
        !matches!(self, Self::RealTime)
    }
}

impl Display for Interval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "realtime" | "real-time" => Ok(Self::RealTime),
            "1day" | "1d" => Ok(Self::OneDay),
            "1hour" | "1h" | "60min" => Ok(Self::OneHour),
            "5min" | "5m" => Ok(Self::FiveMinutes),
            "1min" | "1m" => Ok(Self::OneMinute),
            other => Err(ValidationError::InvalidInterval {
                value: other.to_owned(),
            }),
        }
    }
}
