//! Candle representation and timeframes.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The four timeframes the confluence engine reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    Monthly,
    Weekly,
    Daily,
    H4,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [
        Timeframe::Monthly,
        Timeframe::Weekly,
        Timeframe::Daily,
        Timeframe::H4,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Timeframe::Monthly => "M",
            Timeframe::Weekly => "W",
            Timeframe::Daily => "D",
            Timeframe::H4 => "H4",
        }
    }

    /// Close time of a candle opened at `open_time`.
    ///
    /// Months are calendar months, so a candle opened on the 1st closes on the
    /// 1st of the following month.
    pub fn close_time_for(self, open_time: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Timeframe::Monthly => open_time
                .checked_add_months(Months::new(1))
                .unwrap_or(open_time + Duration::days(31)),
            Timeframe::Weekly => open_time + Duration::weeks(1),
            Timeframe::Daily => open_time + Duration::days(1),
            Timeframe::H4 => open_time + Duration::hours(4),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "M" | "MN" | "MONTHLY" => Ok(Timeframe::Monthly),
            "W" | "WEEKLY" => Ok(Timeframe::Weekly),
            "D" | "DAILY" => Ok(Timeframe::Daily),
            "H4" | "4H" => Ok(Timeframe::H4),
            other => Err(format!("unknown timeframe '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// |close - open|
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// high - low
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// True once the candle can no longer change at time `t`.
    pub fn is_closed_at(&self, t: DateTime<Utc>) -> bool {
        self.close_time <= t
    }

    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }
}
