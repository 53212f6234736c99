//! Per-timeframe candle history, replay frontier and point-in-time snapshots.

use crate::domain::candle::{Candle, Timeframe};
use crate::domain::error::SeriesError;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Ordered, append-only candle history for one (asset, timeframe) pair.
#[derive(Debug, Clone)]
pub struct TimeframeSeries {
    pub asset: String,
    pub timeframe: Timeframe,
    candles: Vec<Candle>,
}

impl TimeframeSeries {
    pub fn new(asset: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            asset: asset.into(),
            timeframe,
            candles: Vec::new(),
        }
    }

    /// Build a series from unsorted candles. Sorting happens first, so only
    /// duplicated close times are rejected.
    pub fn from_candles(
        asset: impl Into<String>,
        timeframe: Timeframe,
        mut candles: Vec<Candle>,
    ) -> Result<Self, SeriesError> {
        candles.sort_by_key(|c| c.close_time);
        let mut series = Self::new(asset, timeframe);
        for candle in candles {
            series.push(candle)?;
        }
        Ok(series)
    }

    /// Append a candle; its close_time must be strictly after the last one.
    pub fn push(&mut self, candle: Candle) -> Result<(), SeriesError> {
        if candle.close_time < candle.open_time {
            return Err(SeriesError::Inverted {
                close_time: candle.close_time.to_rfc3339(),
            });
        }
        if let Some(last) = self.candles.last() {
            if candle.close_time == last.close_time {
                return Err(SeriesError::Duplicate {
                    close_time: candle.close_time.to_rfc3339(),
                });
            }
            if candle.close_time < last.close_time {
                return Err(SeriesError::OutOfOrder {
                    close_time: candle.close_time.to_rfc3339(),
                    last: last.close_time.to_rfc3339(),
                });
            }
        }
        self.candles.push(candle);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    /// Number of candles whose close_time is at or before `t`.
    pub fn count_closed_at(&self, t: DateTime<Utc>) -> usize {
        self.candles.partition_point(|c| c.close_time <= t)
    }

    /// The prefix of candles closed at `t`.
    pub fn closed_at(&self, t: DateTime<Utc>) -> &[Candle] {
        &self.candles[..self.count_closed_at(t)]
    }
}

/// Frontier pointer over a series used during replay.
///
/// The frontier only moves forward; `visible` never exposes a candle closing
/// after the latest time passed to [`advance_to`](Self::advance_to).
#[derive(Debug, Clone)]
pub struct ReplayCursor<'a> {
    series: &'a TimeframeSeries,
    frontier: usize,
}

impl<'a> ReplayCursor<'a> {
    pub fn new(series: &'a TimeframeSeries) -> Self {
        Self {
            series,
            frontier: 0,
        }
    }

    /// Move the frontier to cover every candle closed at `t`.
    /// Returns how many candles became visible.
    pub fn advance_to(&mut self, t: DateTime<Utc>) -> usize {
        let candles = self.series.candles();
        let start = self.frontier;
        while self.frontier < candles.len() && candles[self.frontier].close_time <= t {
            self.frontier += 1;
        }
        self.frontier - start
    }

    pub fn frontier(&self) -> usize {
        self.frontier
    }

    pub fn visible(&self) -> &'a [Candle] {
        &self.series.candles()[..self.frontier]
    }

    /// The newest visible candle, if its close_time is exactly `t`.
    pub fn closing_at(&self, t: DateTime<Utc>) -> Option<&'a Candle> {
        self.visible().last().filter(|c| c.close_time == t)
    }
}

/// All timeframe series of a single asset.
#[derive(Debug, Clone)]
pub struct AssetSeries {
    pub asset: String,
    pub monthly: TimeframeSeries,
    pub weekly: TimeframeSeries,
    pub daily: TimeframeSeries,
    pub h4: TimeframeSeries,
}

impl AssetSeries {
    pub fn new(asset: impl Into<String>) -> Self {
        let asset = asset.into();
        Self {
            monthly: TimeframeSeries::new(asset.clone(), Timeframe::Monthly),
            weekly: TimeframeSeries::new(asset.clone(), Timeframe::Weekly),
            daily: TimeframeSeries::new(asset.clone(), Timeframe::Daily),
            h4: TimeframeSeries::new(asset.clone(), Timeframe::H4),
            asset,
        }
    }

    pub fn get(&self, timeframe: Timeframe) -> &TimeframeSeries {
        match timeframe {
            Timeframe::Monthly => &self.monthly,
            Timeframe::Weekly => &self.weekly,
            Timeframe::Daily => &self.daily,
            Timeframe::H4 => &self.h4,
        }
    }

    pub fn get_mut(&mut self, timeframe: Timeframe) -> &mut TimeframeSeries {
        match timeframe {
            Timeframe::Monthly => &mut self.monthly,
            Timeframe::Weekly => &mut self.weekly,
            Timeframe::Daily => &mut self.daily,
            Timeframe::H4 => &mut self.h4,
        }
    }

    /// Snapshot of everything closed at `as_of`.
    pub fn snapshot(&self, as_of: DateTime<Utc>) -> SeriesSnapshot<'_> {
        SeriesSnapshot {
            as_of,
            monthly: self.monthly.closed_at(as_of),
            weekly: self.weekly.closed_at(as_of),
            daily: self.daily.closed_at(as_of),
            h4: self.h4.closed_at(as_of),
        }
    }
}

/// Point-in-time view of one asset across timeframes.
///
/// Every slice only holds candles with `close_time <= as_of`.
#[derive(Debug, Clone, Copy)]
pub struct SeriesSnapshot<'a> {
    as_of: DateTime<Utc>,
    monthly: &'a [Candle],
    weekly: &'a [Candle],
    daily: &'a [Candle],
    h4: &'a [Candle],
}

impl<'a> SeriesSnapshot<'a> {
    /// Build from raw slices, dropping any candle not closed at `as_of`.
    /// Slices must be ordered by close_time.
    pub fn from_slices(
        as_of: DateTime<Utc>,
        monthly: &'a [Candle],
        weekly: &'a [Candle],
        daily: &'a [Candle],
        h4: &'a [Candle],
    ) -> Self {
        let closed = |s: &'a [Candle]| &s[..s.partition_point(|c| c.close_time <= as_of)];
        Self {
            as_of,
            monthly: closed(monthly),
            weekly: closed(weekly),
            daily: closed(daily),
            h4: closed(h4),
        }
    }

    pub fn as_of(&self) -> DateTime<Utc> {
        self.as_of
    }

    pub fn monthly(&self) -> &'a [Candle] {
        self.monthly
    }

    pub fn weekly(&self) -> &'a [Candle] {
        self.weekly
    }

    pub fn daily(&self) -> &'a [Candle] {
        self.daily
    }

    pub fn h4(&self) -> &'a [Candle] {
        self.h4
    }

    pub fn get(&self, timeframe: Timeframe) -> &'a [Candle] {
        match timeframe {
            Timeframe::Monthly => self.monthly,
            Timeframe::Weekly => self.weekly,
            Timeframe::Daily => self.daily,
            Timeframe::H4 => self.h4,
        }
    }
}

/// Sorted, de-duplicated H4 close times across assets; the replay clock.
pub fn build_unified_timeline<'a>(
    assets: impl IntoIterator<Item = &'a AssetSeries>,
) -> Vec<DateTime<Utc>> {
    let unique: BTreeSet<DateTime<Utc>> = assets
        .into_iter()
        .flat_map(|a| a.h4.candles().iter().map(|c| c.close_time))
        .collect();
    unique.into_iter().collect()
}
