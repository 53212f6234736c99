//! Price-structure primitives shared by the confluence pillars.

use crate::domain::candle::Candle;
use crate::domain::scan::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Bullish,
    Bearish,
    Mixed,
}

impl Trend {
    pub fn direction(self) -> Direction {
        match self {
            Trend::Bullish => Direction::Long,
            Trend::Bearish => Direction::Short,
            Trend::Mixed => Direction::None,
        }
    }
}

/// A confirmed pivot: `index` into the slice it was found in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwingPoint {
    pub index: usize,
    pub price: f64,
}

fn pivots(candles: &[Candle], strength: usize, value: fn(&Candle) -> f64, above: bool) -> Vec<SwingPoint> {
    if strength == 0 || candles.len() < 2 * strength + 1 {
        return Vec::new();
    }
    let mut out = Vec::new();
    for i in strength..candles.len() - strength {
        let v = value(&candles[i]);
        let is_pivot = (i - strength..=i + strength)
            .filter(|&j| j != i)
            .all(|j| {
                let other = value(&candles[j]);
                if above { v > other } else { v < other }
            });
        if is_pivot {
            out.push(SwingPoint { index: i, price: v });
        }
    }
    out
}

/// Candles whose high is strictly above the `strength` neighbours on each side.
pub fn swing_highs(candles: &[Candle], strength: usize) -> Vec<SwingPoint> {
    pivots(candles, strength, |c| c.high, true)
}

/// Candles whose low is strictly below the `strength` neighbours on each side.
pub fn swing_lows(candles: &[Candle], strength: usize) -> Vec<SwingPoint> {
    pivots(candles, strength, |c| c.low, false)
}

fn last_two(points: &[SwingPoint]) -> Option<(f64, f64)> {
    match points {
        [.., prev, last] => Some((prev.price, last.price)),
        _ => None,
    }
}

/// Trend from the last two swing highs and lows only.
///
/// `None` when there are fewer than two pivots of either kind.
pub fn structure_trend(candles: &[Candle], strength: usize) -> Option<Trend> {
    let (prev_high, last_high) = last_two(&swing_highs(candles, strength))?;
    let (prev_low, last_low) = last_two(&swing_lows(candles, strength))?;
    Some(if last_high > prev_high && last_low > prev_low {
        Trend::Bullish
    } else if last_high < prev_high && last_low < prev_low {
        Trend::Bearish
    } else {
        Trend::Mixed
    })
}

/// Trend over the last `window` candles.
///
/// Pivot structure decides when available; otherwise the close-to-close
/// change across the window must exceed `slope_min_pct`.
pub fn infer_trend(candles: &[Candle], strength: usize, window: usize, slope_min_pct: f64) -> Trend {
    let start = candles.len().saturating_sub(window);
    let recent = &candles[start..];
    if let Some(trend) = structure_trend(recent, strength) {
        return trend;
    }
    let (Some(first), Some(last)) = (recent.first(), recent.last()) else {
        return Trend::Mixed;
    };
    if first.close <= 0.0 {
        return Trend::Mixed;
    }
    let change = (last.close - first.close) / first.close;
    if change > slope_min_pct {
        Trend::Bullish
    } else if change < -slope_min_pct {
        Trend::Bearish
    } else {
        Trend::Mixed
    }
}

/// Latest Wilder-smoothed ATR; seeded with the mean true range of the first
/// `period` candles.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let tr = |i: usize| {
        if i == 0 {
            candles[0].range()
        } else {
            candles[i].true_range(candles[i - 1].close)
        }
    };
    let mut value = (0..period).map(tr).sum::<f64>() / period as f64;
    for i in period..candles.len() {
        value = (value * (period - 1) as f64 + tr(i)) / period as f64;
    }
    Some(value)
}

/// Highest high and lowest low over a lookback window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpulseLeg {
    pub high: f64,
    pub high_index: usize,
    pub low: f64,
    pub low_index: usize,
}

impl ImpulseLeg {
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Low printed before the high.
    pub fn is_upswing(&self) -> bool {
        self.high_index > self.low_index
    }

    /// Retracement fraction of `price` against a leg running in `direction`.
    ///
    /// `None` if the leg points the other way or is flat.
    pub fn retracement(&self, price: f64, direction: Direction) -> Option<f64> {
        let range = self.range();
        if range <= 0.0 {
            return None;
        }
        match direction {
            Direction::Long if self.is_upswing() => Some((self.high - price) / range),
            Direction::Short if !self.is_upswing() => Some((price - self.low) / range),
            _ => None,
        }
    }
}

/// Leg spanning the last `lookback` candles; indices are into `candles`.
pub fn impulse_leg(candles: &[Candle], lookback: usize) -> Option<ImpulseLeg> {
    if lookback < 2 || candles.len() < lookback {
        return None;
    }
    let start = candles.len() - lookback;
    let mut leg = ImpulseLeg {
        high: f64::MIN,
        high_index: start,
        low: f64::MAX,
        low_index: start,
    };
    for (i, c) in candles.iter().enumerate().skip(start) {
        if c.high > leg.high {
            leg.high = c.high;
            leg.high_index = i;
        }
        if c.low < leg.low {
            leg.low = c.low;
            leg.low_index = i;
        }
    }
    Some(leg)
}

/// True when `c` closes beyond `prev` in `direction` and engulfs its body.
pub fn is_engulfing(prev: &Candle, c: &Candle, direction: Direction) -> bool {
    match direction {
        Direction::Long => {
            prev.is_bearish()
                && c.is_bullish()
                && c.open <= prev.close
                && c.close >= prev.open
                && c.body() > prev.body()
        }
        Direction::Short => {
            prev.is_bullish()
                && c.is_bearish()
                && c.open >= prev.close
                && c.close <= prev.open
                && c.body() > prev.body()
        }
        Direction::None => false,
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use chrono::Duration;

    fn zigzag(points: &[f64]) -> Vec<Candle> {
        from_closes(points, Duration::days(1), 0.5)
    }

    #[test]
    fn detects_pivots() {
        let candles = zigzag(&[10.0, 12.0, 14.0, 12.0, 10.0, 12.0, 14.0]);
        let highs = swing_highs(&candles, 2);
        assert_eq!(highs.len(), 1);
        assert_eq!(highs[0].index, 2);
        let lows = swing_lows(&candles, 2);
        assert_eq!(lows.len(), 1);
        assert_eq!(lows[0].index, 4);
    }

    #[test]
    fn pivots_need_neighbours_on_both_sides() {
        let candles = zigzag(&[10.0, 12.0, 14.0]);
        assert!(swing_highs(&candles, 2).is_empty());
        assert!(swing_highs(&candles, 0).is_empty());
    }

    #[test]
    fn rising_structure_is_bullish() {
        let candles = zigzag(&[
            10.0, 12.0, 14.0, 12.0, 11.0, 13.0, 16.0, 14.0, 13.0, 15.0, 18.0, 16.0, 15.0,
        ]);
        assert_eq!(structure_trend(&candles, 2), Some(Trend::Bullish));
        assert_eq!(infer_trend(&candles, 2, 50, 0.01), Trend::Bullish);
    }

    #[test]
    fn falling_structure_is_bearish() {
        let candles = zigzag(&[
            18.0, 16.0, 14.0, 16.0, 17.0, 15.0, 12.0, 14.0, 15.0, 13.0, 10.0, 12.0, 13.0,
        ]);
        assert_eq!(structure_trend(&candles, 2), Some(Trend::Bearish));
    }

    #[test]
    fn slope_fallback_without_pivots() {
        let up = zigzag(&[10.0, 10.5, 11.0, 11.5]);
        assert_eq!(structure_trend(&up, 2), None);
        assert_eq!(infer_trend(&up, 2, 10, 0.01), Trend::Bullish);

        let flat = zigzag(&[10.0, 10.01, 10.0, 10.02]);
        assert_eq!(infer_trend(&flat, 2, 10, 0.01), Trend::Mixed);
        assert_eq!(infer_trend(&[], 2, 10, 0.01), Trend::Mixed);
    }

    #[test]
    fn atr_constant_range() {
        let candles: Vec<Candle> = (0..20)
            .map(|i| bar(i, Duration::hours(4), 100.0, 110.0, 90.0, 100.0))
            .collect();
        assert!((atr(&candles, 14).unwrap() - 20.0).abs() < 1e-9);
        assert!(atr(&candles[..5], 14).is_none());
    }

    #[test]
    fn atr_wilder_step() {
        // TR: 10, 10, 10, then 40 via gap
        let candles = vec![
            bar(0, Duration::hours(4), 105.0, 110.0, 100.0, 105.0),
            bar(1, Duration::hours(4), 105.0, 110.0, 100.0, 105.0),
            bar(2, Duration::hours(4), 105.0, 110.0, 100.0, 105.0),
            bar(3, Duration::hours(4), 140.0, 145.0, 140.0, 142.0),
        ];
        let expected = (10.0 * 2.0 + 40.0) / 3.0;
        assert!((atr(&candles, 3).unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn impulse_leg_and_retracement() {
        let candles = vec![
            bar(0, Duration::days(1), 10.0, 12.0, 9.5, 11.0),
            bar(1, Duration::days(1), 11.0, 11.5, 7.0, 8.0),
            bar(2, Duration::days(1), 8.0, 17.0, 8.0, 16.0),
            bar(3, Duration::days(1), 16.0, 16.5, 12.0, 12.5),
        ];
        let leg = impulse_leg(&candles, 4).unwrap();
        assert_eq!((leg.low, leg.low_index), (7.0, 1));
        assert_eq!((leg.high, leg.high_index), (17.0, 2));
        assert!(leg.is_upswing());
        let r = leg.retracement(12.0, Direction::Long).unwrap();
        assert!((r - 0.5).abs() < 1e-9);
        assert!(leg.retracement(12.0, Direction::Short).is_none());
    }

    #[test]
    fn engulfing_patterns() {
        let prev = bar(0, Duration::hours(4), 10.0, 10.2, 9.4, 9.5);
        let bull = bar(1, Duration::hours(4), 9.4, 10.6, 9.3, 10.5);
        assert!(is_engulfing(&prev, &bull, Direction::Long));
        assert!(!is_engulfing(&prev, &bull, Direction::Short));

        let prev = bar(0, Duration::hours(4), 9.5, 10.1, 9.4, 10.0);
        let bear = bar(1, Duration::hours(4), 10.1, 10.2, 9.2, 9.3);
        assert!(is_engulfing(&prev, &bear, Direction::Short));
    }
}
