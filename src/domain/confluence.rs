//! Seven-pillar confluence evaluation over a multi-timeframe snapshot.
//!
//! Every pillar is computed independently from closed candles only; the
//! outcomes are combined once, through [`SetupStatus::grade`].

use crate::domain::candle::{Candle, Timeframe};
use crate::domain::profile::AccountProfile;
use crate::domain::scan::{Direction, Pillar, PillarScore, ScanResult, SetupStatus};
use crate::domain::series::SeriesSnapshot;
use crate::domain::structure::{
    atr, impulse_leg, infer_trend, is_engulfing, structure_trend, swing_highs, swing_lows, Trend,
};
use std::sync::Arc;
use tracing::debug;

/// Named thresholds for the pillar checks.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfluenceParams {
    /// Neighbours on each side a pivot must exceed.
    pub pivot_strength: usize,
    /// Candles per timeframe read by the HTF trend check.
    pub trend_window: usize,
    /// Minimum close-to-close change when the trend falls back to slope.
    pub trend_slope_min_pct: f64,
    pub atr_period: usize,
    /// Location band half-width, in daily ATRs.
    pub zone_tolerance_atr: f64,
    /// Daily candles spanned by the impulse leg.
    pub fib_lookback: usize,
    pub fib_min: f64,
    pub fib_max: f64,
    /// Two swing levels count as equal within this many ATRs.
    pub equal_level_tolerance_atr: f64,
    /// Price must sit within this many ATRs of equal highs/lows.
    pub liquidity_proximity_atr: f64,
    /// Candles checked for a fresh sweep.
    pub sweep_lookback: usize,
    /// Candles before the sweep whose extreme must be pierced.
    pub sweep_window: usize,
    pub confirmation_lookback: usize,
    /// Minimum body/range for a momentum candle.
    pub momentum_body_ratio: f64,
    /// Stop padding beyond the invalidation level, in daily ATRs.
    pub stop_buffer_atr: f64,
    pub max_targets: usize,
    pub min_monthly: usize,
    pub min_weekly: usize,
    pub min_daily: usize,
    pub min_h4: usize,
}

impl Default for ConfluenceParams {
    fn default() -> Self {
        Self {
            pivot_strength: 2,
            trend_window: 12,
            trend_slope_min_pct: 0.005,
            atr_period: 14,
            zone_tolerance_atr: 0.5,
            fib_lookback: 30,
            fib_min: 0.5,
            fib_max: 0.796,
            equal_level_tolerance_atr: 0.1,
            liquidity_proximity_atr: 1.0,
            sweep_lookback: 3,
            sweep_window: 20,
            confirmation_lookback: 5,
            momentum_body_ratio: 0.7,
            stop_buffer_atr: 0.25,
            max_targets: 3,
            min_monthly: 6,
            min_weekly: 8,
            min_daily: 30,
            min_h4: 30,
        }
    }
}

impl ConfluenceParams {
    /// Candles needed on `timeframe` before any pillar is evaluated.
    pub fn required_history(&self, timeframe: Timeframe) -> usize {
        match timeframe {
            Timeframe::Monthly => self.min_monthly,
            Timeframe::Weekly => self.min_weekly,
            Timeframe::Daily => self
                .min_daily
                .max(self.fib_lookback)
                .max(self.atr_period + 1),
            Timeframe::H4 => self
                .min_h4
                .max(self.atr_period + 1)
                .max(self.sweep_window + self.sweep_lookback)
                .max(self.confirmation_lookback + 1),
        }
    }
}

/// Anything that grades a snapshot into a [`ScanResult`].
pub trait SetupEvaluator: Send + Sync {
    fn evaluate(&self, asset: &str, snapshot: &SeriesSnapshot<'_>) -> ScanResult;

    /// Risk/reward floor applied when re-grading at a live price.
    fn min_risk_reward(&self) -> f64;
}

/// Stop and targets derived for the RiskReward pillar.
#[derive(Debug, Clone, PartialEq)]
pub struct TradePlan {
    pub stop_loss: f64,
    pub targets: Vec<f64>,
    pub risk_reward: f64,
}

#[derive(Debug, Clone)]
pub struct ConfluenceEvaluator {
    params: ConfluenceParams,
    profile: Arc<AccountProfile>,
}

impl ConfluenceEvaluator {
    pub fn new(params: ConfluenceParams, profile: Arc<AccountProfile>) -> Self {
        Self { params, profile }
    }

    pub fn params(&self) -> &ConfluenceParams {
        &self.params
    }

    fn missing_history(&self, snapshot: &SeriesSnapshot<'_>) -> Option<String> {
        Timeframe::ALL.iter().find_map(|&tf| {
            let have = snapshot.get(tf).len();
            let need = self.params.required_history(tf);
            (have < need).then(|| format!("insufficient {tf} history ({have} of {need})"))
        })
    }

    fn trend(&self, candles: &[Candle]) -> Trend {
        infer_trend(
            candles,
            self.params.pivot_strength,
            self.params.trend_window,
            self.params.trend_slope_min_pct,
        )
    }

    /// Pillar 1. Direction is the majority vote; passing needs unanimity.
    pub fn htf_bias(&self, snapshot: &SeriesSnapshot<'_>) -> (PillarScore, Direction) {
        let votes = [
            self.trend(snapshot.monthly()).direction(),
            self.trend(snapshot.weekly()).direction(),
            self.trend(snapshot.daily()).direction(),
        ];
        let longs = votes.iter().filter(|&&d| d == Direction::Long).count();
        let shorts = votes.iter().filter(|&&d| d == Direction::Short).count();
        let direction = if longs >= 2 {
            Direction::Long
        } else if shorts >= 2 {
            Direction::Short
        } else {
            Direction::None
        };
        let detail = format!("M={} W={} D={}", votes[0], votes[1], votes[2]);
        let passed = longs == 3 || shorts == 3;
        (PillarScore::check(Pillar::HtfBias, passed, detail), direction)
    }

    /// Pillar 2. Returns the matched zone as the invalidation level.
    pub fn location(
        &self,
        daily: &[Candle],
        weekly: &[Candle],
        direction: Direction,
        price: f64,
        daily_atr: f64,
    ) -> (PillarScore, Option<f64>) {
        let strength = self.params.pivot_strength;
        let levels: Vec<f64> = match direction {
            Direction::Long => swing_lows(daily, strength)
                .into_iter()
                .chain(swing_lows(weekly, strength))
                .map(|p| p.price)
                .collect(),
            Direction::Short => swing_highs(daily, strength)
                .into_iter()
                .chain(swing_highs(weekly, strength))
                .map(|p| p.price)
                .collect(),
            Direction::None => {
                return (PillarScore::fail(Pillar::Location, "no directional bias"), None);
            }
        };
        let tolerance = self.params.zone_tolerance_atr * daily_atr;
        let nearest = levels
            .into_iter()
            .map(|level| (level, (price - level).abs()))
            .filter(|&(_, dist)| dist <= tolerance)
            .min_by(|a, b| a.1.total_cmp(&b.1));
        match nearest {
            Some((level, _)) => (
                PillarScore::pass(
                    Pillar::Location,
                    format!("price {price} within {tolerance:.5} of zone {level}"),
                ),
                Some(level),
            ),
            None => (
                PillarScore::fail(Pillar::Location, format!("no zone within {tolerance:.5}")),
                None,
            ),
        }
    }

    /// Pillar 3.
    pub fn fibonacci(&self, daily: &[Candle], direction: Direction, price: f64) -> PillarScore {
        let p = &self.params;
        let Some(leg) = impulse_leg(daily, p.fib_lookback) else {
            return PillarScore::fail(Pillar::Fibonacci, "no impulse leg");
        };
        match leg.retracement(price, direction) {
            Some(r) => PillarScore::check(
                Pillar::Fibonacci,
                r >= p.fib_min && r <= p.fib_max,
                format!(
                    "retracement {:.3} of {}..{} (band {}-{})",
                    r, leg.low, leg.high, p.fib_min, p.fib_max
                ),
            ),
            None => PillarScore::fail(
                Pillar::Fibonacci,
                format!("leg {}..{} does not run {direction}", leg.low, leg.high),
            ),
        }
    }

    fn equal_levels(&self, candles: &[Candle], price: f64, atr: f64) -> Option<String> {
        let strength = self.params.pivot_strength;
        let tolerance = self.params.equal_level_tolerance_atr * atr;
        let proximity = self.params.liquidity_proximity_atr * atr;
        [("highs", swing_highs(candles, strength)), ("lows", swing_lows(candles, strength))]
            .into_iter()
            .find_map(|(kind, points)| match points.as_slice() {
                [.., a, b] => {
                    let mid = (a.price + b.price) / 2.0;
                    ((a.price - b.price).abs() <= tolerance && (price - mid).abs() <= proximity)
                        .then(|| format!("equal {kind} near {mid:.5}"))
                }
                _ => None,
            })
    }

    fn sweep(&self, candles: &[Candle]) -> Option<String> {
        let p = &self.params;
        let n = candles.len();
        (n.saturating_sub(p.sweep_lookback)..n)
            .rev()
            .filter(|&i| i >= p.sweep_window && p.sweep_window > 0)
            .find_map(|i| {
                let prior = &candles[i - p.sweep_window..i];
                let prior_high = prior.iter().map(|c| c.high).fold(f64::MIN, f64::max);
                let prior_low = prior.iter().map(|c| c.low).fold(f64::MAX, f64::min);
                let c = &candles[i];
                if c.high > prior_high && c.close < prior_high {
                    Some(format!("swept high {prior_high}"))
                } else if c.low < prior_low && c.close > prior_low {
                    Some(format!("swept low {prior_low}"))
                } else {
                    None
                }
            })
    }

    /// Pillar 4.
    pub fn liquidity(
        &self,
        daily: &[Candle],
        h4: &[Candle],
        price: f64,
        daily_atr: f64,
        h4_atr: f64,
    ) -> PillarScore {
        let found = self
            .equal_levels(daily, price, daily_atr)
            .map(|d| format!("D {d}"))
            .or_else(|| self.equal_levels(h4, price, h4_atr).map(|d| format!("H4 {d}")))
            .or_else(|| self.sweep(daily).map(|d| format!("D {d}")))
            .or_else(|| self.sweep(h4).map(|d| format!("H4 {d}")));
        match found {
            Some(detail) => PillarScore::pass(Pillar::Liquidity, detail),
            None => PillarScore::fail(Pillar::Liquidity, "no equal levels or sweep"),
        }
    }

    /// Pillar 5.
    pub fn structure(&self, daily: &[Candle], direction: Direction) -> PillarScore {
        match structure_trend(daily, self.params.pivot_strength) {
            Some(trend) => PillarScore::check(
                Pillar::Structure,
                !direction.is_none() && trend.direction() == direction,
                format!("daily swings {:?} vs bias {direction}", trend),
            ),
            None => PillarScore::fail(Pillar::Structure, "fewer than two daily swings"),
        }
    }

    /// Pillar 6. Newest candle first.
    pub fn confirmation(&self, h4: &[Candle], direction: Direction) -> PillarScore {
        if direction.is_none() {
            return PillarScore::fail(Pillar::Confirmation, "no directional bias");
        }
        let p = &self.params;
        let n = h4.len();
        let found = (n.saturating_sub(p.confirmation_lookback).max(1)..n)
            .rev()
            .find_map(|i| {
                let c = &h4[i];
                let prior_swing = match direction {
                    Direction::Long => swing_highs(&h4[..i], p.pivot_strength).last().copied(),
                    _ => swing_lows(&h4[..i], p.pivot_strength).last().copied(),
                };
                if let Some(swing) = prior_swing {
                    if direction.sign() * (c.close - swing.price) > 0.0 {
                        return Some(format!("break of structure through {}", swing.price));
                    }
                }
                let with_trend = match direction {
                    Direction::Long => c.is_bullish(),
                    _ => c.is_bearish(),
                };
                if with_trend && c.range() > 0.0 && c.body() >= p.momentum_body_ratio * c.range() {
                    return Some(format!("momentum candle at {}", c.close_time));
                }
                if is_engulfing(&h4[i - 1], c, direction) {
                    return Some(format!("engulfing candle at {}", c.close_time));
                }
                None
            });
        match found {
            Some(detail) => PillarScore::pass(Pillar::Confirmation, detail),
            None => PillarScore::fail(
                Pillar::Confirmation,
                format!("nothing in last {} H4 candles", p.confirmation_lookback),
            ),
        }
    }

    /// Stop beyond the invalidation level, targets at the next swing levels.
    ///
    /// The invalidation level is the Location zone, else the last daily swing,
    /// else the impulse-leg extreme, whichever first lies on the protective side.
    pub fn trade_plan(
        &self,
        daily: &[Candle],
        weekly: &[Candle],
        direction: Direction,
        price: f64,
        daily_atr: f64,
        invalidation: Option<f64>,
    ) -> Result<TradePlan, String> {
        let p = &self.params;
        let sign = direction.sign();
        if sign == 0.0 {
            return Err("no directional bias".to_string());
        }
        let protective = |level: &f64| sign * (price - level) > 0.0;
        let leg = impulse_leg(daily, p.fib_lookback);

        let (last_swing, leg_stop_side, leg_target_side) = match direction {
            Direction::Long => (
                swing_lows(daily, p.pivot_strength).last().map(|s| s.price),
                leg.map(|l| l.low),
                leg.map(|l| l.high),
            ),
            _ => (
                swing_highs(daily, p.pivot_strength).last().map(|s| s.price),
                leg.map(|l| l.high),
                leg.map(|l| l.low),
            ),
        };
        let level = [invalidation, last_swing, leg_stop_side]
            .into_iter()
            .flatten()
            .find(protective)
            .ok_or_else(|| "no invalidation level behind price".to_string())?;
        let stop_loss = level - sign * p.stop_buffer_atr * daily_atr;

        let beyond = |level: &f64| sign * (level - price) > 0.0;
        let mut targets: Vec<f64> = match direction {
            Direction::Long => swing_highs(daily, p.pivot_strength)
                .into_iter()
                .chain(swing_highs(weekly, p.pivot_strength))
                .map(|s| s.price)
                .filter(beyond)
                .collect(),
            _ => swing_lows(daily, p.pivot_strength)
                .into_iter()
                .chain(swing_lows(weekly, p.pivot_strength))
                .map(|s| s.price)
                .filter(beyond)
                .collect(),
        };
        if targets.is_empty() {
            targets.extend(leg_target_side.filter(beyond));
        }
        // nearest first
        targets.sort_by(|a, b| (sign * (a - price)).total_cmp(&(sign * (b - price))));
        targets.dedup_by(|a, b| (*a - *b).abs() <= f64::EPSILON * a.abs().max(1.0));
        targets.truncate(p.max_targets);

        let Some(&tp1) = targets.first() else {
            return Err("no target beyond price".to_string());
        };
        let risk = (price - stop_loss).abs();
        if risk <= 0.0 {
            return Err("zero stop distance".to_string());
        }
        Ok(TradePlan {
            stop_loss,
            risk_reward: (tp1 - price).abs() / risk,
            targets,
        })
    }
}

impl SetupEvaluator for ConfluenceEvaluator {
    fn evaluate(&self, asset: &str, snapshot: &SeriesSnapshot<'_>) -> ScanResult {
        let as_of = snapshot.as_of();
        if let Some(reason) = self.missing_history(snapshot) {
            debug!(asset, %as_of, %reason, "not evaluable");
            return ScanResult::not_evaluable(asset, as_of, &reason);
        }
        let (daily, weekly, h4) = (snapshot.daily(), snapshot.weekly(), snapshot.h4());
        let (Some(last), Some(daily_atr), Some(h4_atr)) = (
            h4.last(),
            atr(daily, self.params.atr_period),
            atr(h4, self.params.atr_period),
        ) else {
            return ScanResult::not_evaluable(asset, as_of, "no ATR");
        };
        let price = last.close;

        let (htf, direction) = self.htf_bias(snapshot);
        let (location, invalidation) = self.location(daily, weekly, direction, price, daily_atr);
        let fibonacci = self.fibonacci(daily, direction, price);
        let liquidity = self.liquidity(daily, h4, price, daily_atr, h4_atr);
        let structure = self.structure(daily, direction);
        let confirmation = self.confirmation(h4, direction);
        let plan = self.trade_plan(daily, weekly, direction, price, daily_atr, invalidation);

        let min_rr = self.min_risk_reward();
        let rr_score = match &plan {
            Ok(plan) => PillarScore::check(
                Pillar::RiskReward,
                plan.risk_reward >= min_rr,
                format!("R:R {:.2} (min {min_rr:.2})", plan.risk_reward),
            ),
            Err(reason) => PillarScore::fail(Pillar::RiskReward, reason.clone()),
        };

        let pillars = vec![
            htf,
            location,
            fibonacci,
            liquidity,
            structure,
            confirmation,
            rr_score,
        ];
        let (stop_loss, take_profit, risk_reward) = match plan {
            Ok(plan) => (Some(plan.stop_loss), plan.targets, Some(plan.risk_reward)),
            Err(_) => (None, Vec::new(), None),
        };
        let status = SetupStatus::grade(&pillars, risk_reward, min_rr);
        debug!(asset, %as_of, %status, %direction, "evaluated");

        ScanResult {
            asset: asset.to_string(),
            direction,
            status,
            entry: Some(price),
            stop_loss,
            take_profit,
            risk_reward,
            pillars,
            evaluated_at: as_of,
        }
    }

    fn min_risk_reward(&self) -> f64 {
        self.profile.min_risk_reward
    }
}
