//! Walk-forward challenge replay.
//!
//! The clock is the union of H4 close times. At each step a frontier per
//! timeframe is advanced to the step time, so the evaluator only ever sees
//! closed candles. [`BacktestSimulator::run_monthly`] repeats the replay once
//! per calendar month, each month a fresh challenge attempt.

use crate::domain::candle::Candle;
use crate::domain::confluence::{ConfluenceEvaluator, SetupEvaluator};
use crate::domain::error::TraderError;
use crate::domain::profile::AccountProfile;
use crate::domain::risk::{Candidate, RejectReason, RiskDecision, RiskManager};
use crate::domain::series::{build_unified_timeline, AssetSeries, ReplayCursor, SeriesSnapshot};
use crate::domain::trade::{Trade, TradeEntry, TradeStatus};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// High-impact events fed to the risk manager before the replay.
    pub news_events: Vec<(DateTime<Utc>, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    TotalLossBreach,
    DailyLossBreach,
    TimeRestrictionOnly,
    TargetNotReached,
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailReason::TotalLossBreach => "total_loss_breach",
            FailReason::DailyLossBreach => "daily_loss_breach",
            FailReason::TimeRestrictionOnly => "time_restriction_only",
            FailReason::TargetNotReached => "target_not_reached",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestReport {
    pub profile: String,
    pub assets: Vec<String>,
    pub trades: Vec<Trade>,
    /// Validations refused by the daily limit, plus days whose realized loss
    /// went past the hard daily limit.
    pub daily_loss_violations: usize,
    /// Validations refused by the total limit, plus a hard total-limit breach.
    pub total_loss_violations: usize,
    pub time_restriction_rejections: usize,
    pub other_rejections: usize,
    /// Days across all phases whose net realized pnl met the daily minimum.
    pub profitable_days: usize,
    pub phase_reached: usize,
    pub passed: bool,
    pub fail_reason: Option<FailReason>,
    pub starting_balance: f64,
    pub final_balance: f64,
    pub steps: usize,
    pub max_daily_drawdown_pct: f64,
    pub max_total_drawdown_pct: f64,
}

impl BacktestReport {
    pub fn total_pnl(&self) -> f64 {
        self.trades.iter().map(|t| t.pnl).sum()
    }
}

/// One calendar month replayed as its own challenge attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyReport {
    /// `YYYY-MM`.
    pub month: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub report: BacktestReport,
}

pub fn passed_months(months: &[MonthlyReport]) -> usize {
    months.iter().filter(|m| m.report.passed).count()
}

/// Replay state of one asset.
struct AssetReplay<'a> {
    asset: &'a str,
    monthly: ReplayCursor<'a>,
    weekly: ReplayCursor<'a>,
    daily: ReplayCursor<'a>,
    h4: ReplayCursor<'a>,
    open: Option<Trade>,
}

impl<'a> AssetReplay<'a> {
    fn new(asset: &'a str, series: &'a AssetSeries) -> Self {
        Self {
            asset,
            monthly: ReplayCursor::new(&series.monthly),
            weekly: ReplayCursor::new(&series.weekly),
            daily: ReplayCursor::new(&series.daily),
            h4: ReplayCursor::new(&series.h4),
            open: None,
        }
    }

    fn advance_to(&mut self, t: DateTime<Utc>) {
        self.monthly.advance_to(t);
        self.weekly.advance_to(t);
        self.daily.advance_to(t);
        self.h4.advance_to(t);
    }

    fn snapshot(&self, t: DateTime<Utc>) -> SeriesSnapshot<'a> {
        SeriesSnapshot::from_slices(
            t,
            self.monthly.visible(),
            self.weekly.visible(),
            self.daily.visible(),
            self.h4.visible(),
        )
    }
}

#[derive(Default)]
struct Tally {
    trades: Vec<Trade>,
    daily_loss_violations: usize,
    total_loss_violations: usize,
    time_restriction_rejections: usize,
    other_rejections: usize,
    hard_daily_breach_days: BTreeSet<NaiveDate>,
    blown: bool,
    max_daily_drawdown_pct: f64,
    max_total_drawdown_pct: f64,
}

impl Tally {
    fn reject(&mut self, reason: &RejectReason) {
        match reason {
            RejectReason::DailyLossLimit => self.daily_loss_violations += 1,
            RejectReason::TotalLossLimit => self.total_loss_violations += 1,
            RejectReason::TimeRestricted(_) => self.time_restriction_rejections += 1,
            RejectReason::InvalidRisk
            | RejectReason::OpenRiskCap
            | RejectReason::ConcurrencyCap => self.other_rejections += 1,
        }
    }

    fn fail_reason(&self) -> FailReason {
        if self.total_loss_violations > 0 {
            FailReason::TotalLossBreach
        } else if self.daily_loss_violations > 0 {
            FailReason::DailyLossBreach
        } else if self.trades.is_empty()
            && self.time_restriction_rejections > 0
            && self.other_rejections == 0
        {
            FailReason::TimeRestrictionOnly
        } else {
            FailReason::TargetNotReached
        }
    }
}

pub struct BacktestSimulator<E: SetupEvaluator = ConfluenceEvaluator> {
    evaluator: E,
    config: BacktestConfig,
}

impl<E: SetupEvaluator> BacktestSimulator<E> {
    pub fn new(evaluator: E, config: BacktestConfig) -> Self {
        Self { evaluator, config }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Replay one asset against a fresh risk manager.
    pub fn run(
        &self,
        asset: &str,
        series: &AssetSeries,
        profile: Arc<AccountProfile>,
    ) -> Result<BacktestReport, TraderError> {
        self.run_universe(&[(asset, series)], profile)
    }

    /// Replay several assets on one clock and one risk manager, so the
    /// open-risk and concurrency caps bind across assets.
    pub fn run_universe(
        &self,
        assets: &[(&str, &AssetSeries)],
        profile: Arc<AccountProfile>,
    ) -> Result<BacktestReport, TraderError> {
        self.replay(assets, profile, self.config.start, self.config.end)
    }

    /// Replay every calendar month touching the configured window as an
    /// independent challenge, clamped to the window. Steps closing exactly at
    /// midnight on the 1st belong to the new month.
    pub fn run_monthly(
        &self,
        assets: &[(&str, &AssetSeries)],
        profile: Arc<AccountProfile>,
    ) -> Result<Vec<MonthlyReport>, TraderError> {
        let mut months = Vec::new();
        let Some(mut month) = self.config.start.date_naive().with_day(1) else {
            return Ok(months);
        };
        while let Some(next) = month.checked_add_months(Months::new(1)) {
            let start = month.and_time(NaiveTime::MIN).and_utc().max(self.config.start);
            let end = (next.and_time(NaiveTime::MIN).and_utc() - Duration::seconds(1))
                .min(self.config.end);
            if start >= end {
                break;
            }
            let report = self.replay(assets, Arc::clone(&profile), start, end)?;
            months.push(MonthlyReport {
                month: month.format("%Y-%m").to_string(),
                start,
                end,
                report,
            });
            month = next;
        }
        info!(
            months = months.len(),
            passed = passed_months(&months),
            "monthly analysis finished"
        );
        Ok(months)
    }

    fn replay(
        &self,
        assets: &[(&str, &AssetSeries)],
        profile: Arc<AccountProfile>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BacktestReport, TraderError> {
        let timeline: Vec<DateTime<Utc>> = build_unified_timeline(assets.iter().map(|(_, s)| *s))
            .into_iter()
            .filter(|t| *t >= from && *t <= to)
            .collect();
        let start = timeline.first().copied().unwrap_or(from);

        let mut risk = RiskManager::new(Arc::clone(&profile), start);
        for (at, name) in &self.config.news_events {
            risk.add_news_event(*at, name.clone());
        }
        let mut replays: Vec<AssetReplay<'_>> = assets
            .iter()
            .map(|(asset, series)| AssetReplay::new(asset, series))
            .collect();
        let mut tally = Tally::default();

        info!(
            profile = %profile.name,
            assets = assets.len(),
            steps = timeline.len(),
            "backtest started"
        );

        for &t in &timeline {
            risk.roll_day(t);
            for replay in &mut replays {
                replay.advance_to(t);
            }

            for replay in &mut replays {
                let Some(candle) = replay.h4.closing_at(t) else {
                    continue;
                };
                let Some((status, price)) =
                    replay.open.as_mut().and_then(|trade| trade.manage(candle))
                else {
                    continue;
                };
                if let Some(trade) = replay.open.take() {
                    close_trade(&mut risk, &mut tally, trade, status, price, t)?;
                }
            }

            if risk.challenge_complete() || tally.blown {
                continue;
            }

            for replay in &mut replays {
                if replay.open.is_some() {
                    continue;
                }
                let Some(candle) = replay.h4.closing_at(t) else {
                    continue;
                };
                replay.open = self.try_enter(&mut risk, &mut tally, replay, candle, t);
            }
        }

        for replay in &mut replays {
            if let Some(trade) = replay.open.take() {
                let last_close = replay.h4.visible().last().map_or(trade.entry_price, |c| c.close);
                let at = timeline.last().copied().unwrap_or(trade.entry_time);
                close_trade(&mut risk, &mut tally, trade, TradeStatus::ClosedManual, last_close, at)?;
            }
        }

        let passed = risk.challenge_complete() && tally.total_loss_violations == 0;
        let fail_reason = (!passed).then(|| tally.fail_reason());
        let report = BacktestReport {
            profile: profile.name.clone(),
            assets: assets.iter().map(|(a, _)| a.to_string()).collect(),
            daily_loss_violations: tally.daily_loss_violations,
            total_loss_violations: tally.total_loss_violations,
            time_restriction_rejections: tally.time_restriction_rejections,
            other_rejections: tally.other_rejections,
            profitable_days: risk.profitable_days_total(),
            phase_reached: risk.state().phase,
            passed,
            fail_reason,
            starting_balance: profile.starting_balance,
            final_balance: risk.state().current_balance,
            steps: timeline.len(),
            max_daily_drawdown_pct: tally.max_daily_drawdown_pct,
            max_total_drawdown_pct: tally.max_total_drawdown_pct,
            trades: tally.trades,
        };
        info!(
            trades = report.trades.len(),
            phase = report.phase_reached,
            passed = report.passed,
            final_balance = report.final_balance,
            "backtest finished"
        );
        Ok(report)
    }

    fn try_enter(
        &self,
        risk: &mut RiskManager,
        tally: &mut Tally,
        replay: &AssetReplay<'_>,
        candle: &Candle,
        t: DateTime<Utc>,
    ) -> Option<Trade> {
        let result = self.evaluator.evaluate(replay.asset, &replay.snapshot(t));
        if !result.is_active() || result.take_profit.is_empty() {
            return None;
        }
        let mut candidate = Candidate::from_scan(&result, risk.profile().risk_per_trade_usd())?;
        // the step's close stands in for the live price
        candidate.entry = candle.close;

        match risk.validate(&candidate, t) {
            RiskDecision::Approved(reservation) => {
                debug!(
                    trade_id = reservation.trade_id,
                    asset = replay.asset,
                    entry = candle.close,
                    "trade opened"
                );
                Some(Trade::open(
                    reservation.trade_id,
                    TradeEntry {
                        asset: replay.asset.to_string(),
                        direction: result.direction,
                        entry_price: candle.close,
                        entry_time: t,
                        stop_loss: candidate.stop_loss,
                        targets: result.take_profit,
                        risk_usd: reservation.risk_usd,
                    },
                ))
            }
            RiskDecision::Rejected(reason) => {
                tally.reject(&reason);
                None
            }
        }
    }
}

fn close_trade(
    risk: &mut RiskManager,
    tally: &mut Tally,
    mut trade: Trade,
    status: TradeStatus,
    price: f64,
    at: DateTime<Utc>,
) -> Result<(), TraderError> {
    let pnl = trade.close(status, price, at)?;
    risk.record_close(trade.id, pnl, at)?;
    risk.advance_phase();
    debug!(trade_id = trade.id, asset = %trade.asset, %status, pnl, "trade closed");

    let profile = risk.profile();
    let state = risk.state();
    let start = profile.starting_balance;
    tally.max_daily_drawdown_pct = tally.max_daily_drawdown_pct.max(-state.daily_pnl / start);
    tally.max_total_drawdown_pct = tally
        .max_total_drawdown_pct
        .max((start - state.current_balance) / start);
    if state.daily_pnl < -profile.hard_daily_loss_usd()
        && tally.hard_daily_breach_days.insert(at.date_naive())
    {
        tally.daily_loss_violations += 1;
    }
    if !tally.blown && state.total_pnl_from_start < -profile.hard_total_loss_usd() {
        tally.total_loss_violations += 1;
        tally.blown = true;
    }
    tally.trades.push(trade);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::Timeframe;
    use crate::domain::scan::{Direction, Pillar, PillarScore, ScanResult, SetupStatus};
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex;

    // Monday
    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap()
    }

    /// Emits one ACTIVE long at a fixed time and records every snapshot bound.
    struct Scripted {
        fire_at: DateTime<Utc>,
        stop: f64,
        targets: Vec<f64>,
        seen: Mutex<Vec<(DateTime<Utc>, Option<DateTime<Utc>>)>>,
    }

    impl SetupEvaluator for Scripted {
        fn evaluate(&self, asset: &str, snapshot: &SeriesSnapshot<'_>) -> ScanResult {
            let newest = snapshot.h4().last().map(|c| c.close_time);
            self.seen.lock().unwrap().push((snapshot.as_of(), newest));
            if snapshot.as_of() != self.fire_at {
                return ScanResult::not_evaluable(asset, snapshot.as_of(), "scripted");
            }
            ScanResult {
                asset: asset.to_string(),
                direction: Direction::Long,
                status: SetupStatus::Active,
                entry: snapshot.h4().last().map(|c| c.close),
                stop_loss: Some(self.stop),
                take_profit: self.targets.clone(),
                risk_reward: Some(2.0),
                pillars: Pillar::ALL.iter().map(|&p| PillarScore::pass(p, "")).collect(),
                evaluated_at: snapshot.as_of(),
            }
        }

        fn min_risk_reward(&self) -> f64 {
            1.5
        }
    }

    fn series(bars: &[(f64, f64, f64)]) -> AssetSeries {
        let mut asset = AssetSeries::new("EUR_USD");
        for (i, &(high, low, close)) in bars.iter().enumerate() {
            let open_time = t0() + Duration::hours(8) + Duration::hours(4 * i as i64);
            asset
                .get_mut(Timeframe::H4)
                .push(Candle {
                    open_time,
                    close_time: open_time + Duration::hours(4),
                    open: close,
                    high,
                    low,
                    close,
                    volume: 0.0,
                })
                .unwrap();
        }
        asset
    }

    fn laddered(fire_at: DateTime<Utc>, targets: Vec<f64>, end: DateTime<Utc>) -> BacktestSimulator<Scripted> {
        BacktestSimulator::new(
            Scripted {
                fire_at,
                stop: 99.0,
                targets,
                seen: Mutex::new(Vec::new()),
            },
            BacktestConfig {
                start: t0(),
                end,
                news_events: Vec::new(),
            },
        )
    }

    fn simulator(fire_at: DateTime<Utc>) -> BacktestSimulator<Scripted> {
        laddered(fire_at, vec![102.0], t0() + Duration::days(30))
    }

    fn profile() -> Arc<AccountProfile> {
        Arc::new(AccountProfile::the5ers_10k_high_stakes())
    }

    #[test]
    fn stop_wins_when_both_levels_hit() {
        let data = series(&[(100.5, 99.5, 100.0), (103.0, 98.0, 100.0), (100.5, 99.5, 100.0)]);
        let fire_at = data.h4.candles()[0].close_time;
        let report = simulator(fire_at).run("EUR_USD", &data, profile()).unwrap();
        assert_eq!(report.trades.len(), 1);
        let trade = &report.trades[0];
        assert_eq!(trade.status, TradeStatus::ClosedSl);
        assert_eq!(trade.exit_price, Some(99.0));
        assert!((trade.pnl + 100.0).abs() < 1e-9);
        assert!((report.final_balance - 9_900.0).abs() < 1e-9);
    }

    #[test]
    fn take_profit_books_two_r() {
        let data = series(&[(100.5, 99.5, 100.0), (102.5, 99.5, 102.0)]);
        let fire_at = data.h4.candles()[0].close_time;
        let report = simulator(fire_at).run("EUR_USD", &data, profile()).unwrap();
        let trade = &report.trades[0];
        assert_eq!(trade.status, TradeStatus::ClosedTp);
        assert!((trade.pnl - 200.0).abs() < 1e-9);
        assert_eq!(report.profitable_days, 1);
        assert!(!report.passed);
        assert_eq!(report.fail_reason, Some(FailReason::TargetNotReached));
    }

    #[test]
    fn open_trade_closed_manually_at_end() {
        let data = series(&[(100.5, 99.5, 100.0), (100.8, 99.5, 100.5)]);
        let fire_at = data.h4.candles()[0].close_time;
        let report = simulator(fire_at).run("EUR_USD", &data, profile()).unwrap();
        let trade = &report.trades[0];
        assert_eq!(trade.status, TradeStatus::ClosedManual);
        assert_eq!(trade.exit_price, Some(100.5));
        assert!((report.total_pnl() - (report.final_balance - report.starting_balance)).abs() < 1e-9);
    }

    #[test]
    fn evaluator_never_sees_future_candles() {
        let data = series(&[(100.5, 99.5, 100.0); 6]);
        let sim = simulator(t0());
        sim.run("EUR_USD", &data, profile()).unwrap();
        let seen = sim.evaluator.seen.lock().unwrap();
        assert_eq!(seen.len(), 6);
        assert!(seen.iter().all(|(as_of, newest)| newest.is_some_and(|n| n <= *as_of)));
    }

    #[test]
    fn monday_cooldown_only_is_time_restriction_failure() {
        // first candle closes Monday 01:00, inside the cooldown
        let mut data = AssetSeries::new("EUR_USD");
        data.h4
            .push(Candle {
                open_time: t0() - Duration::hours(3),
                close_time: t0() + Duration::hours(1),
                open: 100.0,
                high: 100.5,
                low: 99.5,
                close: 100.0,
                volume: 0.0,
            })
            .unwrap();
        let report = simulator(t0() + Duration::hours(1))
            .run("EUR_USD", &data, profile())
            .unwrap();
        assert!(report.trades.is_empty());
        assert_eq!(report.time_restriction_rejections, 1);
        assert_eq!(report.fail_reason, Some(FailReason::TimeRestrictionOnly));
    }

    #[test]
    fn empty_range_reports_target_not_reached() {
        let data = AssetSeries::new("EUR_USD");
        let report = simulator(t0()).run("EUR_USD", &data, profile()).unwrap();
        assert_eq!(report.steps, 0);
        assert_eq!(report.phase_reached, 1);
        assert_eq!(report.fail_reason, Some(FailReason::TargetNotReached));
    }

    #[test]
    fn ladder_runs_past_first_target() {
        let data = series(&[(100.5, 99.5, 100.0), (101.5, 100.2, 101.0), (102.5, 100.5, 102.0)]);
        let fire_at = data.h4.candles()[0].close_time;
        let report = laddered(fire_at, vec![101.0, 102.0, 103.0], t0() + Duration::days(30))
            .run("EUR_USD", &data, profile())
            .unwrap();
        let trade = &report.trades[0];
        assert!(trade.tp1_hit);
        assert_eq!(trade.status, TradeStatus::ClosedTp);
        assert_eq!(trade.exit_price, Some(102.0));
        assert!((trade.pnl - 200.0).abs() < 1e-9);
    }

    #[test]
    fn ladder_trails_to_breakeven() {
        let data = series(&[(100.5, 99.5, 100.0), (101.5, 100.2, 101.0), (100.8, 99.8, 100.0)]);
        let fire_at = data.h4.candles()[0].close_time;
        let report = laddered(fire_at, vec![101.0, 102.0, 103.0], t0() + Duration::days(30))
            .run("EUR_USD", &data, profile())
            .unwrap();
        let trade = &report.trades[0];
        assert_eq!(trade.status, TradeStatus::ClosedTrail);
        assert_eq!(trade.exit_price, Some(100.0));
        assert_eq!(trade.pnl, 0.0);
        assert_eq!(report.profitable_days, 0);
        assert_eq!(report.final_balance, 10_000.0);
    }

    #[test]
    fn ladder_stop_still_wins_before_first_target() {
        let data = series(&[(100.5, 99.5, 100.0), (103.5, 98.5, 100.0)]);
        let fire_at = data.h4.candles()[0].close_time;
        let report = laddered(fire_at, vec![101.0, 102.0, 103.0], t0() + Duration::days(30))
            .run("EUR_USD", &data, profile())
            .unwrap();
        assert_eq!(report.trades[0].status, TradeStatus::ClosedSl);
        assert!(!report.trades[0].tp1_hit);
    }

    #[test]
    fn monthly_runs_are_independent_challenges() {
        let mut bars = vec![(100.5, 99.5, 100.0); 240];
        bars[181] = (102.5, 99.5, 102.0);
        let data = series(&bars);
        // Wednesday 2024-04-03 12:00
        let fire_at = data.h4.candles()[180].close_time;
        assert_eq!(fire_at, Utc.with_ymd_and_hms(2024, 4, 3, 12, 0, 0).unwrap());
        let end = t0() + Duration::days(37);

        let sim = laddered(fire_at, vec![102.0], end);
        let months = sim.run_monthly(&[("EUR_USD", &data)], profile()).unwrap();
        assert_eq!(months.len(), 2);

        assert_eq!(months[0].month, "2024-03");
        assert_eq!(months[0].start, t0());
        assert_eq!(months[0].end, Utc.with_ymd_and_hms(2024, 3, 31, 23, 59, 59).unwrap());
        assert!(months[0].report.trades.is_empty());
        assert_eq!(months[0].report.steps, 165);

        assert_eq!(months[1].month, "2024-04");
        assert_eq!(months[1].start, Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());
        assert_eq!(months[1].end, end);
        assert_eq!(months[1].report.steps, 55);
        assert_eq!(months[1].report.trades.len(), 1);
        assert_eq!(months[1].report.trades[0].status, TradeStatus::ClosedTp);
        assert_eq!(months[1].report.starting_balance, 10_000.0);
        assert!((months[1].report.final_balance - 10_200.0).abs() < 1e-9);

        let whole = sim.run("EUR_USD", &data, profile()).unwrap();
        assert_eq!(months.iter().map(|m| m.report.steps).sum::<usize>(), whole.steps);
        assert_eq!(passed_months(&months), 0);
    }

    #[test]
    fn monthly_on_empty_window_is_empty() {
        let data = series(&[(100.5, 99.5, 100.0); 4]);
        let months = laddered(t0(), vec![102.0], t0())
            .run_monthly(&[("EUR_USD", &data)], profile())
            .unwrap();
        assert!(months.is_empty());
    }
}
