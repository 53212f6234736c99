//! Challenge-rule gatekeeping and running exposure.
//!
//! [`RiskManager`] owns the only mutable [`RiskState`]. Approval reserves risk,
//! closing or abandoning a trade releases it, and every day boundary must be
//! announced through [`RiskManager::roll_day`] before the next validation.

use crate::domain::error::TraderError;
use crate::domain::profile::{to_cents, AccountProfile};
use crate::domain::scan::{Direction, ScanResult};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// A trade proposed for opening.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub asset: String,
    pub direction: Direction,
    pub entry: f64,
    pub stop_loss: f64,
    pub proposed_risk_usd: f64,
}

impl Candidate {
    /// Candidate at the result's entry and stop; `None` without a plan.
    pub fn from_scan(result: &ScanResult, risk_usd: f64) -> Option<Self> {
        if result.direction.is_none() {
            return None;
        }
        Some(Self {
            asset: result.asset.clone(),
            direction: result.direction,
            entry: result.entry?,
            stop_loss: result.stop_loss?,
            proposed_risk_usd: risk_usd,
        })
    }
}

/// Risk held for an approved trade until it closes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reservation {
    pub trade_id: u64,
    pub asset: String,
    pub risk_usd: f64,
    pub reserved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRestriction {
    FridayCutoff,
    MondayCooldown,
    NewsBlackout { event: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Proposed risk is not a positive finite amount.
    InvalidRisk,
    TimeRestricted(TimeRestriction),
    DailyLossLimit,
    TotalLossLimit,
    OpenRiskCap,
    ConcurrencyCap,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::InvalidRisk => "invalid-risk",
            RejectReason::TimeRestricted(_) => "time-restricted",
            RejectReason::DailyLossLimit => "daily-loss-limit",
            RejectReason::TotalLossLimit => "total-loss-limit",
            RejectReason::OpenRiskCap => "open-risk-cap",
            RejectReason::ConcurrencyCap => "concurrency-cap",
        }
    }

    pub fn is_time_restriction(&self) -> bool {
        matches!(self, RejectReason::TimeRestricted(_))
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::TimeRestricted(TimeRestriction::FridayCutoff) => {
                write!(f, "time-restricted: friday cutoff")
            }
            RejectReason::TimeRestricted(TimeRestriction::MondayCooldown) => {
                write!(f, "time-restricted: monday cooldown")
            }
            RejectReason::TimeRestricted(TimeRestriction::NewsBlackout { event }) => {
                write!(f, "time-restricted: news blackout ({event})")
            }
            other => f.write_str(other.code()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Approved(Reservation),
    Rejected(RejectReason),
}

impl RiskDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, RiskDecision::Approved(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskState {
    pub current_balance: f64,
    pub peak_balance: f64,
    /// Realized pnl of the current UTC day.
    pub daily_pnl: f64,
    /// Midnight starting the current UTC day.
    pub daily_reset_at: DateTime<Utc>,
    pub total_pnl_from_start: f64,
    pub open_risk: f64,
    pub open_trade_count: usize,
    /// 1-based; `phase_count + 1` once the final phase is passed.
    pub phase: usize,
    pub phase_baseline_pnl: f64,
    /// Net realized pnl per UTC day of closing.
    pub realized_by_day: BTreeMap<NaiveDate, f64>,
    pub profitable_days_this_phase: BTreeSet<NaiveDate>,
    pub last_trade_day: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloseSummary {
    pub reservation: Reservation,
    pub pnl: f64,
    /// Whether the closing day's net now meets the profitable-day threshold.
    pub day_profitable: bool,
    pub balance_after: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseTransition {
    pub from: usize,
    pub to: usize,
    pub phase_profit_usd: f64,
    pub challenge_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseProgress {
    pub phase: usize,
    pub phase_count: usize,
    pub phase_profit_usd: f64,
    pub target_usd: Option<f64>,
    pub profitable_days: usize,
    pub min_profitable_days: usize,
    pub challenge_complete: bool,
}

/// Read-only view for notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskSnapshot {
    pub profile: String,
    pub starting_balance: f64,
    pub current_balance: f64,
    pub peak_balance: f64,
    pub open_trades: usize,
    pub max_concurrent_trades: usize,
    pub open_risk_usd: f64,
    pub max_open_risk_usd: f64,
    pub daily_pnl_usd: f64,
    pub daily_loss_limit_usd: f64,
    pub total_pnl_usd: f64,
    pub total_loss_limit_usd: f64,
    pub total_drawdown_pct: f64,
    pub progress: PhaseProgress,
}

fn midnight(t: DateTime<Utc>) -> DateTime<Utc> {
    t.date_naive().and_time(NaiveTime::MIN).and_utc()
}

#[derive(Debug)]
pub struct RiskManager {
    profile: Arc<AccountProfile>,
    state: RiskState,
    reservations: BTreeMap<u64, Reservation>,
    news_events: Vec<(DateTime<Utc>, String)>,
    next_trade_id: u64,
}

impl RiskManager {
    /// Fresh state for `profile`; the first trading day is the one holding `start`.
    pub fn new(profile: Arc<AccountProfile>, start: DateTime<Utc>) -> Self {
        let balance = profile.starting_balance;
        Self {
            state: RiskState {
                current_balance: balance,
                peak_balance: balance,
                daily_pnl: 0.0,
                daily_reset_at: midnight(start),
                total_pnl_from_start: 0.0,
                open_risk: 0.0,
                open_trade_count: 0,
                phase: 1,
                phase_baseline_pnl: 0.0,
                realized_by_day: BTreeMap::new(),
                profitable_days_this_phase: BTreeSet::new(),
                last_trade_day: None,
            },
            profile,
            reservations: BTreeMap::new(),
            news_events: Vec::new(),
            next_trade_id: 1,
        }
    }

    pub fn profile(&self) -> &AccountProfile {
        &self.profile
    }

    pub fn shared_profile(&self) -> Arc<AccountProfile> {
        Arc::clone(&self.profile)
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    pub fn reservation(&self, trade_id: u64) -> Option<&Reservation> {
        self.reservations.get(&trade_id)
    }

    pub fn open_reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.values()
    }

    pub fn challenge_complete(&self) -> bool {
        self.state.phase > self.profile.phase_count()
    }

    /// Register a high-impact event to black out trading around.
    pub fn add_news_event(&mut self, at: DateTime<Utc>, name: impl Into<String>) {
        self.news_events.push((at, name.into()));
        self.news_events.sort_by_key(|(t, _)| *t);
    }

    pub fn news_events(&self) -> &[(DateTime<Utc>, String)] {
        &self.news_events
    }

    fn time_restriction(&self, now: DateTime<Utc>) -> Option<TimeRestriction> {
        let rules = &self.profile.time_restrictions;
        match now.weekday() {
            Weekday::Fri if now.hour() >= rules.friday_cutoff_hour_utc => {
                return Some(TimeRestriction::FridayCutoff);
            }
            Weekday::Mon
                if now - midnight(now) < Duration::hours(i64::from(rules.monday_cooldown_hours)) =>
            {
                return Some(TimeRestriction::MondayCooldown);
            }
            _ => {}
        }
        let window = Duration::minutes(rules.news_blackout_minutes);
        self.news_events
            .iter()
            .find(|(at, _)| now >= *at - window && now <= *at + window)
            .map(|(_, name)| TimeRestriction::NewsBlackout {
                event: name.clone(),
            })
    }

    /// Gate a candidate. Checks run in a fixed order and stop at the first
    /// failure; approval reserves the candidate's risk.
    pub fn validate(&mut self, candidate: &Candidate, now: DateTime<Utc>) -> RiskDecision {
        let risk = to_cents(candidate.proposed_risk_usd);
        let s = &self.state;
        let p = &self.profile;

        let rejection = if !risk.is_finite() || to_cents(risk) <= 0.0 {
            Some(RejectReason::InvalidRisk)
        } else if let Some(restriction) = self.time_restriction(now) {
            Some(RejectReason::TimeRestricted(restriction))
        } else if to_cents(s.daily_pnl - risk) < -p.safe_daily_loss_usd() {
            Some(RejectReason::DailyLossLimit)
        } else if to_cents(s.total_pnl_from_start - risk) < -p.safe_total_loss_usd() {
            Some(RejectReason::TotalLossLimit)
        } else if to_cents(s.open_risk + risk) > p.max_open_risk_usd() {
            Some(RejectReason::OpenRiskCap)
        } else if s.open_trade_count >= p.max_concurrent_trades {
            Some(RejectReason::ConcurrencyCap)
        } else {
            None
        };

        if let Some(reason) = rejection {
            match reason {
                RejectReason::DailyLossLimit | RejectReason::TotalLossLimit => warn!(
                    asset = %candidate.asset,
                    %reason,
                    daily_pnl = s.daily_pnl,
                    total_pnl = s.total_pnl_from_start,
                    risk,
                    "rejected near loss limit"
                ),
                RejectReason::InvalidRisk => warn!(
                    asset = %candidate.asset,
                    proposed = candidate.proposed_risk_usd,
                    "rejected invalid risk"
                ),
                _ => debug!(asset = %candidate.asset, %reason, "rejected"),
            }
            return RiskDecision::Rejected(reason);
        }

        let reservation = Reservation {
            trade_id: self.next_trade_id,
            asset: candidate.asset.clone(),
            risk_usd: risk,
            reserved_at: now,
        };
        self.next_trade_id += 1;
        self.state.open_risk = to_cents(self.state.open_risk + risk);
        self.state.open_trade_count += 1;
        self.state.last_trade_day = Some(now.date_naive());
        self.reservations
            .insert(reservation.trade_id, reservation.clone());
        debug!(
            trade_id = reservation.trade_id,
            asset = %reservation.asset,
            risk,
            open_risk = self.state.open_risk,
            "approved"
        );
        RiskDecision::Approved(reservation)
    }

    fn release(&mut self, trade_id: u64, action: &str) -> Result<Reservation, TraderError> {
        let Some(reservation) = self.reservations.remove(&trade_id) else {
            error!(trade_id, action, "no reservation for trade");
            return Err(TraderError::StateInconsistency {
                reason: format!("{action} for trade {trade_id} with no matching reservation"),
            });
        };
        self.state.open_risk = to_cents(self.state.open_risk - reservation.risk_usd).max(0.0);
        self.state.open_trade_count = self.state.open_trade_count.saturating_sub(1);
        Ok(reservation)
    }

    /// Release a trade's reservation and book its pnl.
    pub fn record_close(
        &mut self,
        trade_id: u64,
        pnl: f64,
        closed_at: DateTime<Utc>,
    ) -> Result<CloseSummary, TraderError> {
        let reservation = self.release(trade_id, "record_close")?;
        let s = &mut self.state;
        s.daily_pnl += pnl;
        s.total_pnl_from_start += pnl;
        s.current_balance += pnl;
        s.peak_balance = s.peak_balance.max(s.current_balance);

        let day = closed_at.date_naive();
        let day_net = s.realized_by_day.entry(day).or_insert(0.0);
        *day_net += pnl;
        let day_profitable = to_cents(*day_net) >= self.profile.min_profit_per_day_usd();
        if day_profitable {
            s.profitable_days_this_phase.insert(day);
        } else {
            s.profitable_days_this_phase.remove(&day);
        }
        debug!(
            trade_id,
            pnl,
            balance = s.current_balance,
            day_profitable,
            "closed"
        );
        Ok(CloseSummary {
            reservation,
            pnl,
            day_profitable,
            balance_after: s.current_balance,
        })
    }

    /// Release a reservation whose trade never opened.
    pub fn abandon(&mut self, trade_id: u64) -> Result<Reservation, TraderError> {
        let reservation = self.release(trade_id, "abandon")?;
        debug!(trade_id, "abandoned");
        Ok(reservation)
    }

    /// Release every reservation held longer than `max_age`.
    pub fn reconcile_stale(&mut self, now: DateTime<Utc>, max_age: Duration) -> Vec<Reservation> {
        let stale: Vec<u64> = self
            .reservations
            .values()
            .filter(|r| now - r.reserved_at > max_age)
            .map(|r| r.trade_id)
            .collect();
        stale
            .into_iter()
            .filter_map(|id| self.release(id, "reconcile").ok())
            .inspect(|r| {
                error!(
                    trade_id = r.trade_id,
                    asset = %r.asset,
                    risk = r.risk_usd,
                    reserved_at = %r.reserved_at,
                    "reservation leak released"
                )
            })
            .collect()
    }

    /// Start a new UTC day if `now` is past the current one. Returns whether
    /// a rollover happened.
    pub fn roll_day(&mut self, now: DateTime<Utc>) -> bool {
        let horizon = now - Duration::hours(24);
        self.news_events.retain(|(at, _)| *at >= horizon);

        if now.date_naive() <= self.state.daily_reset_at.date_naive() {
            return false;
        }
        debug!(
            day = %now.date_naive(),
            previous_daily_pnl = self.state.daily_pnl,
            "day rolled"
        );
        self.state.daily_pnl = 0.0;
        self.state.daily_reset_at = midnight(now);
        true
    }

    /// Days across all phases whose net realized pnl met the threshold.
    pub fn profitable_days_total(&self) -> usize {
        let min = self.profile.min_profit_per_day_usd();
        self.state
            .realized_by_day
            .values()
            .filter(|net| to_cents(**net) >= min)
            .count()
    }

    fn phase_profit(&self) -> f64 {
        to_cents(self.state.total_pnl_from_start - self.state.phase_baseline_pnl)
    }

    /// Move to the next phase once its target and profitable-day count are met.
    pub fn advance_phase(&mut self) -> Option<PhaseTransition> {
        let target = self.profile.phase_target_usd(self.state.phase)?;
        let profit = self.phase_profit();
        if profit < target
            || self.state.profitable_days_this_phase.len() < self.profile.min_profitable_days
        {
            return None;
        }
        let from = self.state.phase;
        self.state.phase += 1;
        self.state.phase_baseline_pnl = self.state.total_pnl_from_start;
        self.state.profitable_days_this_phase.clear();
        let transition = PhaseTransition {
            from,
            to: self.state.phase,
            phase_profit_usd: profit,
            challenge_complete: self.challenge_complete(),
        };
        info!(
            from,
            to = transition.to,
            profit,
            complete = transition.challenge_complete,
            "phase advanced"
        );
        Some(transition)
    }

    pub fn phase_progress(&self) -> PhaseProgress {
        PhaseProgress {
            phase: self.state.phase,
            phase_count: self.profile.phase_count(),
            phase_profit_usd: self.phase_profit(),
            target_usd: self.profile.phase_target_usd(self.state.phase),
            profitable_days: self.state.profitable_days_this_phase.len(),
            min_profitable_days: self.profile.min_profitable_days,
            challenge_complete: self.challenge_complete(),
        }
    }

    pub fn snapshot(&self) -> RiskSnapshot {
        let s = &self.state;
        let p = &self.profile;
        let drawdown = (p.starting_balance - s.current_balance).max(0.0);
        RiskSnapshot {
            profile: p.display_name.clone(),
            starting_balance: p.starting_balance,
            current_balance: s.current_balance,
            peak_balance: s.peak_balance,
            open_trades: s.open_trade_count,
            max_concurrent_trades: p.max_concurrent_trades,
            open_risk_usd: s.open_risk,
            max_open_risk_usd: p.max_open_risk_usd(),
            daily_pnl_usd: s.daily_pnl,
            daily_loss_limit_usd: p.safe_daily_loss_usd(),
            total_pnl_usd: s.total_pnl_from_start,
            total_loss_limit_usd: p.safe_total_loss_usd(),
            total_drawdown_pct: drawdown / p.starting_balance,
            progress: self.phase_progress(),
        }
    }
}

/// Mutex-guarded manager shared by concurrent scanners.
///
/// Every call holds the lock for its whole duration, so two validations can
/// never both see the same `open_risk`.
#[derive(Debug, Clone)]
pub struct SharedRiskManager {
    inner: Arc<Mutex<RiskManager>>,
}

impl SharedRiskManager {
    pub fn new(manager: RiskManager) -> Self {
        Self {
            inner: Arc::new(Mutex::new(manager)),
        }
    }

    /// Run `f` with exclusive access. A poisoned lock is recovered; the state
    /// is only ever mutated by completed method calls.
    pub fn with<R>(&self, f: impl FnOnce(&mut RiskManager) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn profile(&self) -> Arc<AccountProfile> {
        self.with(|rm| rm.shared_profile())
    }

    pub fn validate(&self, candidate: &Candidate, now: DateTime<Utc>) -> RiskDecision {
        self.with(|rm| rm.validate(candidate, now))
    }

    pub fn record_close(
        &self,
        trade_id: u64,
        pnl: f64,
        closed_at: DateTime<Utc>,
    ) -> Result<CloseSummary, TraderError> {
        self.with(|rm| rm.record_close(trade_id, pnl, closed_at))
    }

    pub fn roll_day(&self, now: DateTime<Utc>) -> bool {
        self.with(|rm| rm.roll_day(now))
    }

    pub fn advance_phase(&self) -> Option<PhaseTransition> {
        self.with(|rm| rm.advance_phase())
    }

    pub fn reconcile_stale(&self, now: DateTime<Utc>, max_age: Duration) -> Vec<Reservation> {
        self.with(|rm| rm.reconcile_stale(now, max_age))
    }

    pub fn snapshot(&self) -> RiskSnapshot {
        self.with(|rm| rm.snapshot())
    }
}
