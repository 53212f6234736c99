//! Prop-firm account profiles and their derived USD limits.

use crate::domain::error::TraderError;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Trading-window rules applied before any risk check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeRestrictions {
    /// No new trades on Friday at or after this UTC hour.
    pub friday_cutoff_hour_utc: u32,
    /// No new trades this many hours after the Monday 00:00 UTC open.
    pub monday_cooldown_hours: u32,
    /// Blackout half-width around a high-impact news event.
    pub news_blackout_minutes: i64,
}

impl Default for TimeRestrictions {
    fn default() -> Self {
        Self {
            friday_cutoff_hour_utc: 20,
            monday_cooldown_hours: 2,
            news_blackout_minutes: 2,
        }
    }
}

/// Immutable challenge configuration, selected once at startup.
///
/// All percentages are fractions (`0.05` is 5%) of `starting_balance`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountProfile {
    pub name: String,
    pub display_name: String,
    pub currency: String,
    pub starting_balance: f64,
    pub risk_per_trade_pct: f64,
    pub max_daily_loss_pct: f64,
    pub max_total_drawdown_pct: f64,
    pub daily_loss_buffer_pct: f64,
    pub total_loss_buffer_pct: f64,
    pub max_open_risk_pct: f64,
    pub max_concurrent_trades: usize,
    /// Profit target of each phase, measured from the phase's own baseline.
    pub phase_targets: Vec<f64>,
    pub min_profitable_days: usize,
    pub min_profit_per_day_pct: f64,
    pub min_risk_reward: f64,
    pub time_restrictions: TimeRestrictions,
}

/// Round to whole cents so limit comparisons are exact.
pub fn to_cents(usd: f64) -> f64 {
    (usd * 100.0).round() / 100.0
}

impl AccountProfile {
    pub fn the5ers_10k_high_stakes() -> Self {
        Self::the5ers_high_stakes(
            ProfileName::The5ers10kHighStakes,
            "The5ers High Stakes 10K",
            10_000.0,
            3,
        )
    }

    pub fn the5ers_100k_high_stakes() -> Self {
        Self::the5ers_high_stakes(
            ProfileName::The5ers100kHighStakes,
            "The5ers High Stakes 100K",
            100_000.0,
            5,
        )
    }

    fn the5ers_high_stakes(
        name: ProfileName,
        display_name: &str,
        starting_balance: f64,
        max_concurrent_trades: usize,
    ) -> Self {
        Self {
            name: name.as_str().to_string(),
            display_name: display_name.to_string(),
            currency: "USD".to_string(),
            starting_balance,
            risk_per_trade_pct: 0.01,
            max_daily_loss_pct: 0.05,
            max_total_drawdown_pct: 0.10,
            daily_loss_buffer_pct: 0.01,
            total_loss_buffer_pct: 0.01,
            max_open_risk_pct: 0.03,
            max_concurrent_trades,
            phase_targets: vec![0.08, 0.05],
            min_profitable_days: 3,
            min_profit_per_day_pct: 0.005,
            min_risk_reward: 1.5,
            time_restrictions: TimeRestrictions::default(),
        }
    }

    pub fn by_name(name: &str) -> Result<Self, TraderError> {
        Ok(name.parse::<ProfileName>()?.profile())
    }

    pub fn phase_count(&self) -> usize {
        self.phase_targets.len()
    }

    /// Profit target of a 1-indexed phase, `None` past the final phase.
    pub fn phase_target_pct(&self, phase: usize) -> Option<f64> {
        phase
            .checked_sub(1)
            .and_then(|i| self.phase_targets.get(i))
            .copied()
    }

    pub fn phase_target_usd(&self, phase: usize) -> Option<f64> {
        self.phase_target_pct(phase)
            .map(|pct| to_cents(pct * self.starting_balance))
    }

    pub fn risk_per_trade_usd(&self) -> f64 {
        to_cents(self.risk_per_trade_pct * self.starting_balance)
    }

    pub fn max_open_risk_usd(&self) -> f64 {
        to_cents(self.max_open_risk_pct * self.starting_balance)
    }

    /// Daily loss limit after the safety buffer, as a positive amount.
    pub fn safe_daily_loss_usd(&self) -> f64 {
        to_cents((self.max_daily_loss_pct - self.daily_loss_buffer_pct) * self.starting_balance)
    }

    /// Total loss limit after the safety buffer, as a positive amount.
    pub fn safe_total_loss_usd(&self) -> f64 {
        to_cents(
            (self.max_total_drawdown_pct - self.total_loss_buffer_pct) * self.starting_balance,
        )
    }

    pub fn hard_daily_loss_usd(&self) -> f64 {
        to_cents(self.max_daily_loss_pct * self.starting_balance)
    }

    pub fn hard_total_loss_usd(&self) -> f64 {
        to_cents(self.max_total_drawdown_pct * self.starting_balance)
    }

    pub fn min_profit_per_day_usd(&self) -> f64 {
        to_cents(self.min_profit_per_day_pct * self.starting_balance)
    }
}

/// Selector for the predefined profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileName {
    The5ers10kHighStakes,
    The5ers100kHighStakes,
}

impl ProfileName {
    pub const ALL: [ProfileName; 2] = [
        ProfileName::The5ers10kHighStakes,
        ProfileName::The5ers100kHighStakes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProfileName::The5ers10kHighStakes => "the5ers_10k_high_stakes",
            ProfileName::The5ers100kHighStakes => "the5ers_100k_high_stakes",
        }
    }

    pub fn profile(self) -> AccountProfile {
        match self {
            ProfileName::The5ers10kHighStakes => AccountProfile::the5ers_10k_high_stakes(),
            ProfileName::The5ers100kHighStakes => AccountProfile::the5ers_100k_high_stakes(),
        }
    }
}

impl fmt::Display for ProfileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileName {
    type Err = TraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ProfileName::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| TraderError::UnknownProfile(s.to_string()))
    }
}
