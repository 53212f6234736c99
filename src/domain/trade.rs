//! Simulated trades and intrabar exit resolution.
//!
//! A trade with a single target closes there. With several targets the
//! first one only moves the stop to entry; the trade then runs to the
//! furthest later target reached or is stopped out at breakeven.

use crate::domain::candle::Candle;
use crate::domain::error::TraderError;
use crate::domain::scan::Direction;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Targets beyond this many are ignored.
pub const MAX_MANAGED_TARGETS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Open,
    ClosedTp,
    ClosedSl,
    /// Stopped at breakeven after the first target.
    ClosedTrail,
    ClosedManual,
}

impl TradeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::ClosedTp => "closed_tp",
            TradeStatus::ClosedSl => "closed_sl",
            TradeStatus::ClosedTrail => "closed_trail",
            TradeStatus::ClosedManual => "closed_manual",
        }
    }

    pub fn is_closed(self) -> bool {
        self != TradeStatus::Open
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Levels and sizing of an approved entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEntry {
    pub asset: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub stop_loss: f64,
    /// Nearest first.
    pub targets: Vec<f64>,
    pub risk_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub id: u64,
    pub asset: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    /// Initial stop; R is always measured against it.
    pub stop_loss: f64,
    pub targets: Vec<f64>,
    pub tp1_hit: bool,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub status: TradeStatus,
    pub pnl: f64,
    pub risk_usd: f64,
}

impl Trade {
    pub fn open(id: u64, entry: TradeEntry) -> Self {
        let mut targets = entry.targets;
        targets.truncate(MAX_MANAGED_TARGETS);
        Self {
            id,
            asset: entry.asset,
            direction: entry.direction,
            entry_price: entry.entry_price,
            entry_time: entry.entry_time,
            stop_loss: entry.stop_loss,
            targets,
            tp1_hit: false,
            exit_price: None,
            exit_time: None,
            status: TradeStatus::Open,
            pnl: 0.0,
            risk_usd: entry.risk_usd,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    pub fn stop_distance(&self) -> f64 {
        (self.entry_price - self.stop_loss).abs()
    }

    /// Stop in force: the initial stop, or entry once the first of several
    /// targets has been reached.
    pub fn active_stop(&self) -> f64 {
        if self.tp1_hit {
            self.entry_price
        } else {
            self.stop_loss
        }
    }

    /// Signed move in units of initial risk.
    pub fn r_multiple_at(&self, price: f64) -> f64 {
        let distance = self.stop_distance();
        if distance <= 0.0 {
            return 0.0;
        }
        self.direction.sign() * (price - self.entry_price) / distance
    }

    pub fn r_multiple(&self) -> Option<f64> {
        self.exit_price.map(|p| self.r_multiple_at(p))
    }

    pub fn exit_reason(&self) -> &'static str {
        match self.status {
            TradeStatus::Open => "open",
            TradeStatus::ClosedTp => "take profit",
            TradeStatus::ClosedSl => "stop loss",
            TradeStatus::ClosedTrail => "tp1 + trail",
            TradeStatus::ClosedManual => "closed at end of data",
        }
    }

    pub fn should_stop_loss(&self, candle: &Candle) -> bool {
        let stop = self.active_stop();
        match self.direction {
            Direction::Long => candle.low <= stop,
            Direction::Short => candle.high >= stop,
            Direction::None => false,
        }
    }

    fn reaches(&self, candle: &Candle, level: f64) -> bool {
        match self.direction {
            Direction::Long => candle.high >= level,
            Direction::Short => candle.low <= level,
            Direction::None => false,
        }
    }

    pub fn should_take_profit(&self, candle: &Candle) -> bool {
        self.targets.first().is_some_and(|&tp| self.reaches(candle, tp))
    }

    /// Apply `candle` to the open trade and return the exit it triggers.
    /// The stop wins whenever it and a target are reachable in the same bar;
    /// reaching the first of several targets moves the stop to entry.
    pub fn manage(&mut self, candle: &Candle) -> Option<(TradeStatus, f64)> {
        if !self.is_open() {
            return None;
        }
        if self.should_stop_loss(candle) {
            return Some(if self.tp1_hit {
                (TradeStatus::ClosedTrail, self.entry_price)
            } else {
                (TradeStatus::ClosedSl, self.stop_loss)
            });
        }
        if self.tp1_hit {
            return self.targets[1..]
                .iter()
                .rev()
                .find(|&&tp| self.reaches(candle, tp))
                .map(|&tp| (TradeStatus::ClosedTp, tp));
        }
        if !self.should_take_profit(candle) {
            return None;
        }
        if self.targets.len() == 1 {
            return Some((TradeStatus::ClosedTp, self.targets[0]));
        }
        self.tp1_hit = true;
        self.should_stop_loss(candle)
            .then_some((TradeStatus::ClosedTrail, self.entry_price))
    }

    /// Close at `price`; pnl is the R-multiple times the reserved risk.
    pub fn close(
        &mut self,
        status: TradeStatus,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<f64, TraderError> {
        if !self.is_open() || !status.is_closed() {
            return Err(TraderError::StateInconsistency {
                reason: format!("trade {} cannot move {} -> {}", self.id, self.status, status),
            });
        }
        self.pnl = self.r_multiple_at(price) * self.risk_usd;
        self.exit_price = Some(price);
        self.exit_time = Some(at);
        self.status = status;
        Ok(self.pnl)
    }
}
