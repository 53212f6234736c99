//! Live scanning: evaluate every asset on closed candles, gate ACTIVE setups
//! on a live quote, then through the shared risk manager.

use crate::domain::confluence::SetupEvaluator;
use crate::domain::risk::{Candidate, RejectReason, Reservation, RiskDecision, SharedRiskManager};
use crate::domain::scan::ScanResult;
use crate::domain::series::AssetSeries;
use crate::domain::signal::{SignalExport, SignalRecord};
use crate::ports::price_port::LivePricePort;
use chrono::{DateTime, Utc};
use std::thread;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// Below ACTIVE, or no longer ACTIVE once repriced.
    Graded(ScanResult),
    /// ACTIVE on closed candles but no live quote; reported as SCAN.
    Deferred(ScanResult),
    Rejected {
        result: ScanResult,
        reason: RejectReason,
        signal: SignalRecord,
    },
    Approved {
        result: ScanResult,
        reservation: Reservation,
        signal: SignalRecord,
    },
}

impl ScanOutcome {
    pub fn result(&self) -> &ScanResult {
        match self {
            ScanOutcome::Graded(result) | ScanOutcome::Deferred(result) => result,
            ScanOutcome::Rejected { result, .. } | ScanOutcome::Approved { result, .. } => result,
        }
    }

    pub fn signal(&self) -> Option<&SignalRecord> {
        match self {
            ScanOutcome::Rejected { signal, .. } | ScanOutcome::Approved { signal, .. } => {
                Some(signal)
            }
            _ => None,
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, ScanOutcome::Approved { .. })
    }
}

pub struct Scanner<E: SetupEvaluator, P: LivePricePort> {
    evaluator: E,
    prices: P,
    risk: SharedRiskManager,
}

impl<E: SetupEvaluator, P: LivePricePort> Scanner<E, P> {
    pub fn new(evaluator: E, prices: P, risk: SharedRiskManager) -> Self {
        Self {
            evaluator,
            prices,
            risk,
        }
    }

    pub fn risk(&self) -> &SharedRiskManager {
        &self.risk
    }

    /// Grade every asset as of `now`, in input order.
    pub fn scan(&self, assets: &[(&str, &AssetSeries)], now: DateTime<Utc>) -> Vec<ScanOutcome> {
        self.risk.roll_day(now);
        let graded = self.evaluate_all(assets, now);
        let outcomes: Vec<ScanOutcome> =
            graded.into_iter().map(|result| self.activate(result, now)).collect();
        info!(
            assets = outcomes.len(),
            approved = outcomes.iter().filter(|o| o.is_approved()).count(),
            "scan finished"
        );
        outcomes
    }

    /// Evaluation is pure, so assets are graded on scoped threads.
    fn evaluate_all(&self, assets: &[(&str, &AssetSeries)], now: DateTime<Utc>) -> Vec<ScanResult> {
        let evaluator = &self.evaluator;
        thread::scope(|scope| {
            let handles: Vec<_> = assets
                .iter()
                .map(|&(asset, series)| {
                    (
                        asset,
                        scope.spawn(move || evaluator.evaluate(asset, &series.snapshot(now))),
                    )
                })
                .collect();
            handles
                .into_iter()
                .map(|(asset, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        warn!(asset, "evaluation panicked");
                        ScanResult::not_evaluable(asset, now, "evaluation panicked")
                    })
                })
                .collect()
        })
    }

    fn activate(&self, result: ScanResult, now: DateTime<Utc>) -> ScanOutcome {
        if !result.is_active() {
            return ScanOutcome::Graded(result);
        }
        let Some(live) = self.prices.get_live_price(&result.asset) else {
            warn!(asset = %result.asset, "no live price, activation deferred");
            return ScanOutcome::Deferred(result.downgraded());
        };
        let repriced = result.reprice(live, self.evaluator.min_risk_reward());
        if !repriced.is_active() {
            debug!(asset = %repriced.asset, live, status = %repriced.status, "regraded at live price");
            return ScanOutcome::Graded(repriced);
        }

        let profile = self.risk.profile();
        let Some(candidate) = Candidate::from_scan(&repriced, profile.risk_per_trade_usd()) else {
            return ScanOutcome::Graded(repriced);
        };
        match self.risk.validate(&candidate, now) {
            RiskDecision::Approved(reservation) => {
                let signal = SignalRecord::approved(&repriced, &reservation, &profile, now);
                ScanOutcome::Approved {
                    result: repriced,
                    reservation,
                    signal,
                }
            }
            RiskDecision::Rejected(reason) => {
                let signal = SignalRecord::rejected(&repriced, &reason, &profile, now);
                ScanOutcome::Rejected {
                    result: repriced,
                    reason,
                    signal,
                }
            }
        }
    }

    /// Signal document for every outcome that reached the risk manager.
    pub fn export(&self, outcomes: &[ScanOutcome], now: DateTime<Utc>) -> SignalExport {
        let signals = outcomes.iter().filter_map(ScanOutcome::signal).cloned().collect();
        SignalExport::new(&self.risk.profile(), now, signals)
    }
}
