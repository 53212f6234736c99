//! Performance summary of a backtest run.

use super::backtest::BacktestReport;
use super::trade::{Trade, TradeStatus};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestMetrics {
    pub total_trades: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub trades_breakeven: usize,
    pub win_rate: f64,
    /// Gross profit over gross loss; infinite when nothing was lost.
    pub profit_factor: f64,
    pub avg_r: f64,
    pub best_r: f64,
    pub worst_r: f64,
    pub net_pnl: f64,
    pub net_return_pct: f64,
    /// Peak-to-trough drop of the closed-trade equity curve, as a fraction
    /// of the peak.
    pub max_equity_drawdown_pct: f64,
    pub closed_tp: usize,
    pub closed_sl: usize,
    pub closed_trail: usize,
    pub closed_manual: usize,
}

impl BacktestMetrics {
    pub fn compute(report: &BacktestReport) -> Self {
        let trades = &report.trades;

        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut trades_breakeven = 0usize;
        let mut total_wins = 0.0_f64;
        let mut total_losses = 0.0_f64;
        let mut closed_tp = 0usize;
        let mut closed_sl = 0usize;
        let mut closed_trail = 0usize;
        let mut closed_manual = 0usize;

        for trade in trades {
            let pnl = trade.pnl;
            if pnl > 0.0 {
                trades_won += 1;
                total_wins += pnl;
            } else if pnl < 0.0 {
                trades_lost += 1;
                total_losses += pnl.abs();
            } else {
                trades_breakeven += 1;
            }
            match trade.status {
                TradeStatus::ClosedTp => closed_tp += 1,
                TradeStatus::ClosedSl => closed_sl += 1,
                TradeStatus::ClosedTrail => closed_trail += 1,
                TradeStatus::ClosedManual => closed_manual += 1,
                TradeStatus::Open => {}
            }
        }

        let total_trades = trades.len();
        let win_rate = if total_trades > 0 {
            trades_won as f64 / total_trades as f64
        } else {
            0.0
        };

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let r_multiples: Vec<f64> = trades.iter().filter_map(Trade::r_multiple).collect();
        let avg_r = if r_multiples.is_empty() {
            0.0
        } else {
            r_multiples.iter().sum::<f64>() / r_multiples.len() as f64
        };
        let best_r = r_multiples.iter().copied().reduce(f64::max).unwrap_or(0.0);
        let worst_r = r_multiples.iter().copied().reduce(f64::min).unwrap_or(0.0);

        let net_pnl = report.total_pnl();
        let net_return_pct = if report.starting_balance > 0.0 {
            net_pnl / report.starting_balance
        } else {
            0.0
        };

        BacktestMetrics {
            total_trades,
            trades_won,
            trades_lost,
            trades_breakeven,
            win_rate,
            profit_factor,
            avg_r,
            best_r,
            worst_r,
            net_pnl,
            net_return_pct,
            max_equity_drawdown_pct: equity_drawdown(report.starting_balance, trades),
            closed_tp,
            closed_sl,
            closed_trail,
            closed_manual,
        }
    }
}

/// Drawdown of the balance after each close, in exit order.
fn equity_drawdown(starting_balance: f64, trades: &[Trade]) -> f64 {
    let mut closes: Vec<&Trade> = trades.iter().filter(|t| t.exit_time.is_some()).collect();
    closes.sort_by_key(|t| (t.exit_time, t.id));

    let mut equity = starting_balance;
    let mut peak = starting_balance;
    let mut max_dd = 0.0_f64;
    for trade in closes {
        equity += trade.pnl;
        if equity > peak {
            peak = equity;
        } else if peak > 0.0 {
            max_dd = max_dd.max((peak - equity) / peak);
        }
    }
    max_dd
}
