//! Human-readable notifications on a text stream.

use crate::domain::backtest::{passed_months, BacktestReport, MonthlyReport};
use crate::domain::error::TraderError;
use crate::domain::metrics::BacktestMetrics;
use crate::domain::risk::RiskSnapshot;
use crate::domain::scan::ScanResult;
use crate::ports::notify_port::Notifier;
use std::fmt::Write as _;
use std::io::{self, Stdout, Write};
use std::sync::{Mutex, PoisonError};

pub struct ConsoleNotifier<W: Write = Stdout> {
    out: Mutex<W>,
}

impl ConsoleNotifier<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ConsoleNotifier<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, text: &str) -> Result<(), TraderError> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    }
}

fn price(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.5}"))
}

pub fn format_scan_result(result: &ScanResult) -> String {
    let mut s = String::new();
    let _ = writeln!(
        s,
        "{} {} {} ({}/7) entry {} sl {} tp {} rr {}",
        result.asset,
        result.status,
        result.direction,
        result.passed_count(),
        price(result.entry),
        price(result.stop_loss),
        if result.take_profit.is_empty() {
            "-".to_string()
        } else {
            result
                .take_profit
                .iter()
                .map(|tp| format!("{tp:.5}"))
                .collect::<Vec<_>>()
                .join("/")
        },
        result
            .risk_reward
            .map_or_else(|| "-".to_string(), |rr| format!("{rr:.2}")),
    );
    for pillar in &result.pillars {
        let mark = if pillar.passed { "+" } else { "-" };
        let _ = writeln!(s, "  [{mark}] {:<14} {}", pillar.pillar.name(), pillar.detail);
    }
    s
}

pub fn format_risk_snapshot(snapshot: &RiskSnapshot) -> String {
    let progress = &snapshot.progress;
    let mut s = String::new();
    let _ = writeln!(s, "=== Risk: {} ===", snapshot.profile);
    let _ = writeln!(
        s,
        "Balance:          {:.2} (start {:.2}, peak {:.2})",
        snapshot.current_balance, snapshot.starting_balance, snapshot.peak_balance
    );
    let _ = writeln!(
        s,
        "Open trades:      {}/{}  risk {:.2}/{:.2}",
        snapshot.open_trades,
        snapshot.max_concurrent_trades,
        snapshot.open_risk_usd,
        snapshot.max_open_risk_usd
    );
    let _ = writeln!(
        s,
        "Daily P&L:        {:.2} (limit -{:.2})",
        snapshot.daily_pnl_usd, snapshot.daily_loss_limit_usd
    );
    let _ = writeln!(
        s,
        "Total P&L:        {:.2} (limit -{:.2}, drawdown {:.2}%)",
        snapshot.total_pnl_usd,
        snapshot.total_loss_limit_usd,
        snapshot.total_drawdown_pct * 100.0
    );
    if progress.challenge_complete {
        let _ = writeln!(s, "Phase:            challenge complete");
    } else {
        let _ = writeln!(
            s,
            "Phase:            {}/{}  profit {:.2}/{:.2}  profitable days {}/{}",
            progress.phase,
            progress.phase_count,
            progress.phase_profit_usd,
            progress.target_usd.unwrap_or(0.0),
            progress.profitable_days,
            progress.min_profitable_days
        );
    }
    s
}

pub fn format_backtest_report(report: &BacktestReport) -> String {
    let metrics = BacktestMetrics::compute(report);
    let mut s = String::new();
    let _ = writeln!(s, "\n=== Backtest: {} ===", report.assets.join(", "));
    let _ = writeln!(s, "Profile:          {}", report.profile);
    let _ = writeln!(s, "Steps:            {}", report.steps);
    let _ = writeln!(
        s,
        "Balance:          {:.2} -> {:.2} ({:+.2}%)",
        report.starting_balance,
        report.final_balance,
        metrics.net_return_pct * 100.0
    );
    let _ = writeln!(s, "Total Trades:     {}", metrics.total_trades);
    let _ = writeln!(
        s,
        "Exits:            {} tp / {} sl / {} tp1+trail / {} manual",
        metrics.closed_tp, metrics.closed_sl, metrics.closed_trail, metrics.closed_manual
    );
    let _ = writeln!(s, "Win Rate:         {:.1}%", metrics.win_rate * 100.0);
    let _ = writeln!(s, "Profit Factor:    {:.2}", metrics.profit_factor);
    let _ = writeln!(s, "Average R:        {:.2}", metrics.avg_r);
    let _ = writeln!(
        s,
        "Max Drawdown:     daily {:.2}% / total {:.2}% / equity {:.2}%",
        report.max_daily_drawdown_pct * 100.0,
        report.max_total_drawdown_pct * 100.0,
        metrics.max_equity_drawdown_pct * 100.0
    );
    let _ = writeln!(s, "Profitable Days:  {}", report.profitable_days);
    let _ = writeln!(
        s,
        "Rejections:       daily {} / total {} / time {} / caps {}",
        report.daily_loss_violations,
        report.total_loss_violations,
        report.time_restriction_rejections,
        report.other_rejections
    );
    let _ = writeln!(s, "Phase Reached:    {}", report.phase_reached);
    match report.fail_reason {
        None if report.passed => {
            let _ = writeln!(s, "Result:           PASSED");
        }
        Some(reason) => {
            let _ = writeln!(s, "Result:           FAILED ({reason})");
        }
        None => {
            let _ = writeln!(s, "Result:           FAILED");
        }
    }
    s
}

/// One line per month, then the pass count.
pub fn format_monthly_reports(months: &[MonthlyReport]) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "\n=== Monthly challenge analysis ===");
    for month in months {
        let report = &month.report;
        let _ = writeln!(
            s,
            "{}: {} | P&L: {:+.1}% | Trades: {} | Phase: {}",
            month.month,
            if report.passed { "PASS" } else { "FAIL" },
            (report.final_balance - report.starting_balance) / report.starting_balance * 100.0,
            report.trades.len(),
            report.phase_reached
        );
    }
    let _ = writeln!(
        s,
        "Summary: {}/{} months would pass the challenge",
        passed_months(months),
        months.len()
    );
    s
}

impl<W: Write + Send> Notifier for ConsoleNotifier<W> {
    fn scan_result(&self, result: &ScanResult) -> Result<(), TraderError> {
        self.emit(&format_scan_result(result))
    }

    fn risk_snapshot(&self, snapshot: &RiskSnapshot) -> Result<(), TraderError> {
        self.emit(&format_risk_snapshot(snapshot))
    }

    fn backtest_report(&self, report: &BacktestReport) -> Result<(), TraderError> {
        self.emit(&format_backtest_report(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::profile::AccountProfile;
    use crate::domain::risk::RiskManager;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    #[test]
    fn scan_result_lists_every_pillar() {
        let at = Utc.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap();
        let notifier = ConsoleNotifier::new(Vec::new());
        notifier
            .scan_result(&ScanResult::not_evaluable("EUR_USD", at, "insufficient history"))
            .unwrap();
        let text = String::from_utf8(notifier.into_inner()).unwrap();
        assert!(text.starts_with("EUR_USD SCAN"));
        assert_eq!(text.lines().count(), 8);
        assert!(text.contains("HTF-Bias"));
    }

    #[test]
    fn risk_snapshot_shows_phase() {
        let at = Utc.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap();
        let rm = RiskManager::new(Arc::new(AccountProfile::the5ers_10k_high_stakes()), at);
        let text = format_risk_snapshot(&rm.snapshot());
        assert!(text.contains("Phase:            1/2"));
        assert!(text.contains("Open trades:      0/3"));
    }

    #[test]
    fn monthly_reports_list_each_month_and_pass_count() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let report = |passed: bool, final_balance: f64| BacktestReport {
            profile: "the5ers_10k_high_stakes".into(),
            assets: vec!["EUR_USD".into()],
            trades: Vec::new(),
            daily_loss_violations: 0,
            total_loss_violations: 0,
            time_restriction_rejections: 0,
            other_rejections: 0,
            profitable_days: 0,
            phase_reached: if passed { 3 } else { 1 },
            passed,
            fail_reason: None,
            starting_balance: 10_000.0,
            final_balance,
            steps: 0,
            max_daily_drawdown_pct: 0.0,
            max_total_drawdown_pct: 0.0,
        };
        let months = vec![
            MonthlyReport {
                month: "2024-03".into(),
                start: at,
                end: at,
                report: report(true, 11_300.0),
            },
            MonthlyReport {
                month: "2024-04".into(),
                start: at,
                end: at,
                report: report(false, 10_000.0),
            },
        ];
        let text = format_monthly_reports(&months);
        assert!(text.contains("2024-03: PASS | P&L: +13.0% | Trades: 0 | Phase: 3"));
        assert!(text.contains("2024-04: FAIL"));
        assert!(text.contains("Summary: 1/2 months would pass the challenge"));
    }
}
