//! Write-only notification port trait.

use crate::domain::backtest::BacktestReport;
use crate::domain::error::TraderError;
use crate::domain::risk::RiskSnapshot;
use crate::domain::scan::ScanResult;

pub trait Notifier {
    fn scan_result(&self, result: &ScanResult) -> Result<(), TraderError>;
    fn risk_snapshot(&self, snapshot: &RiskSnapshot) -> Result<(), TraderError>;
    fn backtest_report(&self, report: &BacktestReport) -> Result<(), TraderError>;
}
