//! CLI definition and dispatch.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use crate::adapters::console_notifier::{format_monthly_reports, ConsoleNotifier};
use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_signal_adapter::JsonSignalFile;
use crate::adapters::static_price_adapter::StaticPriceAdapter;
use crate::domain::backtest::{BacktestConfig, BacktestReport, BacktestSimulator, MonthlyReport};
use crate::domain::config_validation::{
    load_assets, load_backtest_settings, load_backtest_window, load_confluence_params,
    load_data_path, load_news, load_prices, load_profile, load_scan_settings,
};
use crate::domain::confluence::ConfluenceEvaluator;
use crate::domain::error::TraderError;
use crate::domain::metrics::BacktestMetrics;
use crate::domain::profile::{AccountProfile, ProfileName};
use crate::domain::risk::{RiskManager, SharedRiskManager};
use crate::domain::scan::ScanResult;
use crate::domain::scanner::{ScanOutcome, Scanner};
use crate::domain::series::AssetSeries;
use crate::ports::config_port::ConfigPort;
use crate::ports::market_data_port::MarketDataPort;
use crate::ports::notify_port::Notifier;
use crate::ports::signal_port::SignalSink;

#[derive(Parser, Debug)]
#[command(name = "propdesk", about = "Prop-firm challenge setup scanner and backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay history through the challenge rules
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Account profile, overriding [account] profile
        #[arg(short, long)]
        profile: Option<String>,
        /// Comma-separated assets, overriding [backtest] assets
        #[arg(long)]
        assets: Option<String>,
        /// Write the report and metrics as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Replay each calendar month as its own challenge, as does
        /// [backtest] monthly = true
        #[arg(long)]
        monthly: bool,
    },
    /// Grade every asset now and emit signals for approved setups
    Scan {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        profile: Option<String>,
        /// Evaluation time (RFC 3339); defaults to now
        #[arg(long)]
        as_of: Option<String>,
        /// Signal file, overriding [output] signals
        #[arg(long)]
        signals: Option<PathBuf>,
        /// Write every scan result as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the built-in account profiles
    Profiles,
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        profile: Option<String>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            profile,
            assets,
            output,
            monthly,
        } => run_backtest(
            &config,
            profile.as_deref(),
            assets.as_deref(),
            output.as_ref(),
            monthly,
        ),
        Command::Scan {
            config,
            profile,
            as_of,
            signals,
            output,
        } => run_scan(
            &config,
            profile.as_deref(),
            as_of.as_deref(),
            signals.as_ref(),
            output.as_ref(),
        ),
        Command::Profiles => run_profiles(),
        Command::Validate { config, profile } => run_validate(&config, profile.as_deref()),
    }
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        let err = TraderError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        };
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

fn fail(err: TraderError) -> ExitCode {
    eprintln!("error: {err}");
    (&err).into()
}

/// Every candle up to `end`; history before a backtest window is needed for
/// the higher timeframes. Assets without data are skipped with a warning.
fn load_universe(
    data: &dyn MarketDataPort,
    assets: &[String],
    end: DateTime<Utc>,
) -> Vec<AssetSeries> {
    let mut loaded = Vec::with_capacity(assets.len());
    for asset in assets {
        match data.load_asset(asset, DateTime::<Utc>::MIN_UTC, end) {
            Ok(series) if series.h4.is_empty() => {
                eprintln!("warning: skipping {asset} (no H4 candles)");
            }
            Ok(series) => loaded.push(series),
            Err(e) => eprintln!("warning: skipping {asset} ({e})"),
        }
    }
    loaded
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), TraderError> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

#[derive(Serialize)]
struct BacktestOutput<'a> {
    report: &'a BacktestReport,
    metrics: BacktestMetrics,
}

#[derive(Serialize)]
struct MonthlyOutput<'a> {
    month: &'a str,
    report: &'a BacktestReport,
    metrics: BacktestMetrics,
}

impl<'a> From<&'a MonthlyReport> for MonthlyOutput<'a> {
    fn from(month: &'a MonthlyReport) -> Self {
        Self {
            month: &month.month,
            report: &month.report,
            metrics: BacktestMetrics::compute(&month.report),
        }
    }
}

fn run_backtest(
    config_path: &PathBuf,
    profile_override: Option<&str>,
    assets_override: Option<&str>,
    output_path: Option<&PathBuf>,
    monthly: bool,
) -> ExitCode {
    // Stage 1: Load and validate config
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let mut settings = match load_backtest_settings(&adapter, profile_override) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    if let Some(list) = assets_override {
        settings.assets = list
            .split(',')
            .map(|a| a.trim().to_uppercase())
            .filter(|a| !a.is_empty())
            .collect();
    }
    eprintln!("Profile: {}", settings.profile.display_name);

    // Stage 2: Load candles
    let data = CsvAdapter::new(settings.data_path.clone());
    let universe = load_universe(&data, &settings.assets, settings.end);
    if universe.is_empty() {
        return fail(TraderError::ConfigInvalid {
            section: "backtest".to_string(),
            key: "assets".to_string(),
            reason: "no asset has data to backtest".to_string(),
        });
    }

    // Stage 3: Replay
    eprintln!(
        "Running backtest: {} assets, {} to {}",
        universe.len(),
        settings.start.date_naive(),
        settings.end.date_naive(),
    );
    let profile = Arc::new(settings.profile);
    let simulator = BacktestSimulator::new(
        ConfluenceEvaluator::new(settings.params, Arc::clone(&profile)),
        BacktestConfig {
            start: settings.start,
            end: settings.end,
            news_events: settings.news,
        },
    );
    let pairs: Vec<(&str, &AssetSeries)> =
        universe.iter().map(|s| (s.asset.as_str(), s)).collect();
    if monthly || settings.monthly {
        return run_monthly(&simulator, &pairs, profile, output_path);
    }
    let report = match simulator.run_universe(&pairs, profile) {
        Ok(r) => r,
        Err(e) => return fail(e),
    };

    // Stage 4: Report
    let notifier = ConsoleNotifier::stdout();
    if let Err(e) = notifier.backtest_report(&report) {
        return fail(e);
    }
    if let Some(path) = output_path {
        let output = BacktestOutput {
            report: &report,
            metrics: BacktestMetrics::compute(&report),
        };
        if let Err(e) = write_json(path, &output) {
            return fail(e);
        }
        eprintln!("\nReport written to: {}", path.display());
    }
    ExitCode::SUCCESS
}

fn run_monthly(
    simulator: &BacktestSimulator,
    pairs: &[(&str, &AssetSeries)],
    profile: Arc<AccountProfile>,
    output_path: Option<&PathBuf>,
) -> ExitCode {
    let months = match simulator.run_monthly(pairs, profile) {
        Ok(m) => m,
        Err(e) => return fail(e),
    };
    print!("{}", format_monthly_reports(&months));
    if let Some(path) = output_path {
        let output: Vec<MonthlyOutput<'_>> = months.iter().map(MonthlyOutput::from).collect();
        if let Err(e) = write_json(path, &output) {
            return fail(e);
        }
        eprintln!("\nMonthly reports written to: {}", path.display());
    }
    ExitCode::SUCCESS
}

fn parse_as_of(value: Option<&str>) -> Result<DateTime<Utc>, TraderError> {
    match value {
        None => Ok(Utc::now()),
        Some(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| TraderError::ConfigInvalid {
                section: "cli".to_string(),
                key: "as_of".to_string(),
                reason: e.to_string(),
            }),
    }
}

fn run_scan(
    config_path: &PathBuf,
    profile_override: Option<&str>,
    as_of: Option<&str>,
    signals_override: Option<&PathBuf>,
    output_path: Option<&PathBuf>,
) -> ExitCode {
    // Stage 1: Load and validate config
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let settings = match load_scan_settings(&adapter, profile_override) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    let now = match parse_as_of(as_of) {
        Ok(t) => t,
        Err(e) => return fail(e),
    };

    // Stage 2: Load candles closed by now
    let data = CsvAdapter::new(settings.data_path.clone());
    let universe = load_universe(&data, &settings.assets, now);
    eprintln!("Scanning {} assets as of {}", universe.len(), now.to_rfc3339());

    // Stage 3: Grade, gate and reserve
    let profile = Arc::new(settings.profile);
    let mut manager = RiskManager::new(Arc::clone(&profile), now);
    for (at, name) in settings.news {
        manager.add_news_event(at, name);
    }
    let scanner = Scanner::new(
        ConfluenceEvaluator::new(settings.params, Arc::clone(&profile)),
        StaticPriceAdapter::new(settings.prices),
        SharedRiskManager::new(manager),
    );
    let pairs: Vec<(&str, &AssetSeries)> =
        universe.iter().map(|s| (s.asset.as_str(), s)).collect();
    let outcomes = scanner.scan(&pairs, now);

    // Stage 4: Notify
    let notifier = ConsoleNotifier::stdout();
    for outcome in &outcomes {
        if let Err(e) = notifier.scan_result(outcome.result()) {
            return fail(e);
        }
        match outcome {
            ScanOutcome::Deferred(_) => println!("  deferred: no live price"),
            ScanOutcome::Rejected { reason, .. } => println!("  rejected: {reason}"),
            ScanOutcome::Approved { signal, .. } => {
                println!("  approved: {} lots, signal {}", signal.lot_size, signal.signal_id)
            }
            ScanOutcome::Graded(_) => {}
        }
    }
    if let Err(e) = notifier.risk_snapshot(&scanner.risk().snapshot()) {
        return fail(e);
    }

    // Stage 5: Publish
    let export = scanner.export(&outcomes, now);
    if let Some(path) = signals_override.cloned().or(settings.signals_path) {
        if let Err(e) = JsonSignalFile::new(path).publish(&export) {
            return fail(e);
        }
    }
    if let Some(path) = output_path {
        let results: Vec<&ScanResult> = outcomes.iter().map(ScanOutcome::result).collect();
        if let Err(e) = write_json(path, &results) {
            return fail(e);
        }
        eprintln!("Scan results written to: {}", path.display());
    }
    ExitCode::SUCCESS
}

fn run_profiles() -> ExitCode {
    for name in ProfileName::ALL {
        let p = name.profile();
        println!("{}", name);
        println!("  {} ({} {:.0})", p.display_name, p.currency, p.starting_balance);
        println!(
            "  risk/trade {:.2}%  open risk {:.2}%  max trades {}",
            p.risk_per_trade_pct * 100.0,
            p.max_open_risk_pct * 100.0,
            p.max_concurrent_trades
        );
        println!(
            "  daily loss {:.0}%  total loss {:.0}%  min R:R {:.1}",
            p.max_daily_loss_pct * 100.0,
            p.max_total_drawdown_pct * 100.0,
            p.min_risk_reward
        );
        let targets: Vec<String> = p
            .phase_targets
            .iter()
            .map(|t| format!("{:.0}%", t * 100.0))
            .collect();
        println!(
            "  phases {}  min profitable days {}",
            targets.join(" -> "),
            p.min_profitable_days
        );
    }
    ExitCode::SUCCESS
}

fn validate_all(config: &dyn ConfigPort, profile_override: Option<&str>) -> Result<(), TraderError> {
    load_profile(config, profile_override)?;
    load_confluence_params(config)?;
    load_data_path(config)?;
    load_assets(config)?;
    load_prices(config)?;
    load_news(config)?;
    if config.get_string("backtest", "start_date").is_some()
        || config.get_string("backtest", "end_date").is_some()
    {
        load_backtest_window(config)?;
    }
    Ok(())
}

fn run_validate(config_path: &PathBuf, profile_override: Option<&str>) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    if let Err(e) = validate_all(&adapter, profile_override) {
        return fail(e);
    }

    if let (Ok(path), Ok(assets)) = (load_data_path(&adapter), load_assets(&adapter)) {
        match CsvAdapter::new(path).available_assets() {
            Ok(available) => {
                for asset in assets.iter().filter(|a| !available.contains(a)) {
                    eprintln!("warning: no H4 data for {asset}");
                }
            }
            Err(e) => eprintln!("warning: cannot list data directory ({e})"),
        }
    }
    eprintln!("Config validated successfully");
    ExitCode::SUCCESS
}
