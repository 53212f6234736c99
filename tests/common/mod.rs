#![allow(dead_code)]

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use propdesk::domain::backtest::BacktestReport;
pub use propdesk::domain::candle::{Candle, Timeframe};
use propdesk::domain::confluence::SetupEvaluator;
use propdesk::domain::error::TraderError;
use propdesk::domain::risk::RiskSnapshot;
use propdesk::domain::scan::{Direction, Pillar, PillarScore, ScanResult, SetupStatus};
use propdesk::domain::series::{AssetSeries, SeriesSnapshot};
use propdesk::domain::signal::SignalExport;
use propdesk::ports::market_data_port::MarketDataPort;
use propdesk::ports::notify_port::Notifier;
use propdesk::ports::price_port::LivePricePort;
use propdesk::ports::signal_port::SignalSink;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

pub struct MockMarketData {
    pub data: HashMap<(String, Timeframe), Vec<Candle>>,
    pub errors: HashMap<String, String>,
}

impl MockMarketData {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_asset(mut self, series: &AssetSeries) -> Self {
        for tf in Timeframe::ALL {
            self.data
                .insert((series.asset.clone(), tf), series.get(tf).candles().to_vec());
        }
        self
    }

    pub fn with_error(mut self, asset: &str, reason: &str) -> Self {
        self.errors.insert(asset.to_string(), reason.to_string());
        self
    }
}

impl MarketDataPort for MockMarketData {
    fn get_candles(
        &self,
        asset: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, TraderError> {
        if let Some(reason) = self.errors.get(asset) {
            return Err(TraderError::DataUnavailable {
                asset: asset.to_string(),
                timeframe,
                reason: reason.clone(),
            });
        }
        Ok(self
            .data
            .get(&(asset.to_string(), timeframe))
            .map(|candles| {
                candles
                    .iter()
                    .filter(|c| c.open_time >= start && c.open_time <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct MockPrices(pub BTreeMap<String, f64>);

impl MockPrices {
    pub fn with(mut self, asset: &str, price: f64) -> Self {
        self.0.insert(asset.to_string(), price);
        self
    }
}

impl LivePricePort for MockPrices {
    fn get_live_price(&self, asset: &str) -> Option<f64> {
        self.0.get(asset).copied()
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub results: Mutex<Vec<ScanResult>>,
    pub snapshots: Mutex<Vec<RiskSnapshot>>,
    pub reports: Mutex<Vec<BacktestReport>>,
}

impl Notifier for RecordingNotifier {
    fn scan_result(&self, result: &ScanResult) -> Result<(), TraderError> {
        self.results.lock().unwrap().push(result.clone());
        Ok(())
    }

    fn risk_snapshot(&self, snapshot: &RiskSnapshot) -> Result<(), TraderError> {
        self.snapshots.lock().unwrap().push(snapshot.clone());
        Ok(())
    }

    fn backtest_report(&self, report: &BacktestReport) -> Result<(), TraderError> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub published: Mutex<Vec<SignalExport>>,
}

impl SignalSink for RecordingSink {
    fn publish(&self, export: &SignalExport) -> Result<(), TraderError> {
        self.published.lock().unwrap().push(export.clone());
        Ok(())
    }
}

/// Emits an ACTIVE long at the newest H4 close whenever it fires, with the
/// stop and targets at fixed distances from that close.
pub struct ScriptedEvaluator {
    pub fire_at: Option<Vec<DateTime<Utc>>>,
    pub stop_distance: f64,
    pub target_distance: f64,
    /// Distances of any targets after the first.
    pub later_targets: Vec<f64>,
    /// `(as_of, newest close_time on any timeframe)` of every call.
    pub seen: Arc<Mutex<Vec<(DateTime<Utc>, Option<DateTime<Utc>>)>>>,
}

impl ScriptedEvaluator {
    pub fn every_bar(stop_distance: f64, target_distance: f64) -> Self {
        Self {
            fire_at: None,
            stop_distance,
            target_distance,
            later_targets: Vec::new(),
            seen: Arc::default(),
        }
    }

    pub fn with_later_targets(mut self, distances: Vec<f64>) -> Self {
        self.later_targets = distances;
        self
    }

    pub fn at(times: Vec<DateTime<Utc>>, stop_distance: f64, target_distance: f64) -> Self {
        Self {
            fire_at: Some(times),
            ..Self::every_bar(stop_distance, target_distance)
        }
    }
}

impl SetupEvaluator for ScriptedEvaluator {
    fn evaluate(&self, asset: &str, snapshot: &SeriesSnapshot<'_>) -> ScanResult {
        let newest = Timeframe::ALL
            .iter()
            .filter_map(|&tf| snapshot.get(tf).last().map(|c| c.close_time))
            .max();
        self.seen.lock().unwrap().push((snapshot.as_of(), newest));

        let fires = self
            .fire_at
            .as_ref()
            .is_none_or(|times| times.contains(&snapshot.as_of()));
        let Some(last) = snapshot.h4().last().filter(|_| fires) else {
            return ScanResult::not_evaluable(asset, snapshot.as_of(), "scripted");
        };
        let entry = last.close;
        ScanResult {
            asset: asset.to_string(),
            direction: Direction::Long,
            status: SetupStatus::Active,
            entry: Some(entry),
            stop_loss: Some(entry - self.stop_distance),
            take_profit: std::iter::once(self.target_distance)
                .chain(self.later_targets.iter().copied())
                .map(|d| entry + d)
                .collect(),
            risk_reward: Some(self.target_distance / self.stop_distance),
            pillars: Pillar::ALL.iter().map(|&p| PillarScore::pass(p, "scripted")).collect(),
            evaluated_at: snapshot.as_of(),
        }
    }

    fn min_risk_reward(&self) -> f64 {
        1.5
    }
}

/// Identical H4 bars `(high, low, close)` starting at `start`, with no
/// higher timeframes.
pub fn flat_h4(asset: &str, start: DateTime<Utc>, count: usize, bar: (f64, f64, f64)) -> AssetSeries {
    let (high, low, close) = bar;
    let mut series = AssetSeries::new(asset);
    for i in 0..count {
        let open_time = start + Duration::hours(4 * i as i64);
        series
            .h4
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
    series
}

fn period_start(tf: Timeframe, t: DateTime<Utc>) -> DateTime<Utc> {
    let day = t.date_naive();
    let start = match tf {
        Timeframe::Monthly => day.with_day(1).unwrap(),
        Timeframe::Weekly => day - Duration::days(i64::from(day.weekday().num_days_from_monday())),
        Timeframe::Daily | Timeframe::H4 => day,
    };
    start.and_time(NaiveTime::MIN).and_utc()
}

fn aggregate(tf: Timeframe, h4: &[Candle]) -> Vec<Candle> {
    let mut out: Vec<Candle> = Vec::new();
    for c in h4 {
        let open_time = period_start(tf, c.open_time);
        match out.last_mut() {
            Some(last) if last.open_time == open_time => {
                last.high = last.high.max(c.high);
                last.low = last.low.min(c.low);
                last.close = c.close;
                last.volume += c.volume;
            }
            _ => out.push(Candle {
                open_time,
                close_time: tf.close_time_for(open_time),
                ..c.clone()
            }),
        }
    }
    out
}

/// Four-timeframe series built from one H4 price path: an uptrend with
/// regular pullbacks. Higher timeframes are aggregated from the H4 bars.
pub fn trending_asset(asset: &str, start: DateTime<Utc>, bars: usize, base: f64) -> AssetSeries {
    let mut h4 = Vec::with_capacity(bars);
    let mut prev_close = base;
    for i in 0..bars {
        let x = i as f64;
        let close = base * (1.0 + 0.0006 * x) + base * 0.02 * (x / 18.0).sin();
        let open = prev_close;
        let wick = base * 0.002;
        let open_time = start + Duration::hours(4 * i as i64);
        h4.push(Candle {
            open_time,
            close_time: open_time + Duration::hours(4),
            open,
            high: open.max(close) + wick,
            low: open.min(close) - wick,
            close,
            volume: 1_000.0,
        });
        prev_close = close;
    }

    let mut series = AssetSeries::new(asset);
    for tf in [Timeframe::Monthly, Timeframe::Weekly, Timeframe::Daily] {
        for candle in aggregate(tf, &h4) {
            series.get_mut(tf).push(candle).unwrap();
        }
    }
    for candle in h4 {
        series.h4.push(candle).unwrap();
    }
    series
}

/// The same asset rebuilt from only the candles closed at `as_of`.
pub fn truncated(series: &AssetSeries, as_of: DateTime<Utc>) -> AssetSeries {
    let mut out = AssetSeries::new(series.asset.clone());
    for tf in Timeframe::ALL {
        for candle in series.get(tf).closed_at(as_of) {
            out.get_mut(tf).push(candle.clone()).unwrap();
        }
    }
    out
}

/// Write every timeframe of `series` as `<ASSET>_<TF>.csv` under `dir`.
pub fn write_series_csv(dir: &Path, series: &AssetSeries) {
    for tf in Timeframe::ALL {
        let mut content = String::from("open_time,open,high,low,close,volume\n");
        for c in series.get(tf).candles() {
            content.push_str(&format!(
                "{},{},{},{},{},{}\n",
                c.open_time.to_rfc3339(),
                c.open,
                c.high,
                c.low,
                c.close,
                c.volume
            ));
        }
        fs::write(dir.join(format!("{}_{}.csv", series.asset, tf.code())), content).unwrap();
    }
}
