//! CSV candle store: one `<ASSET>_<TF>.csv` file per asset and timeframe.

use crate::domain::candle::{Candle, Timeframe};
use crate::domain::error::TraderError;
use crate::ports::market_data_port::MarketDataPort;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::fs;
use std::path::PathBuf;

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, asset: &str, timeframe: Timeframe) -> PathBuf {
        self.base_path
            .join(format!("{}_{}.csv", asset, timeframe.code()))
    }

    /// Assets that have an H4 file.
    pub fn available_assets(&self) -> Result<Vec<String>, TraderError> {
        let suffix = format!("_{}.csv", Timeframe::H4.code());
        let mut assets = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(asset) = name.strip_suffix(&suffix) {
                assets.push(asset.to_string());
            }
        }
        assets.sort();
        Ok(assets)
    }
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(t.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
}

impl MarketDataPort for CsvAdapter {
    fn get_candles(
        &self,
        asset: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, TraderError> {
        let unavailable = |reason: String| TraderError::DataUnavailable {
            asset: asset.to_string(),
            timeframe,
            reason,
        };

        let path = self.csv_path(asset, timeframe);
        let content = fs::read_to_string(&path)
            .map_err(|e| unavailable(format!("failed to read {}: {}", path.display(), e)))?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut candles = Vec::new();

        for (row, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| unavailable(format!("CSV parse error: {}", e)))?;
            let line = row + 2;

            let time_str = record
                .get(0)
                .ok_or_else(|| unavailable(format!("line {line}: missing open_time column")))?;
            let open_time = parse_time(time_str).ok_or_else(|| {
                unavailable(format!("line {line}: invalid open_time '{time_str}'"))
            })?;

            if open_time < start || open_time > end {
                continue;
            }

            let column = |index: usize, name: &str| -> Result<f64, TraderError> {
                record
                    .get(index)
                    .ok_or_else(|| unavailable(format!("line {line}: missing {name} column")))?
                    .trim()
                    .parse()
                    .map_err(|e| unavailable(format!("line {line}: invalid {name} value: {e}")))
            };

            let open = column(1, "open")?;
            let high = column(2, "high")?;
            let low = column(3, "low")?;
            let close = column(4, "close")?;
            let volume = if record.get(5).is_some_and(|v| !v.trim().is_empty()) {
                column(5, "volume")?
            } else {
                0.0
            };

            if high < low || high < open.max(close) || low > open.min(close) {
                return Err(unavailable(format!(
                    "line {line}: inconsistent OHLC ({open}, {high}, {low}, {close})"
                )));
            }

            candles.push(Candle {
                open_time,
                close_time: timeframe.close_time_for(open_time),
                open,
                high,
                low,
                close,
                volume,
            });
        }

        candles.sort_by_key(|c| c.open_time);
        Ok(candles)
    }
}
