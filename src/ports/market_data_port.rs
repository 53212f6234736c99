//! Historical candle access port trait.

use crate::domain::candle::{Candle, Timeframe};
use crate::domain::error::TraderError;
use crate::domain::series::AssetSeries;
use chrono::{DateTime, Utc};

pub trait MarketDataPort {
    /// Closed candles of `asset` whose open_time lies in `[start, end]`,
    /// oldest first.
    fn get_candles(
        &self,
        asset: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, TraderError>;

    /// All four timeframes of `asset`, validated through series append.
    fn load_asset(
        &self,
        asset: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AssetSeries, TraderError> {
        let mut series = AssetSeries::new(asset);
        for timeframe in Timeframe::ALL {
            let target = series.get_mut(timeframe);
            for candle in self.get_candles(asset, timeframe, start, end)? {
                target.push(candle)?;
            }
        }
        Ok(series)
    }
}
