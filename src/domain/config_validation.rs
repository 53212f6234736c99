//! Configuration loading and validation.
//!
//! Everything is checked before any replay or scan starts; a bad value is a
//! `ConfigInvalid`, an absent required key a `ConfigMissing`.

use crate::domain::confluence::ConfluenceParams;
use crate::domain::error::TraderError;
use crate::domain::profile::{AccountProfile, ProfileName};
use crate::domain::scan::MIN_ACTIVE_RISK_REWARD;
use crate::ports::config_port::ConfigPort;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> TraderError {
    TraderError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn missing(section: &str, key: &str) -> TraderError {
    TraderError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

/// Everything `backtest` needs, validated.
#[derive(Debug, Clone)]
pub struct BacktestSettings {
    pub profile: AccountProfile,
    pub params: ConfluenceParams,
    pub data_path: PathBuf,
    pub assets: Vec<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub news: Vec<(DateTime<Utc>, String)>,
    /// Replay each calendar month as its own challenge.
    pub monthly: bool,
}

/// Everything `scan` needs, validated.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub profile: AccountProfile,
    pub params: ConfluenceParams,
    pub data_path: PathBuf,
    pub assets: Vec<String>,
    pub prices: BTreeMap<String, f64>,
    pub news: Vec<(DateTime<Utc>, String)>,
    pub signals_path: Option<PathBuf>,
}

pub fn load_backtest_settings(
    config: &dyn ConfigPort,
    profile_override: Option<&str>,
) -> Result<BacktestSettings, TraderError> {
    let (start, end) = load_backtest_window(config)?;
    Ok(BacktestSettings {
        profile: load_profile(config, profile_override)?,
        params: load_confluence_params(config)?,
        data_path: load_data_path(config)?,
        assets: load_assets(config)?,
        start,
        end,
        news: load_news(config)?,
        monthly: config.get_bool("backtest", "monthly", false),
    })
}

pub fn load_scan_settings(
    config: &dyn ConfigPort,
    profile_override: Option<&str>,
) -> Result<ScanSettings, TraderError> {
    Ok(ScanSettings {
        profile: load_profile(config, profile_override)?,
        params: load_confluence_params(config)?,
        data_path: load_data_path(config)?,
        assets: load_assets(config)?,
        prices: load_prices(config)?,
        news: load_news(config)?,
        signals_path: config
            .get_string("output", "signals")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
    })
}

/// Profile named by `selector`, else by `[account] profile`.
/// `[account] min_risk_reward` may raise the profile's R:R floor.
pub fn load_profile(
    config: &dyn ConfigPort,
    selector: Option<&str>,
) -> Result<AccountProfile, TraderError> {
    let name = match selector {
        Some(name) => name.to_string(),
        None => config
            .get_string("account", "profile")
            .ok_or_else(|| missing("account", "profile"))?,
    };
    let mut profile = name.parse::<ProfileName>()?.profile();

    let min_rr = config.get_double("account", "min_risk_reward", profile.min_risk_reward);
    if min_rr.is_nan() || min_rr < MIN_ACTIVE_RISK_REWARD {
        return Err(invalid(
            "account",
            "min_risk_reward",
            format!("min_risk_reward must be at least {MIN_ACTIVE_RISK_REWARD}"),
        ));
    }
    profile.min_risk_reward = min_rr;
    Ok(profile)
}

fn count(
    config: &dyn ConfigPort,
    key: &str,
    default: usize,
    min: usize,
) -> Result<usize, TraderError> {
    let value = config.get_int("confluence", key, default as i64);
    if value < min as i64 {
        return Err(invalid(
            "confluence",
            key,
            format!("{key} must be at least {min}"),
        ));
    }
    Ok(value as usize)
}

fn positive(config: &dyn ConfigPort, key: &str, default: f64) -> Result<f64, TraderError> {
    let value = config.get_double("confluence", key, default);
    if value <= 0.0 || !value.is_finite() {
        return Err(invalid("confluence", key, format!("{key} must be positive")));
    }
    Ok(value)
}

/// Defaults with any `[confluence]` overrides applied.
pub fn load_confluence_params(config: &dyn ConfigPort) -> Result<ConfluenceParams, TraderError> {
    let d = ConfluenceParams::default();
    let params = ConfluenceParams {
        pivot_strength: count(config, "pivot_strength", d.pivot_strength, 1)?,
        trend_window: count(config, "trend_window", d.trend_window, 3)?,
        trend_slope_min_pct: positive(config, "trend_slope_min_pct", d.trend_slope_min_pct)?,
        atr_period: count(config, "atr_period", d.atr_period, 1)?,
        zone_tolerance_atr: positive(config, "zone_tolerance_atr", d.zone_tolerance_atr)?,
        fib_lookback: count(config, "fib_lookback", d.fib_lookback, 2)?,
        fib_min: positive(config, "fib_min", d.fib_min)?,
        fib_max: positive(config, "fib_max", d.fib_max)?,
        equal_level_tolerance_atr: positive(
            config,
            "equal_level_tolerance_atr",
            d.equal_level_tolerance_atr,
        )?,
        liquidity_proximity_atr: positive(
            config,
            "liquidity_proximity_atr",
            d.liquidity_proximity_atr,
        )?,
        sweep_lookback: count(config, "sweep_lookback", d.sweep_lookback, 1)?,
        sweep_window: count(config, "sweep_window", d.sweep_window, 1)?,
        confirmation_lookback: count(config, "confirmation_lookback", d.confirmation_lookback, 1)?,
        momentum_body_ratio: positive(config, "momentum_body_ratio", d.momentum_body_ratio)?,
        stop_buffer_atr: positive(config, "stop_buffer_atr", d.stop_buffer_atr)?,
        max_targets: count(config, "max_targets", d.max_targets, 1)?,
        min_monthly: count(config, "min_monthly", d.min_monthly, 1)?,
        min_weekly: count(config, "min_weekly", d.min_weekly, 1)?,
        min_daily: count(config, "min_daily", d.min_daily, 1)?,
        min_h4: count(config, "min_h4", d.min_h4, 1)?,
    };
    if params.fib_min >= params.fib_max || params.fib_max >= 1.0 {
        return Err(invalid(
            "confluence",
            "fib_min",
            "fib_min must be below fib_max, and fib_max below 1",
        ));
    }
    if params.momentum_body_ratio > 1.0 {
        return Err(invalid(
            "confluence",
            "momentum_body_ratio",
            "momentum_body_ratio must not exceed 1",
        ));
    }
    Ok(params)
}

fn parse_date(value: Option<String>, key: &str) -> Result<NaiveDate, TraderError> {
    let s = value.ok_or_else(|| missing("backtest", key))?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| {
        invalid(
            "backtest",
            key,
            format!("invalid {key} format, expected YYYY-MM-DD"),
        )
    })
}

/// `[backtest] start_date`/`end_date` as UTC bounds; the end date is
/// inclusive, so the window closes at the following midnight.
pub fn load_backtest_window(
    config: &dyn ConfigPort,
) -> Result<(DateTime<Utc>, DateTime<Utc>), TraderError> {
    let start = parse_date(config.get_string("backtest", "start_date"), "start_date")?;
    let end = parse_date(config.get_string("backtest", "end_date"), "end_date")?;
    if start > end {
        return Err(invalid(
            "backtest",
            "start_date",
            "start_date must not be after end_date",
        ));
    }
    Ok((
        start.and_time(NaiveTime::MIN).and_utc(),
        end.and_time(NaiveTime::MIN).and_utc() + Duration::days(1),
    ))
}

pub fn load_data_path(config: &dyn ConfigPort) -> Result<PathBuf, TraderError> {
    match config.get_string("data", "path") {
        Some(s) if !s.trim().is_empty() => Ok(PathBuf::from(s.trim())),
        _ => Err(missing("data", "path")),
    }
}

/// Comma-separated instrument codes, upper-cased and de-duplicated.
pub fn load_assets(config: &dyn ConfigPort) -> Result<Vec<String>, TraderError> {
    let raw = config
        .get_string("backtest", "assets")
        .ok_or_else(|| missing("backtest", "assets"))?;
    let mut assets: Vec<String> = Vec::new();
    for asset in raw.split(',').map(|a| a.trim().to_uppercase()) {
        if asset.is_empty() {
            continue;
        }
        if !asset.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid(
                "backtest",
                "assets",
                format!("invalid instrument code '{asset}'"),
            ));
        }
        if !assets.contains(&asset) {
            assets.push(asset);
        }
    }
    if assets.is_empty() {
        return Err(invalid("backtest", "assets", "at least one asset is required"));
    }
    Ok(assets)
}

/// `[prices] ASSET = price`; every price must be positive.
pub fn load_prices(config: &dyn ConfigPort) -> Result<BTreeMap<String, f64>, TraderError> {
    let mut prices = BTreeMap::new();
    for (key, value) in config.entries("prices") {
        let price: f64 = value
            .trim()
            .parse()
            .map_err(|_| invalid("prices", &key, format!("'{value}' is not a number")))?;
        if price <= 0.0 || !price.is_finite() {
            return Err(invalid("prices", &key, "price must be positive"));
        }
        prices.insert(key.to_uppercase(), price);
    }
    Ok(prices)
}

/// `[news] event = timestamp[, timestamp...]` with RFC 3339 timestamps,
/// sorted by time.
pub fn load_news(config: &dyn ConfigPort) -> Result<Vec<(DateTime<Utc>, String)>, TraderError> {
    let mut events = Vec::new();
    for (name, value) in config.entries("news") {
        for stamp in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let at = DateTime::parse_from_rfc3339(stamp)
                .map_err(|e| invalid("news", &name, format!("'{stamp}': {e}")))?
                .with_timezone(&Utc);
            events.push((at, name.clone()));
        }
    }
    events.sort();
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;
    use chrono::TimeZone;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    const VALID: &str = r#"
[account]
profile = the5ers_10k_high_stakes

[data]
path = ./data

[backtest]
start_date = 2024-01-01
end_date = 2024-03-31
assets = EUR_USD, xau_usd, EUR_USD

[prices]
EUR_USD = 1.0850

[news]
nfp = 2024-03-08T13:30:00Z, 2024-02-02T13:30:00Z
"#;

    #[test]
    fn valid_backtest_settings_load() {
        let settings = load_backtest_settings(&make_config(VALID), None).unwrap();
        assert_eq!(settings.profile.name, "the5ers_10k_high_stakes");
        assert_eq!(settings.assets, vec!["EUR_USD", "XAU_USD"]);
        assert_eq!(settings.start, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(settings.end, Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());
        assert_eq!(settings.params, ConfluenceParams::default());
        assert_eq!(settings.news.len(), 2);
        assert_eq!(settings.news[0].0, Utc.with_ymd_and_hms(2024, 2, 2, 13, 30, 0).unwrap());
        assert_eq!(settings.news[0].1, "nfp");
        assert!(!settings.monthly);
    }

    #[test]
    fn monthly_flag_reads_from_backtest_section() {
        let config = make_config(&VALID.replace("[backtest]\n", "[backtest]\nmonthly = yes\n"));
        assert!(load_backtest_settings(&config, None).unwrap().monthly);
        let config = make_config(&VALID.replace("[backtest]\n", "[backtest]\nmonthly = no\n"));
        assert!(!load_backtest_settings(&config, None).unwrap().monthly);
    }

    #[test]
    fn scan_settings_read_prices() {
        let settings = load_scan_settings(&make_config(VALID), None).unwrap();
        assert_eq!(settings.prices.get("EUR_USD"), Some(&1.085));
        assert_eq!(settings.signals_path, None);
    }

    #[test]
    fn profile_override_wins() {
        let profile = load_profile(&make_config(VALID), Some("the5ers_100k_high_stakes")).unwrap();
        assert_eq!(profile.starting_balance, 100_000.0);
    }

    #[test]
    fn unknown_profile_is_config_error() {
        let err = load_profile(&make_config("[account]\nprofile = ftmo_200k\n"), None).unwrap_err();
        assert!(matches!(err, TraderError::UnknownProfile(ref name) if name == "ftmo_200k"));
        assert!(err.is_config_error());
    }

    #[test]
    fn missing_profile_is_config_missing() {
        let err = load_profile(&make_config("[account]\n"), None).unwrap_err();
        assert!(matches!(err, TraderError::ConfigMissing { key, .. } if key == "profile"));
    }

    #[test]
    fn min_risk_reward_floor_enforced() {
        let config = make_config("[account]\nprofile = the5ers_10k_high_stakes\nmin_risk_reward = 1.2\n");
        let err = load_profile(&config, None).unwrap_err();
        assert!(matches!(err, TraderError::ConfigInvalid { key, .. } if key == "min_risk_reward"));

        let config = make_config("[account]\nprofile = the5ers_10k_high_stakes\nmin_risk_reward = 2\n");
        assert_eq!(load_profile(&config, None).unwrap().min_risk_reward, 2.0);
    }

    #[test]
    fn confluence_overrides_apply() {
        let config = make_config("[confluence]\npivot_strength = 3\nfib_max = 0.705\n");
        let params = load_confluence_params(&config).unwrap();
        assert_eq!(params.pivot_strength, 3);
        assert_eq!(params.fib_max, 0.705);
        assert_eq!(params.fib_min, 0.5);
    }

    #[test]
    fn fib_band_must_be_ordered() {
        let config = make_config("[confluence]\nfib_min = 0.8\nfib_max = 0.6\n");
        let err = load_confluence_params(&config).unwrap_err();
        assert!(matches!(err, TraderError::ConfigInvalid { key, .. } if key == "fib_min"));
    }

    #[test]
    fn zero_pivot_strength_fails() {
        let config = make_config("[confluence]\npivot_strength = 0\n");
        assert!(load_confluence_params(&config).is_err());
    }

    #[test]
    fn start_after_end_fails() {
        let config = make_config("[backtest]\nstart_date = 2024-05-01\nend_date = 2024-03-31\n");
        let err = load_backtest_window(&config).unwrap_err();
        assert!(matches!(err, TraderError::ConfigInvalid { key, .. } if key == "start_date"));
    }

    #[test]
    fn invalid_date_format_fails() {
        let config = make_config("[backtest]\nstart_date = 01/01/2024\nend_date = 2024-03-31\n");
        assert!(matches!(
            load_backtest_window(&config).unwrap_err(),
            TraderError::ConfigInvalid { key, .. } if key == "start_date"
        ));
    }

    #[test]
    fn missing_end_date_fails() {
        let config = make_config("[backtest]\nstart_date = 2024-01-01\n");
        assert!(matches!(
            load_backtest_window(&config).unwrap_err(),
            TraderError::ConfigMissing { key, .. } if key == "end_date"
        ));
    }

    #[test]
    fn empty_asset_list_fails() {
        let config = make_config("[backtest]\nassets = , ,\n");
        assert!(load_assets(&config).is_err());
        let config = make_config("[backtest]\nassets = EUR/USD\n");
        assert!(load_assets(&config).is_err());
    }

    #[test]
    fn missing_data_path_fails() {
        let err = load_data_path(&make_config("[data]\n")).unwrap_err();
        assert!(matches!(err, TraderError::ConfigMissing { key, .. } if key == "path"));
    }

    #[test]
    fn non_positive_price_fails() {
        let config = make_config("[prices]\nEUR_USD = -1\n");
        assert!(load_prices(&config).is_err());
        let config = make_config("[prices]\nEUR_USD = abc\n");
        assert!(load_prices(&config).is_err());
    }

    #[test]
    fn bad_news_timestamp_fails() {
        let config = make_config("[news]\ncpi = 2024-03-12\n");
        assert!(matches!(
            load_news(&config).unwrap_err(),
            TraderError::ConfigInvalid { section, .. } if section == "news"
        ));
    }
}
