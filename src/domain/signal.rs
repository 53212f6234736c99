//! Execution-ready signal records and their export envelope.

use crate::domain::profile::{to_cents, AccountProfile};
use crate::domain::risk::{RejectReason, Reservation};
use crate::domain::scan::{Direction, ScanResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

const MIN_LOT: f64 = 0.01;
const LOT_STEP: f64 = 0.01;

/// Pip size and units per standard lot of an instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContractSpec {
    pub pip_size: f64,
    pub contract_size: f64,
}

impl ContractSpec {
    pub fn for_asset(asset: &str) -> Self {
        let (base, quote) = split_asset(asset);
        let (pip_size, contract_size) = match base {
            "XAU" => (0.01, 100.0),
            "XAG" => (0.001, 5_000.0),
            "NAS100" | "SPX500" | "US30" => (1.0, 1.0),
            "WTICO" | "BCO" => (0.01, 1_000.0),
            "NATGAS" => (0.001, 10_000.0),
            "BTC" => (1.0, 1.0),
            "ETH" => (0.01, 1.0),
            _ if quote == Some("JPY") => (0.01, 100_000.0),
            _ => (0.0001, 100_000.0),
        };
        Self {
            pip_size,
            contract_size,
        }
    }

    /// USD value of a one-unit price move on one lot. USD-based pairs
    /// convert from the quote currency at `price`.
    pub fn usd_per_point(&self, asset: &str, price: f64) -> f64 {
        match split_asset(asset) {
            ("USD", Some(quote)) if quote != "USD" && price > 0.0 => self.contract_size / price,
            _ => self.contract_size,
        }
    }
}

fn split_asset(asset: &str) -> (&str, Option<&str>) {
    match asset.split_once('_') {
        Some((base, quote)) => (base, Some(quote)),
        None => (asset, None),
    }
}

/// Broker symbol for an instrument code: `EUR_USD` → `EURUSD`,
/// `NAS100_USD` → `NAS100`.
pub fn broker_symbol(asset: &str) -> String {
    match split_asset(asset) {
        (base @ ("NAS100" | "SPX500" | "US30" | "WTICO" | "BCO" | "NATGAS"), Some(_)) => {
            base.to_string()
        }
        (base, Some(quote)) if !quote.contains('_') => format!("{base}{quote}"),
        _ => asset.replace('_', ""),
    }
}

/// Lots that put `risk_usd` at stake between entry and stop, rounded down
/// to the lot step and never below the minimum lot.
pub fn lot_size(asset: &str, entry: f64, stop_loss: f64, risk_usd: f64) -> f64 {
    let distance = (entry - stop_loss).abs();
    let per_lot = ContractSpec::for_asset(asset).usd_per_point(asset, entry) * distance;
    if per_lot <= 0.0 || risk_usd <= 0.0 {
        return MIN_LOT;
    }
    let steps = ((risk_usd / per_lot) / LOT_STEP + 1e-6).floor();
    (steps * LOT_STEP).max(MIN_LOT)
}

/// First 12 upper-case hex chars of SHA-256 over symbol, side and time.
pub fn signal_id(symbol: &str, side: SignalSide, at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{symbol}_{}_{}", side.as_str(), at.to_rfc3339()).as_bytes());
    hex::encode_upper(hasher.finalize())[..12].to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalSide {
    Buy,
    Sell,
}

impl SignalSide {
    pub fn from_direction(direction: Direction) -> Option<Self> {
        match direction {
            Direction::Long => Some(SignalSide::Buy),
            Direction::Short => Some(SignalSide::Sell),
            Direction::None => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignalSide::Buy => "BUY",
            SignalSide::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Approved,
    Rejected,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalRecord {
    pub signal_id: String,
    pub timestamp: DateTime<Utc>,
    pub asset: String,
    pub symbol: String,
    pub direction: Option<SignalSide>,
    pub order_type: OrderType,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: Vec<f64>,
    pub lot_size: f64,
    pub risk_usd: f64,
    pub risk_pct: f64,
    pub stop_pips: f64,
    pub pillars_passed: usize,
    pub valid: bool,
    pub status: SignalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl SignalRecord {
    fn base(result: &ScanResult, at: DateTime<Utc>) -> Self {
        let symbol = broker_symbol(&result.asset);
        let side = SignalSide::from_direction(result.direction);
        let signal_id = signal_id(&symbol, side.unwrap_or(SignalSide::Buy), at);
        Self {
            signal_id,
            timestamp: at,
            asset: result.asset.clone(),
            symbol,
            direction: side,
            order_type: OrderType::Market,
            entry_price: 0.0,
            stop_loss: 0.0,
            take_profit: Vec::new(),
            lot_size: 0.0,
            risk_usd: 0.0,
            risk_pct: 0.0,
            stop_pips: 0.0,
            pillars_passed: result.passed_count(),
            valid: false,
            status: SignalStatus::Invalid,
            rejection_reason: None,
        }
    }

    fn sized(result: &ScanResult, risk_usd: f64, profile: &AccountProfile, at: DateTime<Utc>) -> Self {
        let mut record = Self::base(result, at);
        let (Some(entry), Some(stop)) = (result.entry, result.stop_loss) else {
            return record;
        };
        let spec = ContractSpec::for_asset(&result.asset);
        record.entry_price = entry;
        record.stop_loss = stop;
        record.take_profit = result.take_profit.clone();
        record.lot_size = lot_size(&result.asset, entry, stop, risk_usd);
        record.risk_usd = to_cents(risk_usd);
        record.risk_pct = if profile.starting_balance > 0.0 {
            risk_usd / profile.starting_balance
        } else {
            0.0
        };
        record.stop_pips = (entry - stop).abs() / spec.pip_size;
        record
    }

    /// Record for a result without a usable direction, entry or stop.
    pub fn invalid(result: &ScanResult, at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            rejection_reason: Some(reason.into()),
            ..Self::base(result, at)
        }
    }

    /// Actionable record sized at the reserved risk.
    pub fn approved(
        result: &ScanResult,
        reservation: &Reservation,
        profile: &AccountProfile,
        at: DateTime<Utc>,
    ) -> Self {
        if result.direction.is_none() || result.entry.is_none() || result.stop_loss.is_none() {
            return Self::invalid(result, at, "missing entry or stop loss levels");
        }
        Self {
            valid: true,
            status: SignalStatus::Approved,
            ..Self::sized(result, reservation.risk_usd, profile, at)
        }
    }

    pub fn rejected(
        result: &ScanResult,
        reason: &RejectReason,
        profile: &AccountProfile,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            status: SignalStatus::Rejected,
            rejection_reason: Some(reason.to_string()),
            ..Self::sized(result, profile.risk_per_trade_usd(), profile, at)
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.valid && self.status == SignalStatus::Approved
    }
}

/// Top-level document handed to an execution bridge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalExport {
    pub generated_at: DateTime<Utc>,
    pub profile: String,
    pub account_size: f64,
    pub signals: Vec<SignalRecord>,
}

impl SignalExport {
    pub fn new(profile: &AccountProfile, generated_at: DateTime<Utc>, signals: Vec<SignalRecord>) -> Self {
        Self {
            generated_at,
            profile: profile.display_name.clone(),
            account_size: profile.starting_balance,
            signals,
        }
    }

    pub fn actionable(&self) -> impl Iterator<Item = &SignalRecord> {
        self.signals.iter().filter(|s| s.is_actionable())
    }
}
