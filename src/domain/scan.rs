//! Graded setup produced by the confluence evaluator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Floor on the risk/reward an ACTIVE setup may carry, whatever the profile says.
pub const MIN_ACTIVE_RISK_REWARD: f64 = 1.5;

/// Pillars that must pass for WATCHING, HTF-Bias included.
pub const WATCHING_MIN_PILLARS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
    None,
}

impl Direction {
    /// +1 for long, -1 for short, 0 otherwise.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
            Direction::None => 0.0,
        }
    }

    pub fn is_none(self) -> bool {
        self == Direction::None
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Long => "long",
            Direction::Short => "short",
            Direction::None => "none",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SetupStatus {
    Active,
    Watching,
    Scan,
}

impl SetupStatus {
    /// The only place a status is derived from pillar outcomes.
    pub fn grade(pillars: &[PillarScore], risk_reward: Option<f64>, min_rr: f64) -> Self {
        let passed = pillars.iter().filter(|p| p.passed).count();
        let htf_passed = pillars
            .iter()
            .any(|p| p.pillar == Pillar::HtfBias && p.passed);
        let rr_floor = min_rr.max(MIN_ACTIVE_RISK_REWARD);
        let rr_ok = risk_reward.is_some_and(|rr| rr >= rr_floor);

        if passed == Pillar::ALL.len() && pillars.len() == Pillar::ALL.len() && rr_ok {
            SetupStatus::Active
        } else if htf_passed && passed >= WATCHING_MIN_PILLARS {
            SetupStatus::Watching
        } else {
            SetupStatus::Scan
        }
    }
}

impl fmt::Display for SetupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SetupStatus::Active => "ACTIVE",
            SetupStatus::Watching => "WATCHING",
            SetupStatus::Scan => "SCAN",
        })
    }
}

/// The seven confluence checks, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Pillar {
    #[serde(rename = "HTF-Bias")]
    HtfBias,
    Location,
    Fibonacci,
    Liquidity,
    Structure,
    Confirmation,
    RiskReward,
}

impl Pillar {
    pub const ALL: [Pillar; 7] = [
        Pillar::HtfBias,
        Pillar::Location,
        Pillar::Fibonacci,
        Pillar::Liquidity,
        Pillar::Structure,
        Pillar::Confirmation,
        Pillar::RiskReward,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Pillar::HtfBias => "HTF-Bias",
            Pillar::Location => "Location",
            Pillar::Fibonacci => "Fibonacci",
            Pillar::Liquidity => "Liquidity",
            Pillar::Structure => "Structure",
            Pillar::Confirmation => "Confirmation",
            Pillar::RiskReward => "RiskReward",
        }
    }
}

impl fmt::Display for Pillar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PillarScore {
    pub pillar: Pillar,
    pub passed: bool,
    pub detail: String,
}

impl PillarScore {
    pub fn pass(pillar: Pillar, detail: impl Into<String>) -> Self {
        Self {
            pillar,
            passed: true,
            detail: detail.into(),
        }
    }

    pub fn fail(pillar: Pillar, detail: impl Into<String>) -> Self {
        Self {
            pillar,
            passed: false,
            detail: detail.into(),
        }
    }

    pub fn check(pillar: Pillar, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            pillar,
            passed,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanResult {
    pub asset: String,
    pub direction: Direction,
    pub status: SetupStatus,
    pub entry: Option<f64>,
    pub stop_loss: Option<f64>,
    /// Nearest first.
    pub take_profit: Vec<f64>,
    pub risk_reward: Option<f64>,
    pub pillars: Vec<PillarScore>,
    pub evaluated_at: DateTime<Utc>,
}

impl ScanResult {
    /// SCAN result with every pillar marked not evaluable.
    pub fn not_evaluable(asset: &str, evaluated_at: DateTime<Utc>, reason: &str) -> Self {
        Self {
            asset: asset.to_string(),
            direction: Direction::None,
            status: SetupStatus::Scan,
            entry: None,
            stop_loss: None,
            take_profit: Vec::new(),
            risk_reward: None,
            pillars: Pillar::ALL
                .iter()
                .map(|&p| PillarScore::fail(p, format!("not evaluable: {reason}")))
                .collect(),
            evaluated_at,
        }
    }

    pub fn passed_count(&self) -> usize {
        self.pillars.iter().filter(|p| p.passed).count()
    }

    pub fn pillar(&self, pillar: Pillar) -> Option<&PillarScore> {
        self.pillars.iter().find(|p| p.pillar == pillar)
    }

    pub fn is_active(&self) -> bool {
        self.status == SetupStatus::Active
    }

    /// Risk/reward of this setup if entered at `price`.
    ///
    /// `None` when price is not strictly between stop and the first target.
    pub fn risk_reward_at(&self, price: f64) -> Option<f64> {
        let stop = self.stop_loss?;
        let tp1 = *self.take_profit.first()?;
        let sign = self.direction.sign();
        let risk = sign * (price - stop);
        let reward = sign * (tp1 - price);
        if sign == 0.0 || risk <= 0.0 || reward <= 0.0 {
            return None;
        }
        Some(reward / risk)
    }

    /// Re-anchor entry and risk/reward at a live price, then re-grade.
    pub fn reprice(&self, live_price: f64, min_rr: f64) -> ScanResult {
        let mut out = self.clone();
        out.entry = Some(live_price);
        out.risk_reward = self.risk_reward_at(live_price);

        let rr_floor = min_rr.max(MIN_ACTIVE_RISK_REWARD);
        let score = match out.risk_reward {
            Some(rr) => PillarScore::check(
                Pillar::RiskReward,
                rr >= rr_floor,
                format!("R:R {rr:.2} at live {live_price} (min {rr_floor:.2})"),
            ),
            None => PillarScore::fail(
                Pillar::RiskReward,
                format!("live {live_price} outside stop/target range"),
            ),
        };
        if let Some(slot) = out.pillars.iter_mut().find(|p| p.pillar == Pillar::RiskReward) {
            *slot = score;
        }
        out.status = SetupStatus::grade(&out.pillars, out.risk_reward, min_rr);
        out
    }

    /// Same result, forced down to SCAN.
    pub fn downgraded(&self) -> ScanResult {
        let mut out = self.clone();
        out.status = SetupStatus::Scan;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pillars(passing: &[Pillar]) -> Vec<PillarScore> {
        Pillar::ALL
            .iter()
            .map(|&p| PillarScore::check(p, passing.contains(&p), ""))
            .collect()
    }

    fn sample_long() -> ScanResult {
        ScanResult {
            asset: "EUR_USD".into(),
            direction: Direction::Long,
            status: SetupStatus::Active,
            entry: Some(1.1000),
            stop_loss: Some(1.0900),
            take_profit: vec![1.1300, 1.1500],
            risk_reward: Some(3.0),
            pillars: pillars(&Pillar::ALL),
            evaluated_at: Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn all_pillars_and_rr_is_active() {
        assert_eq!(
            SetupStatus::grade(&pillars(&Pillar::ALL), Some(2.0), 1.5),
            SetupStatus::Active
        );
    }

    #[test]
    fn low_rr_is_not_active() {
        assert_eq!(
            SetupStatus::grade(&pillars(&Pillar::ALL), Some(1.4), 1.5),
            SetupStatus::Watching
        );
        assert_eq!(
            SetupStatus::grade(&pillars(&Pillar::ALL), None, 1.5),
            SetupStatus::Watching
        );
    }

    #[test]
    fn rr_floor_ignores_lower_profile_minimum() {
        assert_eq!(
            SetupStatus::grade(&pillars(&Pillar::ALL), Some(1.2), 1.0),
            SetupStatus::Watching
        );
    }

    #[test]
    fn watching_needs_htf_bias() {
        let four = [
            Pillar::HtfBias,
            Pillar::Location,
            Pillar::Fibonacci,
            Pillar::Structure,
        ];
        assert_eq!(
            SetupStatus::grade(&pillars(&four), None, 1.5),
            SetupStatus::Watching
        );

        let five_without_htf = [
            Pillar::Location,
            Pillar::Fibonacci,
            Pillar::Liquidity,
            Pillar::Structure,
            Pillar::Confirmation,
        ];
        assert_eq!(
            SetupStatus::grade(&pillars(&five_without_htf), None, 1.5),
            SetupStatus::Scan
        );
    }

    #[test]
    fn three_pillars_is_scan() {
        let three = [Pillar::HtfBias, Pillar::Location, Pillar::Fibonacci];
        assert_eq!(
            SetupStatus::grade(&pillars(&three), None, 1.5),
            SetupStatus::Scan
        );
    }

    #[test]
    fn not_evaluable_fails_every_pillar() {
        let r = ScanResult::not_evaluable("XAU_USD", Utc::now(), "insufficient weekly history");
        assert_eq!(r.status, SetupStatus::Scan);
        assert_eq!(r.pillars.len(), 7);
        assert_eq!(r.passed_count(), 0);
        assert!(r.pillars[0].detail.contains("insufficient weekly"));
    }

    #[test]
    fn reprice_recomputes_rr() {
        let r = sample_long();
        let repriced = r.reprice(1.1100, 1.5);
        // reward 0.02 / risk 0.02
        assert!((repriced.risk_reward.unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(repriced.status, SetupStatus::Watching);
        assert!(!repriced.pillar(Pillar::RiskReward).unwrap().passed);

        let still = r.reprice(1.0950, 1.5);
        assert_eq!(still.status, SetupStatus::Active);
        assert_eq!(still.entry, Some(1.0950));
    }

    #[test]
    fn reprice_beyond_stop_fails_rr() {
        let r = sample_long().reprice(1.0850, 1.5);
        assert_eq!(r.risk_reward, None);
        assert_eq!(r.status, SetupStatus::Watching);
    }

    #[test]
    fn serializes_with_readable_names() {
        let json = serde_json::to_string(&sample_long()).unwrap();
        assert!(json.contains("\"status\":\"ACTIVE\""));
        assert!(json.contains("\"direction\":\"long\""));
        assert!(json.contains("\"HTF-Bias\""));
    }
}
