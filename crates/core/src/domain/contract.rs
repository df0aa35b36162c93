use crate::domain::portfolio::is_valid_ticker;
use crate::domain::profile::{
    Constraints, InvestorProfile, Objective, Preferences, RebalanceFrequency,
};
use anyhow::{bail, ensure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lenient wire shape for an LLM-extracted profile. Everything the model
/// may omit is optional here; `validate_and_into_profile` is the single
/// place raw model output becomes a trusted `InvestorProfile`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmInvestorProfile {
    pub objective: String,
    pub horizon_months: i64,
    #[serde(default = "default_risk_score")]
    pub risk_score: i64,
    #[serde(default)]
    pub constraints: LlmConstraints,
    #[serde(default)]
    pub preferences: LlmPreferences,
    #[serde(default)]
    pub rebalance_frequency: Option<String>,
}

fn default_risk_score() -> i64 {
    50
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConstraints {
    #[serde(default)]
    pub max_holdings: Option<i64>,
    #[serde(default)]
    pub max_position_pct: Option<f64>,
    #[serde(default)]
    pub exclusions: Vec<String>,
    #[serde(default)]
    pub options_allowed: Option<bool>,
    #[serde(default)]
    pub leverage_allowed: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmPreferences {
    #[serde(default)]
    pub sectors_like: Vec<String>,
    #[serde(default)]
    pub sectors_avoid: Vec<String>,
    #[serde(default)]
    pub regions_like: Vec<String>,
}

impl LlmInvestorProfile {
    pub fn validate_and_into_profile(
        self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<InvestorProfile> {
        let user_id = user_id.trim().to_string();
        ensure!(!user_id.is_empty(), "user_id must be non-empty");

        let objective = match self.objective.trim().to_lowercase().as_str() {
            "growth" => Objective::Growth,
            "income" => Objective::Income,
            "balanced" => Objective::Balanced,
            other => bail!("unknown objective: {other:?}"),
        };

        ensure!(
            (1..=600).contains(&self.horizon_months),
            "horizon_months out of range: {}",
            self.horizon_months
        );
        ensure!(
            (0..=100).contains(&self.risk_score),
            "risk_score out of range: {}",
            self.risk_score
        );

        let defaults = Constraints::default();
        let max_holdings = match self.constraints.max_holdings {
            Some(n) => {
                ensure!((1..=100).contains(&n), "max_holdings out of range: {n}");
                n as u32
            }
            None => defaults.max_holdings,
        };
        let max_position_pct = match self.constraints.max_position_pct {
            Some(p) => {
                ensure!(
                    p.is_finite() && (1.0..=100.0).contains(&p),
                    "max_position_pct out of range: {p}"
                );
                p
            }
            None => defaults.max_position_pct,
        };

        let rebalance_frequency = match self.rebalance_frequency.as_deref() {
            None | Some("") => RebalanceFrequency::Quarterly,
            Some(s) => match s.trim().to_lowercase().as_str() {
                "monthly" => RebalanceFrequency::Monthly,
                "quarterly" => RebalanceFrequency::Quarterly,
                "annual" | "annually" | "yearly" => RebalanceFrequency::Annual,
                other => bail!("unknown rebalance_frequency: {other:?}"),
            },
        };

        Ok(InvestorProfile {
            user_id,
            objective,
            horizon_months: self.horizon_months as u32,
            risk_score: self.risk_score as u8,
            constraints: Constraints {
                max_holdings,
                max_position_pct,
                exclusions: dedup_upper(self.constraints.exclusions),
                options_allowed: self.constraints.options_allowed.unwrap_or(false),
                leverage_allowed: self.constraints.leverage_allowed.unwrap_or(false),
            },
            preferences: Preferences {
                sectors_like: dedup_trimmed(self.preferences.sectors_like),
                sectors_avoid: dedup_trimmed(self.preferences.sectors_avoid),
                regions_like: dedup_trimmed(self.preferences.regions_like),
            },
            rebalance_frequency,
            last_updated: now,
        })
    }
}

/// Wire shape for an LLM ticker classification. Covers tickers the sector
/// catalog does not know; `validate_and_canonicalize` is the single place
/// raw model output becomes trusted data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerClassification {
    pub ticker: String,
    pub name: String,
    pub sector: String,
    pub market_cap: String,
    pub industry_risk: String,
}

impl TickerClassification {
    pub fn validate_and_canonicalize(mut self, sector_names: &[&str]) -> anyhow::Result<Self> {
        self.ticker = self.ticker.trim().to_uppercase();
        ensure!(
            is_valid_ticker(&self.ticker),
            "invalid ticker: {:?}",
            self.ticker
        );

        self.name = self.name.trim().to_string();
        ensure!(!self.name.is_empty(), "company name must be non-empty");

        let sector = self.sector.trim();
        match sector_names.iter().find(|n| n.eq_ignore_ascii_case(sector)) {
            Some(canonical) => self.sector = canonical.to_string(),
            None => bail!("unknown sector: {sector:?}"),
        }

        self.market_cap = self.market_cap.trim().to_lowercase();
        ensure!(
            matches!(self.market_cap.as_str(), "large" | "mid" | "small"),
            "unknown market_cap: {:?}",
            self.market_cap
        );
        self.industry_risk = self.industry_risk.trim().to_lowercase();
        ensure!(
            matches!(self.industry_risk.as_str(), "low" | "medium" | "high"),
            "unknown industry_risk: {:?}",
            self.industry_risk
        );

        Ok(self)
    }
}

/// Tickers: trim, uppercase, drop blanks, dedup preserving first occurrence.
fn dedup_upper(items: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

/// Sector/region labels: trim, drop blanks, dedup case-insensitively.
fn dedup_trimmed(items: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.to_lowercase()))
        .collect()
}
