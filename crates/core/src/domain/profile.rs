use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Objective {
    Growth,
    Income,
    Balanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceFrequency {
    Monthly,
    Quarterly,
    Annual,
}

/// Hard portfolio constraints. `max_position_pct` is a percentage (25.0 = 25%),
/// unlike holding weights which are decimal fractions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default = "default_max_holdings")]
    pub max_holdings: u32,
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: f64,
    #[serde(default)]
    pub exclusions: Vec<String>,
    #[serde(default)]
    pub options_allowed: bool,
    #[serde(default)]
    pub leverage_allowed: bool,
}

fn default_max_holdings() -> u32 {
    20
}

fn default_max_position_pct() -> f64 {
    25.0
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            max_holdings: default_max_holdings(),
            max_position_pct: default_max_position_pct(),
            exclusions: Vec::new(),
            options_allowed: false,
            leverage_allowed: false,
        }
    }
}

/// Soft preferences. Unlike `Constraints`, these steer allocation but are
/// never enforced as violations, except `sectors_avoid` which is a hard
/// filter during planning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub sectors_like: Vec<String>,
    #[serde(default)]
    pub sectors_avoid: Vec<String>,
    #[serde(default)]
    pub regions_like: Vec<String>,
}

/// Investor profile as extracted from onboarding text by the LLM and stored
/// externally. The engine only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestorProfile {
    pub user_id: String,
    pub objective: Objective,
    pub horizon_months: u32,
    pub risk_score: u8,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default = "default_rebalance_frequency")]
    pub rebalance_frequency: RebalanceFrequency,
    pub last_updated: DateTime<Utc>,
}

fn default_rebalance_frequency() -> RebalanceFrequency {
    RebalanceFrequency::Quarterly
}

impl InvestorProfile {
    /// Excluded tickers, uppercased for comparison.
    pub fn exclusion_set(&self) -> std::collections::BTreeSet<String> {
        self.constraints
            .exclusions
            .iter()
            .map(|t| t.trim().to_uppercase())
            .filter(|t| !t.is_empty())
            .collect()
    }
}
