use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade direction for a rebalance action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

/// A single buy/sell delta expressed as a decimal fraction of the total
/// portfolio. BUY deltas are positive, SELL deltas negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceAction {
    #[serde(rename = "action")]
    pub side: TradeSide,
    pub ticker: String,
    pub delta_weight: f64,
}

/// Ordered actions plus free-text context. Warnings carry risk-relevant
/// caveats, notes carry informational rationale; both are deterministic
/// functions of the inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RebalancePlan {
    pub actions: Vec<RebalanceAction>,
    pub notes: Vec<String>,
    pub warnings: Vec<String>,
}

/// Target allocation sleeves derived from a profile. All four are decimal
/// fractions summing to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetAllocation {
    pub cash: f64,
    pub core_equity: f64,
    pub thematic_sectors: f64,
    pub defensive: f64,
}

impl TargetAllocation {
    pub fn equity(&self) -> f64 {
        self.core_equity + self.thematic_sectors + self.defensive
    }
}
