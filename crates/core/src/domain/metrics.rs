use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Derived, immutable snapshot of portfolio shape. Recomputed on every
/// analyze/recommend/compare call, never mutated in place.
///
/// `sector_allocation` is equity-only: fractions sum to `1 - cash_weight`.
/// There is no synthetic "Cash" bucket; callers wanting the cash share read
/// it off the portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    pub total_holdings: usize,
    pub top_1_weight: f64,
    pub top_3_weight: f64,
    pub top_5_weight: f64,
    pub herfindahl_index: f64,
    #[serde(default)]
    pub constraint_violations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_summary: Option<String>,
    #[serde(default)]
    pub sector_allocation: BTreeMap<String, f64>,
    #[serde(default)]
    pub ticker_sectors: BTreeMap<String, String>,
}

/// Per-sector weight delta. A sector held on only one side appears with an
/// implicit 0.0 on the other.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SectorDelta {
    pub current: f64,
    pub recommended: f64,
    pub change: f64,
}

/// Scalar and per-sector differences, `recommended - current` convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonDifferences {
    pub holdings_change: i64,
    pub risk_change: f64,
    pub top_1_weight_change: f64,
    pub top_3_weight_change: f64,
    pub top_5_weight_change: f64,
    pub cash_weight_change: f64,
    pub sector_changes: BTreeMap<String, SectorDelta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioComparison {
    pub current: PortfolioMetrics,
    pub recommended: PortfolioMetrics,
    pub differences: ComparisonDifferences,
}
