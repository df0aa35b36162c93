//! Side-by-side comparison of two portfolios.

use crate::domain::metrics::{ComparisonDifferences, PortfolioComparison, SectorDelta};
use crate::domain::portfolio::Portfolio;
use crate::domain::profile::InvestorProfile;
use crate::engine::error::EngineError;
use crate::engine::metrics::analyze;
use crate::sectors::SectorResolver;
use std::collections::{BTreeMap, BTreeSet};

/// Compare a current portfolio against a recommended one. All scalar
/// differences follow the `recommended - current` convention; the sector
/// map covers the union of sectors on either side, zero-filled, so a
/// sector that disappears still shows up with its full negative change.
pub fn compare(
    current: &Portfolio,
    recommended: &Portfolio,
    profile: Option<&InvestorProfile>,
    resolver: &dyn SectorResolver,
) -> Result<PortfolioComparison, EngineError> {
    let current_metrics = analyze(current, profile, resolver)?;
    let recommended_metrics = analyze(recommended, profile, resolver)?;

    let mut sectors: BTreeSet<&String> = current_metrics.sector_allocation.keys().collect();
    sectors.extend(recommended_metrics.sector_allocation.keys());

    let mut sector_changes: BTreeMap<String, SectorDelta> = BTreeMap::new();
    for sector in sectors {
        let before = current_metrics
            .sector_allocation
            .get(sector)
            .copied()
            .unwrap_or(0.0);
        let after = recommended_metrics
            .sector_allocation
            .get(sector)
            .copied()
            .unwrap_or(0.0);
        sector_changes.insert(
            sector.clone(),
            SectorDelta {
                current: before,
                recommended: after,
                change: after - before,
            },
        );
    }

    let differences = ComparisonDifferences {
        holdings_change: recommended_metrics.total_holdings as i64
            - current_metrics.total_holdings as i64,
        risk_change: recommended_metrics.herfindahl_index - current_metrics.herfindahl_index,
        top_1_weight_change: recommended_metrics.top_1_weight - current_metrics.top_1_weight,
        top_3_weight_change: recommended_metrics.top_3_weight - current_metrics.top_3_weight,
        top_5_weight_change: recommended_metrics.top_5_weight - current_metrics.top_5_weight,
        cash_weight_change: recommended.cash_weight - current.cash_weight,
        sector_changes,
    };

    Ok(PortfolioComparison {
        current: current_metrics,
        recommended: recommended_metrics,
        differences,
    })
}
