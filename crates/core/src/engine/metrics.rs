//! Concentration, sector and constraint metrics.

use crate::domain::metrics::PortfolioMetrics;
use crate::domain::plan::TargetAllocation;
use crate::domain::portfolio::Portfolio;
use crate::domain::profile::InvestorProfile;
use crate::engine::error::EngineError;
use crate::engine::normalize::INPUT_EPSILON;
use crate::sectors::{SectorResolver, OTHER_SECTOR};
use std::collections::BTreeMap;

/// Compute metrics for a normalized portfolio.
///
/// Never fails for malformed-but-normalizable input; the only error is a
/// portfolio whose weights do not sum to ~1.0, which means the caller
/// skipped [`crate::engine::normalize`].
pub fn analyze(
    portfolio: &Portfolio,
    profile: Option<&InvestorProfile>,
    resolver: &dyn SectorResolver,
) -> Result<PortfolioMetrics, EngineError> {
    analyze_with_baseline(portfolio, profile, resolver, None)
}

/// Like [`analyze`], with an optional prior target allocation; when present,
/// a drift summary against it is attached.
pub fn analyze_with_baseline(
    portfolio: &Portfolio,
    profile: Option<&InvestorProfile>,
    resolver: &dyn SectorResolver,
    baseline: Option<&TargetAllocation>,
) -> Result<PortfolioMetrics, EngineError> {
    let total = portfolio.total_weight();
    if (total - 1.0).abs() > INPUT_EPSILON {
        return Err(EngineError::NotNormalized { total });
    }

    let mut sorted: Vec<f64> = portfolio.holdings.iter().map(|h| h.weight).collect();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    let top_k = |k: usize| sorted.iter().take(k).sum::<f64>();
    let top_1_weight = top_k(1);
    let top_3_weight = top_k(3);
    let top_5_weight = top_k(5);

    // Cash is excluded from the Herfindahl index: it measures equity
    // concentration, and 1/N for N equal-weight holdings is the baseline.
    let herfindahl_index = portfolio.holdings.iter().map(|h| h.weight * h.weight).sum();

    let mut sector_allocation: BTreeMap<String, f64> = BTreeMap::new();
    let mut ticker_sectors: BTreeMap<String, String> = BTreeMap::new();
    for h in &portfolio.holdings {
        let sector = resolver.resolve(&h.ticker).unwrap_or(OTHER_SECTOR);
        *sector_allocation.entry(sector.to_string()).or_insert(0.0) += h.weight;
        ticker_sectors.insert(h.ticker.clone(), sector.to_string());
    }

    let constraint_violations = match profile {
        Some(p) => check_constraints(portfolio, p),
        None => Vec::new(),
    };

    let drift_summary = baseline.map(|target| drift_summary(portfolio, target));

    Ok(PortfolioMetrics {
        total_holdings: portfolio.holdings.len(),
        top_1_weight,
        top_3_weight,
        top_5_weight,
        herfindahl_index,
        constraint_violations,
        drift_summary,
        sector_allocation,
        ticker_sectors,
    })
}

/// Evaluate each constraint independently so violations can co-occur.
/// Order is stable: holdings count, position caps, exclusions.
fn check_constraints(portfolio: &Portfolio, profile: &InvestorProfile) -> Vec<String> {
    let mut violations = Vec::new();
    let constraints = &profile.constraints;

    if portfolio.holdings.len() > constraints.max_holdings as usize {
        violations.push(format!(
            "Too many holdings: {} > {}",
            portfolio.holdings.len(),
            constraints.max_holdings
        ));
    }

    for h in &portfolio.holdings {
        let pct = h.weight * 100.0;
        if pct > constraints.max_position_pct {
            violations.push(format!(
                "{}: {:.1}% > {}% max position",
                h.ticker, pct, constraints.max_position_pct
            ));
        }
    }

    let exclusions = profile.exclusion_set();
    for h in &portfolio.holdings {
        if exclusions.contains(&h.ticker.to_uppercase()) {
            violations.push(format!("{} is on the exclusion list", h.ticker));
        }
    }

    violations
}

/// Deviation of the current mix from a previously derived target, in
/// percentage points. Deterministic free text.
fn drift_summary(portfolio: &Portfolio, target: &TargetAllocation) -> String {
    let cash_drift = (portfolio.cash_weight - target.cash) * 100.0;
    let equity_drift = (portfolio.equity_weight() - target.equity()) * 100.0;
    format!(
        "cash {:.1}% vs target {:.1}% ({:+.1}pp); equity {:.1}% vs target {:.1}% ({:+.1}pp)",
        portfolio.cash_weight * 100.0,
        target.cash * 100.0,
        cash_drift,
        portfolio.equity_weight() * 100.0,
        target.equity() * 100.0,
        equity_drift,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::portfolio::Holding;
    use crate::domain::profile::{Constraints, Objective, Preferences, RebalanceFrequency};
    use crate::sectors::SectorCatalog;
    use chrono::Utc;

    fn profile_with(constraints: Constraints) -> InvestorProfile {
        InvestorProfile {
            user_id: "u1".to_string(),
            objective: Objective::Balanced,
            horizon_months: 60,
            risk_score: 50,
            constraints,
            preferences: Preferences::default(),
            rebalance_frequency: RebalanceFrequency::Quarterly,
            last_updated: Utc::now(),
        }
    }

    fn portfolio(pairs: &[(&str, f64)], cash: f64) -> Portfolio {
        Portfolio {
            holdings: pairs.iter().map(|(t, w)| Holding::new(*t, *w)).collect(),
            cash_weight: cash,
        }
    }

    #[test]
    fn top_k_weights_are_monotonic() {
        let catalog = SectorCatalog::embedded().unwrap();
        let p = portfolio(
            &[
                ("AAPL", 0.30),
                ("MSFT", 0.25),
                ("KO", 0.20),
                ("JPM", 0.15),
                ("XOM", 0.06),
                ("NEE", 0.04),
            ],
            0.0,
        );
        let m = analyze(&p, None, &catalog).unwrap();
        assert!(m.top_1_weight <= m.top_3_weight);
        assert!(m.top_3_weight <= m.top_5_weight);
        assert!((m.top_1_weight - 0.30).abs() < 1e-12);
        assert!((m.top_3_weight - 0.75).abs() < 1e-12);
        assert!((m.top_5_weight - 0.96).abs() < 1e-12);
    }

    #[test]
    fn top_k_does_not_pad_with_phantoms() {
        let catalog = SectorCatalog::embedded().unwrap();
        let p = portfolio(&[("AAPL", 0.6), ("MSFT", 0.4)], 0.0);
        let m = analyze(&p, None, &catalog).unwrap();
        assert!((m.top_3_weight - 1.0).abs() < 1e-12);
        assert!((m.top_5_weight - 1.0).abs() < 1e-12);
    }

    #[test]
    fn herfindahl_of_equal_weights_is_one_over_n() {
        let catalog = SectorCatalog::embedded().unwrap();
        let p = portfolio(
            &[("AAPL", 0.25), ("MSFT", 0.25), ("KO", 0.25), ("JPM", 0.25)],
            0.0,
        );
        let m = analyze(&p, None, &catalog).unwrap();
        assert!((m.herfindahl_index - 0.25).abs() < 1e-6);
    }

    #[test]
    fn herfindahl_excludes_cash() {
        let catalog = SectorCatalog::embedded().unwrap();
        let p = portfolio(&[("AAPL", 0.5)], 0.5);
        let m = analyze(&p, None, &catalog).unwrap();
        assert!((m.herfindahl_index - 0.25).abs() < 1e-12);
    }

    #[test]
    fn position_cap_violation_names_the_ticker() {
        let catalog = SectorCatalog::embedded().unwrap();
        let p = portfolio(&[("AAPL", 0.6), ("MSFT", 0.4)], 0.0);
        let profile = profile_with(Constraints {
            max_position_pct: 50.0,
            ..Constraints::default()
        });
        let m = analyze(&p, Some(&profile), &catalog).unwrap();
        assert_eq!(m.constraint_violations.len(), 1);
        assert!(m.constraint_violations[0].contains("AAPL"));
        assert!(m.constraint_violations[0].contains("50"));
    }

    #[test]
    fn violations_can_co_occur() {
        let catalog = SectorCatalog::embedded().unwrap();
        let p = portfolio(&[("AAPL", 0.7), ("TSLA", 0.3)], 0.0);
        let profile = profile_with(Constraints {
            max_holdings: 1,
            max_position_pct: 50.0,
            exclusions: vec!["tsla".to_string()],
            ..Constraints::default()
        });
        let m = analyze(&p, Some(&profile), &catalog).unwrap();
        assert_eq!(m.constraint_violations.len(), 3);
        assert!(m.constraint_violations[0].contains("Too many holdings"));
        assert!(m.constraint_violations[1].contains("AAPL"));
        assert!(m.constraint_violations[2].contains("TSLA"));
    }

    #[test]
    fn unknown_tickers_fall_into_other_bucket() {
        let catalog = SectorCatalog::embedded().unwrap();
        let p = portfolio(&[("AAPL", 0.5), ("ZZZZZ", 0.5)], 0.0);
        let m = analyze(&p, None, &catalog).unwrap();
        assert!((m.sector_allocation["Other"] - 0.5).abs() < 1e-12);
        assert_eq!(m.ticker_sectors["ZZZZZ"], "Other");
    }

    #[test]
    fn sector_allocation_is_equity_only() {
        let catalog = SectorCatalog::embedded().unwrap();
        let p = portfolio(&[("AAPL", 0.4), ("JNJ", 0.3)], 0.3);
        let m = analyze(&p, None, &catalog).unwrap();
        let sum: f64 = m.sector_allocation.values().sum();
        assert!((sum - 0.7).abs() < 1e-12);
        assert!(!m.sector_allocation.contains_key("Cash"));
    }

    #[test]
    fn rejects_unnormalized_portfolio() {
        let catalog = SectorCatalog::embedded().unwrap();
        let p = portfolio(&[("AAPL", 0.6), ("MSFT", 0.6)], 0.0);
        assert!(matches!(
            analyze(&p, None, &catalog),
            Err(EngineError::NotNormalized { .. })
        ));
    }

    #[test]
    fn drift_summary_present_only_with_baseline() {
        let catalog = SectorCatalog::embedded().unwrap();
        let p = portfolio(&[("AAPL", 0.9)], 0.1);
        let m = analyze(&p, None, &catalog).unwrap();
        assert!(m.drift_summary.is_none());

        let target = TargetAllocation {
            cash: 0.05,
            core_equity: 0.85,
            thematic_sectors: 0.10,
            defensive: 0.0,
        };
        let m = analyze_with_baseline(&p, None, &catalog, Some(&target)).unwrap();
        let drift = m.drift_summary.unwrap();
        assert!(drift.contains("+5.0pp"));
    }
}
