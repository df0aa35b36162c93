//! Rebalance planning: turn a profile and a current portfolio into an
//! ordered list of BUY/SELL weight deltas.
//!
//! The planner never fails on an unsatisfiable constraint set; it emits the
//! best plan it can plus a warning, because advisory output beats an error
//! for a decision-support tool. The only hard errors are malformed inputs.

use crate::domain::plan::{RebalanceAction, RebalancePlan, TradeSide};
use crate::domain::portfolio::{Holding, Portfolio};
use crate::domain::profile::InvestorProfile;
use crate::engine::error::EngineError;
use crate::engine::normalize::{normalize, INPUT_EPSILON};
use crate::engine::target::{derive_target, risk_band, target_position_count};
use crate::sectors::{SectorCatalog, StockEntry};
use std::collections::{BTreeMap, BTreeSet};

/// Deltas smaller than this are no-op churn and are not emitted.
pub const DELTA_EPSILON: f64 = 1e-3;

const CAP_ROUNDS: usize = 16;

/// Planning mode: `Construct` builds a portfolio from scratch and ignores
/// current holdings for name selection; `Rebalance` keeps eligible current
/// names and adjusts their weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    Construct,
    Rebalance,
}

/// A plan plus the fully-formed target portfolio it moves toward. Callers
/// that only need the actions use [`plan`]; the API layer uses the target
/// to compute post-plan metrics.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub plan: RebalancePlan,
    pub target: Portfolio,
}

pub fn plan(
    current: &Portfolio,
    profile: &InvestorProfile,
    mode: PlanMode,
    catalog: &SectorCatalog,
) -> Result<RebalancePlan, EngineError> {
    plan_detailed(current, profile, mode, catalog).map(|outcome| outcome.plan)
}

pub fn plan_detailed(
    current: &Portfolio,
    profile: &InvestorProfile,
    mode: PlanMode,
    catalog: &SectorCatalog,
) -> Result<PlanOutcome, EngineError> {
    if mode == PlanMode::Rebalance {
        let total = current.total_weight();
        if (total - 1.0).abs() > INPUT_EPSILON {
            return Err(EngineError::NotNormalized { total });
        }
    }

    let mut notes = Vec::new();
    let mut warnings = Vec::new();

    let allocation = derive_target(profile);
    let band = risk_band(profile.risk_score);
    let exclusions = profile.exclusion_set();

    // Hard filters first: excluded tickers and avoided sectors never carry
    // target weight, so current positions in them become full sells.
    let mut names: Vec<String> = Vec::new();
    if mode == PlanMode::Rebalance {
        for h in &current.holdings {
            let ticker = h.ticker.to_uppercase();
            if exclusions.contains(&ticker) {
                notes.push(format!("Selling {ticker}: on the exclusion list"));
                continue;
            }
            if let Some(sector) = catalog_sector(catalog, &ticker) {
                if is_avoided(sector, profile) {
                    notes.push(format!("Selling {ticker}: sector {sector} is avoided"));
                    continue;
                }
            }
            if !names.contains(&ticker) {
                names.push(ticker);
            }
        }
    }

    let desired = target_position_count(profile);
    if mode == PlanMode::Construct || names.len() < band.min_sectors {
        let added = add_candidates(&mut names, desired, profile, catalog, &exclusions);
        if mode == PlanMode::Construct {
            notes.push(format!(
                "Constructed {} positions from scratch to match the target allocation",
                names.len()
            ));
        } else if added > 0 {
            notes.push(format!(
                "Added {added} positions to reach at least {} sectors",
                band.min_sectors
            ));
        }
    }

    if names.is_empty() {
        warnings.push(
            "No eligible positions after applying exclusions and avoided sectors".to_string(),
        );
        let target = Portfolio::all_cash();
        let actions = diff_weights(current, &BTreeMap::new());
        return Ok(PlanOutcome {
            plan: RebalancePlan {
                actions,
                notes,
                warnings,
            },
            target,
        });
    }

    // Weight assignment: core + defensive split evenly across every name,
    // the thematic sleeve split across names in preferred sectors. With no
    // preferred name to carry it, the thematic sleeve folds into the base.
    let preferred: BTreeSet<&str> = names
        .iter()
        .filter(|t| {
            catalog_sector(catalog, t)
                .map(|s| is_preferred(s, profile))
                .unwrap_or(false)
        })
        .map(|t| t.as_str())
        .collect();

    let base_sleeve = if preferred.is_empty() {
        allocation.equity()
    } else {
        allocation.core_equity + allocation.defensive
    };
    let base_each = base_sleeve / names.len() as f64;
    let thematic_each = if preferred.is_empty() {
        0.0
    } else {
        allocation.thematic_sectors / preferred.len() as f64
    };

    let mut weights: Vec<(String, f64)> = names
        .iter()
        .map(|t| {
            let extra = if preferred.contains(t.as_str()) {
                thematic_each
            } else {
                0.0
            };
            (t.clone(), base_each + extra)
        })
        .collect();

    if !preferred.is_empty() {
        let mut liked: Vec<&str> = preferred.iter().copied().collect();
        liked.sort_unstable();
        notes.push(format!(
            "Overweighting preferred sectors via {}",
            liked.join(", ")
        ));
    }

    enforce_max_holdings(&mut weights, profile.constraints.max_holdings, &mut warnings);
    enforce_position_cap(
        &mut weights,
        profile.constraints.max_position_pct / 100.0,
        &mut warnings,
    );

    // Snap the target so weights + cash sum to exactly 1.0. The equity sum
    // is already at its target, so normalize only fixes float residue.
    let target_holdings: Vec<Holding> = weights
        .iter()
        .map(|(t, w)| Holding::new(t, *w))
        .collect();
    let equity_sum: f64 = weights.iter().map(|(_, w)| w).sum();
    let target = normalize(&target_holdings, (1.0 - equity_sum).clamp(0.0, 1.0))?.portfolio;

    let cash_delta = target.cash_weight - current.cash_weight;
    if mode == PlanMode::Rebalance && cash_delta.abs() > DELTA_EPSILON {
        notes.push(format!(
            "Adjust cash to {:.1}% (from {:.1}%)",
            target.cash_weight * 100.0,
            current.cash_weight * 100.0
        ));
    }

    warn_on_sector_concentration(&target, band.max_sector_weight, catalog, &mut warnings);

    let target_map: BTreeMap<String, f64> = target
        .holdings
        .iter()
        .map(|h| (h.ticker.clone(), h.weight))
        .collect();
    let actions = diff_weights(current, &target_map);

    Ok(PlanOutcome {
        plan: RebalancePlan {
            actions,
            notes,
            warnings,
        },
        target,
    })
}

/// Diff current holdings against a target weight map over the union of
/// tickers. Deltas within [`DELTA_EPSILON`] are dropped; SELL actions come
/// before BUY actions, each group ordered by ticker for stable output.
pub fn diff_weights(current: &Portfolio, target: &BTreeMap<String, f64>) -> Vec<RebalanceAction> {
    let mut current_map: BTreeMap<String, f64> = BTreeMap::new();
    for h in &current.holdings {
        *current_map.entry(h.ticker.to_uppercase()).or_insert(0.0) += h.weight;
    }

    let mut tickers: BTreeSet<&String> = current_map.keys().collect();
    tickers.extend(target.keys());

    let mut sells = Vec::new();
    let mut buys = Vec::new();
    for ticker in tickers {
        let have = current_map.get(ticker).copied().unwrap_or(0.0);
        let want = target.get(ticker).copied().unwrap_or(0.0);
        let delta = want - have;
        if delta.abs() <= DELTA_EPSILON {
            continue;
        }
        let action = RebalanceAction {
            side: if delta > 0.0 {
                TradeSide::Buy
            } else {
                TradeSide::Sell
            },
            ticker: ticker.clone(),
            delta_weight: delta,
        };
        if delta > 0.0 {
            buys.push(action);
        } else {
            sells.push(action);
        }
    }

    sells.extend(buys);
    sells
}

fn catalog_sector<'a>(catalog: &'a SectorCatalog, ticker: &str) -> Option<&'a str> {
    use crate::sectors::SectorResolver;
    catalog.resolve(ticker)
}

fn is_avoided(sector: &str, profile: &InvestorProfile) -> bool {
    profile
        .preferences
        .sectors_avoid
        .iter()
        .any(|s| s.eq_ignore_ascii_case(sector))
}

fn is_preferred(sector: &str, profile: &InvestorProfile) -> bool {
    profile
        .preferences
        .sectors_like
        .iter()
        .any(|s| s.eq_ignore_ascii_case(sector))
}

/// Pick candidate tickers from the catalog, skipping avoided sectors,
/// exclusions and names already held. Preferred sectors seed the pool with
/// up to two names each (they carry the thematic sleeve), then the
/// remaining sectors fill round-robin, one name per sector per round.
/// Risk-averse profiles take each sector's safest names first; everyone
/// else follows catalog order. Deterministic either way.
fn add_candidates(
    names: &mut Vec<String>,
    desired: usize,
    profile: &InvestorProfile,
    catalog: &SectorCatalog,
    exclusions: &BTreeSet<String>,
) -> usize {
    let risk_averse = profile.risk_score < 50;
    let mut taken: BTreeSet<String> = names.iter().map(|t| t.to_uppercase()).collect();
    let start = names.len();

    if !profile.preferences.sectors_like.is_empty() {
        let mut by_sector: Vec<(&str, Vec<&StockEntry>)> = Vec::new();
        for (sector, stock) in catalog.stocks_for_sectors(&profile.preferences.sectors_like) {
            if is_avoided(&sector.name, profile) {
                continue;
            }
            match by_sector.last_mut() {
                Some((name, stocks)) if *name == sector.name.as_str() => {
                    stocks.push(stock);
                    continue;
                }
                _ => {}
            }
            by_sector.push((sector.name.as_str(), vec![stock]));
        }
        for (_, stocks) in by_sector.iter_mut() {
            if risk_averse {
                stocks.sort_by_key(|s| catalog.risk_score(&s.ticker).unwrap_or(u8::MAX));
            }
        }
        for (_, stocks) in &by_sector {
            for stock in stocks.iter().take(2) {
                if names.len() >= desired {
                    break;
                }
                let ticker = stock.ticker.to_uppercase();
                if taken.contains(&ticker) || exclusions.contains(&ticker) {
                    continue;
                }
                taken.insert(ticker.clone());
                names.push(ticker);
            }
        }
    }

    // Preferred sectors go last here so the seeded ones do not compound.
    let mut sector_stocks: Vec<Vec<&StockEntry>> = Vec::new();
    let mut preferred_tail: Vec<Vec<&StockEntry>> = Vec::new();
    for sector in catalog.sectors() {
        if is_avoided(&sector.name, profile) {
            continue;
        }
        let mut stocks: Vec<&StockEntry> = sector.stocks.iter().collect();
        if risk_averse {
            // Stable sort: ties keep catalog order.
            stocks.sort_by_key(|s| catalog.risk_score(&s.ticker).unwrap_or(u8::MAX));
        }
        if is_preferred(&sector.name, profile) {
            preferred_tail.push(stocks);
        } else {
            sector_stocks.push(stocks);
        }
    }
    sector_stocks.extend(preferred_tail);

    let mut cursor = vec![0usize; sector_stocks.len()];
    let mut progressed = true;
    while names.len() < desired && progressed {
        progressed = false;
        for (idx, stocks) in sector_stocks.iter().enumerate() {
            if names.len() >= desired {
                break;
            }
            while cursor[idx] < stocks.len() {
                let stock = stocks[cursor[idx]];
                cursor[idx] += 1;
                let ticker = stock.ticker.to_uppercase();
                if taken.contains(&ticker) || exclusions.contains(&ticker) {
                    continue;
                }
                taken.insert(ticker.clone());
                names.push(ticker);
                progressed = true;
                break;
            }
        }
    }
    names.len() - start
}

/// Keep the largest target positions up to the holding limit and hand the
/// trimmed weight to the survivors, proportional to their weights.
fn enforce_max_holdings(
    weights: &mut Vec<(String, f64)>,
    max_holdings: u32,
    warnings: &mut Vec<String>,
) {
    let max = max_holdings.max(1) as usize;
    if weights.len() <= max {
        return;
    }
    weights.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    let dropped: f64 = weights.drain(max..).map(|(_, w)| w).sum();
    let kept: f64 = weights.iter().map(|(_, w)| w).sum();
    if kept > 0.0 {
        for (_, w) in weights.iter_mut() {
            *w += dropped * (*w / kept);
        }
    }
    warnings.push(format!(
        "Holding limit {max} applied; trimmed to the {max} largest target positions"
    ));
}

/// Clamp positions above the cap and push the excess onto uncapped
/// positions, proportionally. Whatever cannot be placed falls to cash.
fn enforce_position_cap(weights: &mut [(String, f64)], cap: f64, warnings: &mut Vec<String>) {
    if cap <= 0.0 || cap >= 1.0 {
        return;
    }
    let mut clamped = false;
    for _ in 0..CAP_ROUNDS {
        let mut excess = 0.0;
        for (_, w) in weights.iter_mut() {
            if *w > cap + 1e-12 {
                excess += *w - cap;
                *w = cap;
            }
        }
        if excess <= 1e-12 {
            break;
        }
        clamped = true;
        let open: f64 = weights
            .iter()
            .filter(|(_, w)| *w < cap - 1e-12)
            .map(|(_, w)| w)
            .sum();
        if open <= 0.0 {
            // Every position is at the cap; the remainder becomes cash.
            break;
        }
        for (_, w) in weights.iter_mut() {
            if *w < cap - 1e-12 {
                *w += excess * (*w / open);
            }
        }
    }
    if clamped {
        warnings.push(format!(
            "Position cap {:.0}% applied; excess redistributed across remaining positions",
            cap * 100.0
        ));
    }
}

fn warn_on_sector_concentration(
    target: &Portfolio,
    max_sector_weight: f64,
    catalog: &SectorCatalog,
    warnings: &mut Vec<String>,
) {
    let mut by_sector: BTreeMap<&str, f64> = BTreeMap::new();
    for h in &target.holdings {
        if let Some(sector) = catalog_sector(catalog, &h.ticker) {
            *by_sector.entry(sector).or_insert(0.0) += h.weight;
        }
    }
    for (sector, weight) in by_sector {
        if weight > max_sector_weight + 1e-9 {
            warnings.push(format!(
                "High concentration remains after rebalance: {sector} at {:.1}%",
                weight * 100.0
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::profile::{Constraints, Objective, Preferences, RebalanceFrequency};
    use chrono::Utc;

    fn profile(risk_score: u8) -> InvestorProfile {
        InvestorProfile {
            user_id: "u1".to_string(),
            objective: Objective::Growth,
            horizon_months: 60,
            risk_score,
            constraints: Constraints::default(),
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
    fn diff_orders_sells_before_buys() {
        let current = portfolio(&[("AAPL", 0.5), ("MSFT", 0.5)], 0.0);
        let target: BTreeMap<String, f64> = [
            ("AAPL".to_string(), 0.3),
            ("MSFT".to_string(), 0.3),
            ("GOOGL".to_string(), 0.4),
        ]
        .into_iter()
        .collect();

        let actions = diff_weights(&current, &target);
        assert_eq!(actions.len(), 3);

        assert_eq!(actions[0].side, TradeSide::Sell);
        assert_eq!(actions[0].ticker, "AAPL");
        assert!((actions[0].delta_weight + 0.2).abs() < 1e-9);

        assert_eq!(actions[1].side, TradeSide::Sell);
        assert_eq!(actions[1].ticker, "MSFT");
        assert!((actions[1].delta_weight + 0.2).abs() < 1e-9);

        assert_eq!(actions[2].side, TradeSide::Buy);
        assert_eq!(actions[2].ticker, "GOOGL");
        assert!((actions[2].delta_weight - 0.4).abs() < 1e-9);
    }

    #[test]
    fn diff_skips_negligible_deltas() {
        let current = portfolio(&[("AAPL", 0.5), ("MSFT", 0.5)], 0.0);
        let target: BTreeMap<String, f64> = [
            ("AAPL".to_string(), 0.5004),
            ("MSFT".to_string(), 0.4996),
        ]
        .into_iter()
        .collect();
        assert!(diff_weights(&current, &target).is_empty());
    }

    #[test]
    fn portfolio_at_its_own_target_yields_no_actions() {
        let catalog = SectorCatalog::embedded().unwrap();
        let p = profile(70);

        let constructed = plan_detailed(&Portfolio::all_cash(), &p, PlanMode::Construct, &catalog)
            .unwrap()
            .target;
        let outcome =
            plan_detailed(&constructed, &p, PlanMode::Rebalance, &catalog).unwrap();
        assert!(outcome.plan.actions.is_empty(), "{:?}", outcome.plan.actions);
    }

    #[test]
    fn construct_target_is_normalized_and_within_caps() {
        let catalog = SectorCatalog::embedded().unwrap();
        let mut p = profile(55);
        p.constraints.max_position_pct = 10.0;
        p.constraints.max_holdings = 12;

        let outcome =
            plan_detailed(&Portfolio::all_cash(), &p, PlanMode::Construct, &catalog).unwrap();
        let target = &outcome.target;
        assert!((target.total_weight() - 1.0).abs() < 1e-9);
        assert!(target.holdings.len() <= 12);
        for h in &target.holdings {
            assert!(h.weight <= 0.10 + 1e-9, "{} at {}", h.ticker, h.weight);
        }
        assert!(outcome
            .plan
            .actions
            .iter()
            .all(|a| a.side == TradeSide::Buy));
    }

    #[test]
    fn exclusions_become_full_sells() {
        let catalog = SectorCatalog::embedded().unwrap();
        let mut p = profile(70);
        p.constraints.exclusions = vec!["aapl".to_string()];

        let current = portfolio(&[("AAPL", 0.3), ("MSFT", 0.3), ("JPM", 0.3)], 0.1);
        let outcome = plan_detailed(&current, &p, PlanMode::Rebalance, &catalog).unwrap();

        let aapl: Vec<_> = outcome
            .plan
            .actions
            .iter()
            .filter(|a| a.ticker == "AAPL")
            .collect();
        assert_eq!(aapl.len(), 1);
        assert_eq!(aapl[0].side, TradeSide::Sell);
        assert!((aapl[0].delta_weight + 0.3).abs() < 1e-9);
        assert!(outcome.target.holdings.iter().all(|h| h.ticker != "AAPL"));
        assert!(outcome
            .plan
            .notes
            .iter()
            .any(|n| n.contains("AAPL") && n.contains("exclusion")));
    }

    #[test]
    fn avoided_sectors_carry_no_target_weight() {
        let catalog = SectorCatalog::embedded().unwrap();
        let mut p = profile(70);
        p.preferences.sectors_avoid = vec!["energy".to_string()];

        let outcome =
            plan_detailed(&Portfolio::all_cash(), &p, PlanMode::Construct, &catalog).unwrap();
        use crate::sectors::SectorResolver;
        for h in &outcome.target.holdings {
            assert_ne!(catalog.resolve(&h.ticker), Some("Energy"));
        }
    }

    #[test]
    fn holding_limit_emits_warning() {
        let catalog = SectorCatalog::embedded().unwrap();
        let mut p = profile(70);
        p.constraints.max_holdings = 3;
        p.constraints.max_position_pct = 60.0;

        let current = portfolio(
            &[
                ("AAPL", 0.19),
                ("JNJ", 0.19),
                ("JPM", 0.19),
                ("KO", 0.19),
                ("XOM", 0.19),
            ],
            0.05,
        );
        let outcome = plan_detailed(&current, &p, PlanMode::Rebalance, &catalog).unwrap();
        assert!(outcome.target.holdings.len() <= 3);
        assert!(outcome
            .plan
            .warnings
            .iter()
            .any(|w| w.contains("Holding limit")));
    }

    #[test]
    fn infeasible_caps_spill_to_cash_with_warning() {
        let catalog = SectorCatalog::embedded().unwrap();
        let mut p = profile(70);
        p.constraints.max_holdings = 2;
        p.constraints.max_position_pct = 20.0;

        let outcome =
            plan_detailed(&Portfolio::all_cash(), &p, PlanMode::Construct, &catalog).unwrap();
        // Two positions at 20% each leaves the rest in cash.
        assert!((outcome.target.total_weight() - 1.0).abs() < 1e-9);
        assert!(outcome.target.cash_weight > 0.5);
        assert!(outcome
            .plan
            .warnings
            .iter()
            .any(|w| w.contains("Position cap")));
    }

    #[test]
    fn preferred_sectors_get_thematic_overweight() {
        let catalog = SectorCatalog::embedded().unwrap();
        let mut p = profile(70);
        p.preferences.sectors_like = vec!["Technology".to_string()];

        let outcome =
            plan_detailed(&Portfolio::all_cash(), &p, PlanMode::Construct, &catalog).unwrap();
        use crate::sectors::SectorResolver;
        let tech_max = outcome
            .target
            .holdings
            .iter()
            .filter(|h| catalog.resolve(&h.ticker) == Some("Technology"))
            .map(|h| h.weight)
            .fold(0.0, f64::max);
        let other_max = outcome
            .target
            .holdings
            .iter()
            .filter(|h| catalog.resolve(&h.ticker) != Some("Technology"))
            .map(|h| h.weight)
            .fold(0.0, f64::max);
        assert!(tech_max > other_max);
        assert!(outcome
            .plan
            .notes
            .iter()
            .any(|n| n.contains("Technology")));
    }

    #[test]
    fn risk_averse_construction_takes_the_safest_name_per_sector() {
        let catalog = SectorCatalog::embedded().unwrap();
        let outcome =
            plan_detailed(&Portfolio::all_cash(), &profile(30), PlanMode::Construct, &catalog)
                .unwrap();

        let tickers: Vec<&str> = outcome
            .target
            .holdings
            .iter()
            .map(|h| h.ticker.as_str())
            .collect();
        // V (20) over JPM (40), MCD (20) over AMZN (40), UNP (20) over CAT (40).
        assert!(tickers.contains(&"V"), "{tickers:?}");
        assert!(tickers.contains(&"MCD"), "{tickers:?}");
        assert!(tickers.contains(&"UNP"), "{tickers:?}");
        assert!(!tickers.contains(&"JPM"), "{tickers:?}");
        assert!(!tickers.contains(&"AMZN"), "{tickers:?}");
    }

    #[test]
    fn preferred_sector_seeds_two_names() {
        let catalog = SectorCatalog::embedded().unwrap();
        let mut p = profile(70);
        p.preferences.sectors_like = vec!["Technology".to_string()];

        let outcome =
            plan_detailed(&Portfolio::all_cash(), &p, PlanMode::Construct, &catalog).unwrap();
        let tickers: Vec<&str> = outcome
            .target
            .holdings
            .iter()
            .map(|h| h.ticker.as_str())
            .collect();
        assert!(tickers.contains(&"AAPL"), "{tickers:?}");
        assert!(tickers.contains(&"MSFT"), "{tickers:?}");
        use crate::sectors::SectorResolver;
        let tech_count = tickers
            .iter()
            .filter(|t| catalog.resolve(t) == Some("Technology"))
            .count();
        assert_eq!(tech_count, 2);
    }

    #[test]
    fn everything_excluded_sells_out_with_warning() {
        let catalog = SectorCatalog::embedded().unwrap();
        let mut p = profile(70);
        p.preferences.sectors_avoid = catalog
            .sector_names()
            .iter()
            .map(|s| s.to_string())
            .collect();

        let current = portfolio(&[("AAPL", 0.9)], 0.1);
        let outcome = plan_detailed(&current, &p, PlanMode::Rebalance, &catalog).unwrap();
        assert!(outcome.target.holdings.is_empty());
        assert_eq!(outcome.plan.actions.len(), 1);
        assert_eq!(outcome.plan.actions[0].side, TradeSide::Sell);
        assert!(!outcome.plan.warnings.is_empty());
    }

    #[test]
    fn applying_the_actions_reaches_the_target() {
        let catalog = SectorCatalog::embedded().unwrap();
        let current = portfolio(&[("AAPL", 0.60), ("MSFT", 0.35)], 0.05);
        let outcome = plan_detailed(&current, &profile(70), PlanMode::Rebalance, &catalog).unwrap();

        let mut applied: BTreeMap<String, f64> = current
            .holdings
            .iter()
            .map(|h| (h.ticker.clone(), h.weight))
            .collect();
        for action in &outcome.plan.actions {
            *applied.entry(action.ticker.clone()).or_insert(0.0) += action.delta_weight;
        }
        applied.retain(|_, w| w.abs() > DELTA_EPSILON);

        for h in &outcome.target.holdings {
            let got = applied.get(&h.ticker).copied().unwrap_or(0.0);
            assert!((got - h.weight).abs() < 2.0 * DELTA_EPSILON, "{}", h.ticker);
        }
        let equity: f64 = applied.values().sum();
        let renormalized = normalize(
            &applied
                .iter()
                .map(|(t, w)| Holding::new(t, *w))
                .collect::<Vec<_>>(),
            (1.0 - equity).clamp(0.0, 1.0),
        )
        .unwrap();
        assert!((renormalized.portfolio.total_weight() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rebalance_rejects_unnormalized_current() {
        let catalog = SectorCatalog::embedded().unwrap();
        let current = portfolio(&[("AAPL", 0.9)], 0.5);
        assert!(matches!(
            plan_detailed(&current, &profile(70), PlanMode::Rebalance, &catalog),
            Err(EngineError::NotNormalized { .. })
        ));
    }
}
