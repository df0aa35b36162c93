//! Weight normalization.
//!
//! Two-pass by design: scaling equity to the cash target and then
//! recomputing cash still leaves floating-point drift when applied
//! repeatedly (e.g. after a sequence of rebalance deltas), so a final
//! uniform rescale snaps the total back to exactly 1.0. Normalizing an
//! already-normalized portfolio is a no-op up to 1e-9.

use crate::domain::portfolio::{is_valid_ticker, Holding, Portfolio};
use crate::engine::error::EngineError;

/// Tolerance for pre-normalization input (user-supplied weights).
pub const INPUT_EPSILON: f64 = 1e-2;

/// Post-condition tolerance: `|total - 1.0|` after normalization.
pub const EXACT_EPSILON: f64 = 1e-9;

/// A holding removed during normalization, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedHolding {
    pub ticker: String,
    pub reason: String,
}

/// Normalization result. `degenerate` is set when the input had no usable
/// equity but the cash target demanded some; callers must surface this,
/// not silently accept the all-cash portfolio.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub portfolio: Portfolio,
    pub dropped: Vec<DroppedHolding>,
    pub degenerate: bool,
}

/// Normalize `(holdings, cash_target)` so that tickers are uppercased,
/// trimmed and deduplicated (last write wins), invalid tickers and
/// non-positive weights are dropped with a diagnostic, and
/// `sum(weights) + cash == 1.0` exactly.
pub fn normalize(holdings: &[Holding], cash_target: f64) -> Result<Normalized, EngineError> {
    if !cash_target.is_finite() || !(0.0..=1.0).contains(&cash_target) {
        return Err(EngineError::InvalidInput(format!(
            "cash_weight must be in [0, 1], got {cash_target}"
        )));
    }

    let mut kept: Vec<Holding> = Vec::with_capacity(holdings.len());
    let mut index: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut dropped = Vec::new();

    for h in holdings {
        let ticker = h.ticker.trim().to_uppercase();
        if !is_valid_ticker(&ticker) {
            dropped.push(DroppedHolding {
                ticker: h.ticker.clone(),
                reason: "invalid ticker (expected 1-5 uppercase alphanumerics)".to_string(),
            });
            continue;
        }
        if !h.weight.is_finite() || h.weight <= 0.0 {
            dropped.push(DroppedHolding {
                ticker,
                reason: format!("non-positive weight {}", h.weight),
            });
            continue;
        }
        match index.get(&ticker) {
            // Duplicate ticker: last write wins.
            Some(&i) => kept[i].weight = h.weight,
            None => {
                index.insert(ticker.clone(), kept.len());
                kept.push(Holding {
                    ticker,
                    weight: h.weight,
                });
            }
        }
    }

    let equity_target = 1.0 - cash_target;
    if equity_target <= EXACT_EPSILON {
        // 100% cash requested: any surviving holdings scale to zero, so
        // emit the all-cash portfolio directly instead of phantom positions.
        for h in kept {
            dropped.push(DroppedHolding {
                ticker: h.ticker,
                reason: "scaled to zero by a 100% cash target".to_string(),
            });
        }
        return Ok(Normalized {
            portfolio: Portfolio::all_cash(),
            dropped,
            degenerate: false,
        });
    }

    let equity_sum: f64 = kept.iter().map(|h| h.weight).sum();

    if equity_sum <= 0.0 {
        return Ok(Normalized {
            portfolio: Portfolio::all_cash(),
            dropped,
            degenerate: equity_target > EXACT_EPSILON,
        });
    }

    let scale = equity_target / equity_sum;
    for h in &mut kept {
        h.weight *= scale;
    }

    let equity_now: f64 = kept.iter().map(|h| h.weight).sum();
    let mut cash = (1.0 - equity_now).max(0.0);

    let total = equity_now + cash;
    if (total - 1.0).abs() > EXACT_EPSILON && total > 0.0 {
        let fix = 1.0 / total;
        for h in &mut kept {
            h.weight *= fix;
        }
        cash *= fix;
    }

    Ok(Normalized {
        portfolio: Portfolio {
            holdings: kept,
            cash_weight: cash,
        },
        dropped,
        degenerate: false,
    })
}

/// Like [`normalize`], but a degenerate outcome (no usable equity against a
/// nonzero equity target) is an [`EngineError::Degenerate`] carrying the
/// per-holding drop reasons. Request handlers use this form; nothing
/// downstream of them can do anything useful with an unintended all-cash
/// portfolio.
pub fn normalize_strict(holdings: &[Holding], cash_target: f64) -> Result<Normalized, EngineError> {
    let normalized = normalize(holdings, cash_target)?;
    if normalized.degenerate {
        let mut detail = "no usable equity positions against a nonzero equity target".to_string();
        if !normalized.dropped.is_empty() {
            let reasons: Vec<String> = normalized
                .dropped
                .iter()
                .map(|d| format!("{}: {}", d.ticker, d.reason))
                .collect();
            detail.push_str(&format!(" ({})", reasons.join("; ")));
        }
        return Err(EngineError::Degenerate(detail));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holdings(pairs: &[(&str, f64)]) -> Vec<Holding> {
        pairs
            .iter()
            .map(|(t, w)| Holding::new(*t, *w))
            .collect()
    }

    #[test]
    fn scales_equity_to_cash_target() {
        let n = normalize(&holdings(&[("AAPL", 0.3), ("MSFT", 0.3)]), 0.1).unwrap();
        assert!((n.portfolio.equity_weight() - 0.9).abs() < EXACT_EPSILON);
        assert!((n.portfolio.total_weight() - 1.0).abs() < EXACT_EPSILON);
        assert!(!n.degenerate);
        assert!(n.dropped.is_empty());
    }

    #[test]
    fn normalization_is_idempotent() {
        let first = normalize(
            &holdings(&[("AAPL", 0.37), ("MSFT", 0.21), ("KO", 0.19)]),
            0.07,
        )
        .unwrap();
        let second = normalize(&first.portfolio.holdings, first.portfolio.cash_weight).unwrap();

        assert!((second.portfolio.total_weight() - 1.0).abs() < EXACT_EPSILON);
        for (a, b) in first
            .portfolio
            .holdings
            .iter()
            .zip(second.portfolio.holdings.iter())
        {
            assert_eq!(a.ticker, b.ticker);
            assert!((a.weight - b.weight).abs() < EXACT_EPSILON);
        }
        assert!((first.portfolio.cash_weight - second.portfolio.cash_weight).abs() < EXACT_EPSILON);
    }

    #[test]
    fn uppercases_trims_and_dedups_last_write_wins() {
        let n = normalize(
            &holdings(&[(" aapl ", 0.2), ("AAPL", 0.6), ("msft", 0.2)]),
            0.0,
        )
        .unwrap();
        assert_eq!(n.portfolio.holdings.len(), 2);
        assert_eq!(n.portfolio.holdings[0].ticker, "AAPL");
        // AAPL kept its last weight (0.6) before scaling: 0.6 / 0.8 = 0.75.
        assert!((n.portfolio.holdings[0].weight - 0.75).abs() < EXACT_EPSILON);
    }

    #[test]
    fn drops_invalid_tickers_with_diagnostic() {
        let n = normalize(
            &holdings(&[("TOOLONG", 0.5), ("BRK.B", 0.2), ("AAPL", 0.3)]),
            0.0,
        )
        .unwrap();
        assert_eq!(n.portfolio.holdings.len(), 1);
        assert_eq!(n.dropped.len(), 2);
        assert!(n.dropped[0].reason.contains("invalid ticker"));
        assert!((n.portfolio.holdings[0].weight - 1.0).abs() < EXACT_EPSILON);
    }

    #[test]
    fn drops_non_positive_weights() {
        let n = normalize(&holdings(&[("AAPL", -0.1), ("MSFT", 0.5)]), 0.5).unwrap();
        assert_eq!(n.portfolio.holdings.len(), 1);
        assert_eq!(n.dropped[0].ticker, "AAPL");
    }

    #[test]
    fn zero_equity_with_equity_target_is_degenerate() {
        let n = normalize(&[], 0.4).unwrap();
        assert!(n.degenerate);
        assert!(n.portfolio.holdings.is_empty());
        assert_eq!(n.portfolio.cash_weight, 1.0);
    }

    #[test]
    fn all_cash_is_not_degenerate() {
        let n = normalize(&[], 1.0).unwrap();
        assert!(!n.degenerate);
        assert_eq!(n.portfolio.cash_weight, 1.0);
    }

    #[test]
    fn strict_rejects_degenerate_input_with_reasons() {
        let err = normalize_strict(&holdings(&[("BRK.B", 0.6)]), 0.4).unwrap_err();
        match err {
            EngineError::Degenerate(msg) => {
                assert!(msg.contains("BRK.B"));
                assert!(msg.contains("invalid ticker"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn strict_passes_valid_input_through() {
        let n = normalize_strict(&holdings(&[("AAPL", 1.0)]), 0.2).unwrap();
        assert!((n.portfolio.total_weight() - 1.0).abs() < EXACT_EPSILON);
        assert!(!n.degenerate);
    }

    #[test]
    fn strict_allows_intentional_all_cash() {
        let n = normalize_strict(&[], 1.0).unwrap();
        assert_eq!(n.portfolio.cash_weight, 1.0);
    }

    #[test]
    fn rejects_out_of_range_cash_target() {
        assert!(matches!(
            normalize(&[], 1.5),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            normalize(&[], f64::NAN),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn repeated_normalization_does_not_drift() {
        let mut portfolio = normalize(
            &holdings(&[("AAPL", 0.11), ("MSFT", 0.13), ("KO", 0.17), ("JPM", 0.23)]),
            0.05,
        )
        .unwrap()
        .portfolio;

        for _ in 0..100 {
            portfolio = normalize(&portfolio.holdings, portfolio.cash_weight)
                .unwrap()
                .portfolio;
        }
        assert!((portfolio.total_weight() - 1.0).abs() < EXACT_EPSILON);
    }
}
