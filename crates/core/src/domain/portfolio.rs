use crate::domain::metrics::PortfolioMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single position. `weight` is a decimal fraction of the total portfolio
/// (0.25 = 25%), never a percentage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub ticker: String,
    pub weight: f64,
}

impl Holding {
    pub fn new(ticker: impl Into<String>, weight: f64) -> Self {
        Self {
            ticker: ticker.into(),
            weight,
        }
    }
}

/// Tickers are 1-5 uppercase ASCII alphanumerics. Validation runs after
/// trimming and uppercasing, so `"aapl "` passes and `"BRK.B"` does not.
pub fn is_valid_ticker(ticker: &str) -> bool {
    (1..=5).contains(&ticker.len())
        && ticker
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

/// Holdings plus a cash weight. Invariant after normalization:
/// `sum(weights) + cash_weight == 1.0` (exact up to 1e-9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub holdings: Vec<Holding>,
    #[serde(default)]
    pub cash_weight: f64,
}

impl Portfolio {
    pub fn new(holdings: Vec<Holding>, cash_weight: f64) -> Self {
        Self {
            holdings,
            cash_weight,
        }
    }

    pub fn all_cash() -> Self {
        Self {
            holdings: Vec::new(),
            cash_weight: 1.0,
        }
    }

    pub fn equity_weight(&self) -> f64 {
        self.holdings.iter().map(|h| h.weight).sum()
    }

    pub fn total_weight(&self) -> f64 {
        self.equity_weight() + self.cash_weight
    }
}

/// Immutable record of a portfolio and its metrics at save time.
/// Snapshots are append-only: storage exposes no update or delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub snapshot_id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub holdings: Vec<Holding>,
    pub cash_weight: f64,
    pub metrics: PortfolioMetrics,
}
