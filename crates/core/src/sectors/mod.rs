//! Ticker-to-sector catalog.
//!
//! The catalog is parsed once from an embedded JSON table and injected into
//! the engine as an explicit value; there is no process-wide cache. Lookup
//! failures are always non-fatal: callers bucket unresolved tickers under
//! [`OTHER_SECTOR`].

use anyhow::{ensure, Context};
use serde::Deserialize;
use std::collections::HashMap;

/// Bucket label for tickers the resolver cannot place.
pub const OTHER_SECTOR: &str = "Other";

static EMBEDDED_CATALOG: &str = include_str!("../../data/sectors.json");

/// Best-effort ticker -> sector lookup. Implementations must be idempotent
/// and tolerant of unknown tickers (return `None`, never fail).
pub trait SectorResolver: Send + Sync {
    fn resolve(&self, ticker: &str) -> Option<&str>;
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogData {
    sectors: Vec<SectorEntry>,
    risk_levels: HashMap<String, RiskLevel>,
    market_cap_categories: HashMap<String, CapCategory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SectorEntry {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub stocks: Vec<StockEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StockEntry {
    pub ticker: String,
    pub name: String,
    #[serde(default = "default_market_cap")]
    pub market_cap: String,
    #[serde(default = "default_industry_risk")]
    pub industry_risk: String,
}

fn default_market_cap() -> String {
    "large".to_string()
}

fn default_industry_risk() -> String {
    "medium".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct RiskLevel {
    score: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct CapCategory {
    risk_multiplier: f64,
}

/// Parsed sector/stock table with a ticker index.
pub struct SectorCatalog {
    data: CatalogData,
    // ticker -> index into data.sectors
    by_ticker: HashMap<String, usize>,
}

impl SectorCatalog {
    /// Load the catalog shipped with the crate.
    pub fn embedded() -> anyhow::Result<Self> {
        Self::from_json(EMBEDDED_CATALOG)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let data: CatalogData =
            serde_json::from_str(json).context("failed to parse sector catalog JSON")?;
        ensure!(!data.sectors.is_empty(), "sector catalog has no sectors");

        let mut by_ticker = HashMap::new();
        for (idx, sector) in data.sectors.iter().enumerate() {
            ensure!(
                !sector.name.trim().is_empty(),
                "sector catalog contains an unnamed sector"
            );
            for stock in &sector.stocks {
                let ticker = stock.ticker.trim().to_uppercase();
                ensure!(!ticker.is_empty(), "sector {} has an empty ticker", sector.name);
                ensure!(
                    by_ticker.insert(ticker.clone(), idx).is_none(),
                    "duplicate ticker in sector catalog: {ticker}"
                );
            }
        }

        Ok(Self { data, by_ticker })
    }

    pub fn sectors(&self) -> impl Iterator<Item = &SectorEntry> {
        self.data.sectors.iter()
    }

    pub fn sector_names(&self) -> Vec<&str> {
        self.data.sectors.iter().map(|s| s.name.as_str()).collect()
    }

    /// Stocks belonging to any of the named sectors, catalog order, deduped.
    pub fn stocks_for_sectors<'a>(
        &'a self,
        sector_names: &[String],
    ) -> Vec<(&'a SectorEntry, &'a StockEntry)> {
        let mut out = Vec::new();
        for sector in &self.data.sectors {
            if sector_names.iter().any(|n| n.eq_ignore_ascii_case(&sector.name)) {
                for stock in &sector.stocks {
                    out.push((sector, stock));
                }
            }
        }
        out
    }

    /// Sectors whose name or any keyword appears in the text (word-boundary
    /// match for single words, substring for multi-word keywords).
    pub fn sectors_by_keywords(&self, text: &str) -> Vec<&str> {
        let text_lower = text.to_lowercase();
        let mut found = Vec::new();
        for sector in &self.data.sectors {
            let name_lower = sector.name.to_lowercase();
            let hit = contains_phrase(&text_lower, &name_lower)
                || sector
                    .keywords
                    .iter()
                    .any(|kw| contains_phrase(&text_lower, &kw.to_lowercase()));
            if hit {
                found.push(sector.name.as_str());
            }
        }
        found
    }

    /// Combined risk score for a stock: industry risk scaled by market-cap
    /// multiplier onto a rough 1-100 scale. `None` for unknown tickers.
    pub fn risk_score(&self, ticker: &str) -> Option<u8> {
        let upper = ticker.trim().to_uppercase();
        let sector = &self.data.sectors[*self.by_ticker.get(&upper)?];
        let stock = sector
            .stocks
            .iter()
            .find(|s| s.ticker.eq_ignore_ascii_case(&upper))?;

        let base = self
            .data
            .risk_levels
            .get(&stock.industry_risk)
            .or_else(|| self.data.risk_levels.get("medium"))?
            .score;
        let multiplier = self
            .data
            .market_cap_categories
            .get(&stock.market_cap)
            .or_else(|| self.data.market_cap_categories.get("large"))?
            .risk_multiplier;

        let score = (base * multiplier * 20.0).round();
        Some(score.clamp(1.0, 100.0) as u8)
    }

    pub fn contains_ticker(&self, ticker: &str) -> bool {
        self.by_ticker.contains_key(&ticker.trim().to_uppercase())
    }
}

impl SectorResolver for SectorCatalog {
    fn resolve(&self, ticker: &str) -> Option<&str> {
        let upper = ticker.trim().to_uppercase();
        self.by_ticker
            .get(&upper)
            .map(|&idx| self.data.sectors[idx].name.as_str())
    }
}

/// Whole-word containment check. Multi-word needles fall back to substring.
fn contains_phrase(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    if needle.contains(' ') {
        return haystack.contains(needle);
    }
    haystack.match_indices(needle).any(|(pos, _)| {
        let before_ok = pos == 0
            || !haystack.as_bytes()[pos - 1].is_ascii_alphanumeric();
        let end = pos + needle.len();
        let after_ok =
            end == haystack.len() || !haystack.as_bytes()[end].is_ascii_alphanumeric();
        before_ok && after_ok
    })
}
