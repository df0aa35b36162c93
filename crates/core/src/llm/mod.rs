use crate::domain::contract::TickerClassification;
use crate::domain::metrics::PortfolioMetrics;
use crate::domain::plan::RebalancePlan;
use crate::domain::profile::InvestorProfile;
use crate::sectors::SectorCatalog;

pub mod anthropic;
pub mod error;
pub mod json;
pub mod template;

#[derive(Debug, Clone, Copy)]
pub enum Provider {
    Anthropic,
}

/// Conversational collaborator: turns free text into structured profiles and
/// numeric plans into prose. The engine never feeds its text output back into
/// any computation; [`template::template_explanation`] covers the offline path.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> Provider;

    /// Extract a full investor profile from an onboarding message.
    async fn extract_profile(
        &self,
        user_id: &str,
        message: &str,
        sector_names: &[&str],
    ) -> anyhow::Result<InvestorProfile>;

    /// Apply a follow-up message to an existing profile, returning the
    /// merged result. Fields the message does not touch must survive.
    async fn update_profile(
        &self,
        current: &InvestorProfile,
        message: &str,
        sector_names: &[&str],
    ) -> anyhow::Result<InvestorProfile>;

    /// Narrate a rebalance plan. Output is opaque free text.
    async fn explain_plan(
        &self,
        profile: &InvestorProfile,
        metrics: &PortfolioMetrics,
        plan: &RebalancePlan,
    ) -> anyhow::Result<String>;

    /// Classify a ticker the sector catalog does not know. The returned
    /// sector is always one of `sector_names`.
    async fn classify_ticker(
        &self,
        ticker: &str,
        sector_names: &[&str],
    ) -> anyhow::Result<TickerClassification>;
}

/// Canonicalize extracted sector preferences against the catalog. Free-text
/// likes and avoids become catalog sector names via keyword matching, and
/// the source text itself can contribute likes the model missed. Entries
/// that match no keyword are kept as-is; avoids always win over likes.
pub fn refine_sector_preferences(
    profile: &mut InvestorProfile,
    source_text: &str,
    catalog: &SectorCatalog,
) {
    let avoids: Vec<String> = catalog
        .sectors_by_keywords(&profile.preferences.sectors_avoid.join(" "))
        .into_iter()
        .map(str::to_string)
        .collect();
    if !avoids.is_empty() {
        profile.preferences.sectors_avoid = avoids;
    }

    let mut likes: Vec<String> = catalog
        .sectors_by_keywords(&profile.preferences.sectors_like.join(" "))
        .into_iter()
        .map(str::to_string)
        .collect();
    for name in catalog.sectors_by_keywords(source_text) {
        if !likes.iter().any(|l| l == name) {
            likes.push(name.to_string());
        }
    }
    likes.retain(|l| {
        !profile
            .preferences
            .sectors_avoid
            .iter()
            .any(|a| a.eq_ignore_ascii_case(l))
    });
    if !likes.is_empty() {
        profile.preferences.sectors_like = likes;
    }
}
