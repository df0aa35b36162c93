//! Deterministic fallback explanation used when no LLM client is configured
//! or the call fails. The numeric plan must stay verifiable offline, so this
//! is a pure function of its inputs.

use crate::domain::metrics::PortfolioMetrics;
use crate::domain::plan::{RebalancePlan, TradeSide};
use crate::domain::profile::{InvestorProfile, Objective};

pub fn template_explanation(
    profile: &InvestorProfile,
    metrics: &PortfolioMetrics,
    plan: &RebalancePlan,
) -> String {
    let objective = match profile.objective {
        Objective::Growth => "growth",
        Objective::Income => "income",
        Objective::Balanced => "balanced",
    };

    let buys = plan
        .actions
        .iter()
        .filter(|a| a.side == TradeSide::Buy)
        .count();
    let sells = plan.actions.len() - buys;

    let mut out = format!(
        "This plan targets a {objective} objective with a risk score of {} over \
{} months.",
        profile.risk_score, profile.horizon_months
    );

    if plan.actions.is_empty() {
        out.push_str(" The portfolio already matches its target; no trades are needed.");
    } else {
        out.push_str(&format!(
            " It makes {} trade(s): {sells} sell(s) followed by {buys} buy(s)."
        , plan.actions.len()));
    }

    out.push_str(&format!(
        " The resulting portfolio holds {} position(s) with a top-position weight of {:.1}%.",
        metrics.total_holdings,
        metrics.top_1_weight * 100.0
    ));

    if let Some(warning) = plan.warnings.first() {
        out.push_str(&format!(" Note: {warning}."));
    }

    out
}
