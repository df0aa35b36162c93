//! Profile-to-target-allocation policy.
//!
//! This is the judgment-laden part of the engine, so the whole policy sits
//! behind [`derive_target`] and can be swapped without touching the planner
//! mechanics. Weights are computed in percent and returned as fractions.

use crate::domain::plan::TargetAllocation;
use crate::domain::profile::{InvestorProfile, Objective};

/// Cash floor: no target ever allocates less than 5% cash.
pub const MIN_CASH_PCT: f64 = 5.0;

const VERY_RISK_AVERSE_BELOW: u8 = 35;
const RISK_AVERSE_BELOW: u8 = 50;

/// Sector diversification limits implied by the risk score. These shape
/// candidate selection and post-plan warnings, not hard weight clamps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskBand {
    pub max_sector_weight: f64,
    pub min_sectors: usize,
}

pub fn risk_band(risk_score: u8) -> RiskBand {
    if risk_score < VERY_RISK_AVERSE_BELOW {
        RiskBand {
            max_sector_weight: 0.20,
            min_sectors: 5,
        }
    } else if risk_score < RISK_AVERSE_BELOW {
        RiskBand {
            max_sector_weight: 0.25,
            min_sectors: 4,
        }
    } else {
        RiskBand {
            max_sector_weight: 0.35,
            min_sectors: 3,
        }
    }
}

/// How many positions a constructed portfolio should aim for. Higher risk
/// tolerance concentrates into fewer names; lower spreads wider, floored at
/// the band's sector minimum and capped by `max_holdings`.
pub fn target_position_count(profile: &InvestorProfile) -> usize {
    let risk = f64::from(profile.risk_score) / 100.0;
    let band = risk_band(profile.risk_score);
    let raw = (4.0 + (1.0 - risk) * 8.0).round() as usize;
    raw.max(band.min_sectors)
        .min(profile.constraints.max_holdings as usize)
        .max(1)
}

/// Derive the four-sleeve target allocation from a profile.
///
/// Deterministic rules: base equity grows with risk score and horizon
/// (capped at 80%), thematic weight rewards stated sector preferences but
/// shrinks for risk-averse profiles, cash buffers shorten with horizon and
/// widen with risk aversion, and the income objective trades equity for
/// defensive weight. The four sleeves always sum to exactly 1.0 and cash
/// never drops below [`MIN_CASH_PCT`].
pub fn derive_target(profile: &InvestorProfile) -> TargetAllocation {
    let risk = f64::from(profile.risk_score) / 100.0;
    let horizon_years = f64::from(profile.horizon_months) / 12.0;
    let very_risk_averse = profile.risk_score < VERY_RISK_AVERSE_BELOW;
    let risk_averse = profile.risk_score < RISK_AVERSE_BELOW;
    let has_preferred = !profile.preferences.sectors_like.is_empty();

    let mut base_equity = (40.0 + risk * 40.0 + horizon_years.min(10.0) / 10.0 * 20.0).min(80.0);

    let mut thematic = if very_risk_averse {
        if has_preferred {
            5.0
        } else {
            0.0
        }
    } else if risk_averse {
        if has_preferred {
            8.0
        } else {
            3.0
        }
    } else if has_preferred {
        15.0
    } else {
        5.0
    };

    let mut cash = if very_risk_averse {
        if profile.horizon_months < 12 {
            25.0
        } else if profile.horizon_months < 24 {
            15.0
        } else {
            10.0
        }
    } else if risk_averse {
        if profile.horizon_months < 12 {
            20.0
        } else if profile.horizon_months < 24 {
            12.0
        } else {
            7.0
        }
    } else if profile.horizon_months < 12 {
        20.0
    } else if profile.horizon_months < 24 {
        10.0
    } else {
        MIN_CASH_PCT
    };

    let mut defensive = if very_risk_averse {
        20.0
    } else if risk_averse {
        15.0
    } else {
        0.0
    };

    match profile.objective {
        Objective::Income => {
            base_equity *= 0.7;
            defensive += 10.0;
            if risk_averse {
                defensive += 5.0;
            }
        }
        Objective::Balanced => base_equity *= 0.85,
        Objective::Growth => {}
    }

    let total = base_equity + thematic + cash + defensive;
    if total > 100.0 {
        let equity_total = base_equity + thematic + defensive;
        let max_equity = 100.0 - MIN_CASH_PCT;
        if equity_total > max_equity {
            let scale = max_equity / equity_total;
            base_equity *= scale;
            thematic *= scale;
            defensive *= scale;
            cash = MIN_CASH_PCT;
        } else {
            let scale = 100.0 / total;
            base_equity *= scale;
            thematic *= scale;
            defensive *= scale;
            cash = (cash * scale).max(MIN_CASH_PCT);
        }
    } else {
        let mut remainder = 100.0 - total;
        if cash < MIN_CASH_PCT {
            remainder -= MIN_CASH_PCT - cash;
            cash = MIN_CASH_PCT;
        }
        base_equity += remainder;
    }

    cash = cash.max(MIN_CASH_PCT);

    // Snap equity sleeves so the four weights sum to exactly 100 with the
    // cash floor preserved.
    let equity_total = base_equity + thematic + defensive;
    if equity_total > 0.0 {
        let scale = (100.0 - cash) / equity_total;
        base_equity *= scale;
        thematic *= scale;
        defensive *= scale;
    } else {
        cash = 100.0;
    }

    TargetAllocation {
        cash: cash / 100.0,
        core_equity: base_equity / 100.0,
        thematic_sectors: thematic / 100.0,
        defensive: defensive / 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::profile::{Constraints, Preferences, RebalanceFrequency};
    use chrono::Utc;

    fn profile(objective: Objective, risk_score: u8, horizon_months: u32) -> InvestorProfile {
        InvestorProfile {
            user_id: "u1".to_string(),
            objective,
            horizon_months,
            risk_score,
            constraints: Constraints::default(),
            preferences: Preferences::default(),
            rebalance_frequency: RebalanceFrequency::Quarterly,
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn sleeves_sum_to_one_with_cash_floor() {
        for objective in [Objective::Growth, Objective::Income, Objective::Balanced] {
            for risk in [0u8, 20, 34, 49, 50, 80, 100] {
                for horizon in [6u32, 18, 60, 240] {
                    let t = derive_target(&profile(objective, risk, horizon));
                    let sum = t.cash + t.core_equity + t.thematic_sectors + t.defensive;
                    assert!((sum - 1.0).abs() < 1e-9, "{objective:?}/{risk}/{horizon}: {sum}");
                    assert!(t.cash >= 0.05 - 1e-9);
                    assert!(t.core_equity >= 0.0 && t.defensive >= 0.0);
                }
            }
        }
    }

    #[test]
    fn aggressive_long_horizon_growth() {
        let t = derive_target(&profile(Objective::Growth, 80, 120));
        assert!((t.cash - 0.05).abs() < 1e-9);
        assert!((t.core_equity - 0.90).abs() < 1e-9);
        assert!((t.thematic_sectors - 0.05).abs() < 1e-9);
        assert_eq!(t.defensive, 0.0);
    }

    #[test]
    fn very_risk_averse_short_horizon_income() {
        let t = derive_target(&profile(Objective::Income, 30, 6));
        assert!((t.cash - 0.25).abs() < 1e-9);
        assert!((t.defensive - 0.35).abs() < 1e-9);
        assert!((t.core_equity - 0.40).abs() < 1e-9);
    }

    #[test]
    fn income_holds_less_equity_than_growth() {
        let growth = derive_target(&profile(Objective::Growth, 60, 60));
        let income = derive_target(&profile(Objective::Income, 60, 60));
        let balanced = derive_target(&profile(Objective::Balanced, 60, 60));
        assert!(income.equity() < balanced.equity());
        assert!(balanced.equity() < growth.equity() + 1e-9);
        assert!(income.defensive > growth.defensive);
    }

    #[test]
    fn preferred_sectors_raise_thematic_weight() {
        let plain = derive_target(&profile(Objective::Growth, 70, 60));
        let mut with_likes = profile(Objective::Growth, 70, 60);
        with_likes.preferences.sectors_like = vec!["Technology".to_string()];
        let themed = derive_target(&with_likes);
        assert!(themed.thematic_sectors > plain.thematic_sectors);
    }

    #[test]
    fn risk_band_tiers() {
        assert_eq!(risk_band(10).min_sectors, 5);
        assert_eq!(risk_band(40).min_sectors, 4);
        assert_eq!(risk_band(75).min_sectors, 3);
        assert!(risk_band(10).max_sector_weight < risk_band(75).max_sector_weight);
    }

    #[test]
    fn position_count_shrinks_with_risk() {
        let cautious = target_position_count(&profile(Objective::Balanced, 10, 60));
        let bold = target_position_count(&profile(Objective::Growth, 90, 60));
        assert!(cautious > bold);
        assert!(bold >= 3);

        let mut tight = profile(Objective::Balanced, 10, 60);
        tight.constraints.max_holdings = 4;
        assert_eq!(target_position_count(&tight), 4);
    }
}
