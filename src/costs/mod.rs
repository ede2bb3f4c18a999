//! Per-leg transaction cost model.
//!
//! Each leg (entry or exit) pays a plan-specific commission plus per-share
//! slippage and pass-through fees. The volume-tiered plan prices a leg from
//! the shares already traded in the same calendar month; [`MonthlyVolume`]
//! carries that running total and is advanced by the caller after each leg.

use crate::config::{CostConfig, TierConfig};
use crate::error::{BacktestError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Commission schedule.
#[derive(Debug, Clone, PartialEq)]
pub enum PricingPlan {
    /// Flat per-share rate with a per-order minimum and a trade-value cap.
    FixedRate {
        rate_per_share: Decimal,
        min_per_order: Decimal,
        max_rate_of_trade: Decimal,
    },
    /// Per-share rate chosen by month-to-date volume, same minimum and cap rules.
    Tiered {
        tiers: Vec<RateTier>,
        min_per_order: Decimal,
        max_rate_of_trade: Decimal,
    },
    /// Flat per-share rate with a per-order minimum and no cap.
    Lite {
        rate_per_share: Decimal,
        min_per_order: Decimal,
    },
}

/// One bracket of a volume-tiered schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateTier {
    /// Inclusive upper bound on month-to-date shares; `None` is unbounded
    pub up_to: Option<Decimal>,
    pub rate_per_share: Decimal,
}

impl From<&TierConfig> for RateTier {
    fn from(tier: &TierConfig) -> Self {
        Self {
            up_to: tier.up_to,
            rate_per_share: tier.rate_per_share,
        }
    }
}

impl PricingPlan {
    pub fn name(&self) -> &'static str {
        match self {
            PricingPlan::FixedRate { .. } => "pro_fixed",
            PricingPlan::Tiered { .. } => "pro_tiered",
            PricingPlan::Lite { .. } => "lite",
        }
    }

    /// Commission for one leg, before slippage and fees.
    ///
    /// `None` when the amounts leave the decimal range.
    pub fn commission(&self, shares: Decimal, price: Decimal, volume_before: Decimal) -> Option<Decimal> {
        if shares <= Decimal::ZERO || price <= Decimal::ZERO {
            return Some(Decimal::ZERO);
        }

        match self {
            PricingPlan::FixedRate {
                rate_per_share,
                min_per_order,
                max_rate_of_trade,
            } => capped(
                rate_per_share.checked_mul(shares)?.max(*min_per_order),
                *max_rate_of_trade,
                shares,
                price,
            ),
            PricingPlan::Tiered {
                tiers,
                min_per_order,
                max_rate_of_trade,
            } => {
                let rate = tier_rate(tiers, volume_before);
                capped(
                    rate.checked_mul(shares)?.max(*min_per_order),
                    *max_rate_of_trade,
                    shares,
                    price,
                )
            }
            PricingPlan::Lite {
                rate_per_share,
                min_per_order,
            } => Some(rate_per_share.checked_mul(shares)?.max(*min_per_order)),
        }
    }
}

fn capped(
    commission: Decimal,
    max_rate_of_trade: Decimal,
    shares: Decimal,
    price: Decimal,
) -> Option<Decimal> {
    let cap = max_rate_of_trade.checked_mul(price)?.checked_mul(shares)?;
    Some(commission.min(cap))
}

/// Rate of the first tier whose bound covers `volume_before`.
fn tier_rate(tiers: &[RateTier], volume_before: Decimal) -> Decimal {
    tiers
        .iter()
        .find(|t| t.up_to.map_or(true, |bound| volume_before <= bound))
        .or_else(|| tiers.last())
        .map(|t| t.rate_per_share)
        .unwrap_or(Decimal::ZERO)
}

fn validate_tiers(tiers: &[RateTier]) -> Result<()> {
    let Some(last) = tiers.last() else {
        return Err(BacktestError::configuration(
            "pro_tiered requires at least one tier",
        ));
    };
    if last.up_to.is_some() {
        return Err(BacktestError::configuration(
            "last pro_tiered tier must be unbounded (omit up_to)",
        ));
    }

    let mut previous: Option<Decimal> = None;
    for tier in &tiers[..tiers.len() - 1] {
        let Some(bound) = tier.up_to else {
            return Err(BacktestError::configuration(
                "only the last pro_tiered tier may be unbounded",
            ));
        };
        if previous.is_some_and(|p| bound <= p) {
            return Err(BacktestError::configuration(format!(
                "pro_tiered thresholds must be strictly ascending (got {bound} after {})",
                previous.unwrap_or_default()
            )));
        }
        previous = Some(bound);
    }

    if tiers.iter().any(|t| t.rate_per_share < Decimal::ZERO) {
        return Err(BacktestError::configuration(
            "pro_tiered rates must not be negative",
        ));
    }
    Ok(())
}

/// Cost breakdown of a single leg.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegCost {
    pub commission: Decimal,
    pub slippage: Decimal,
    pub fees: Decimal,
}

impl LegCost {
    pub fn total(&self) -> Decimal {
        self.commission + self.slippage + self.fees
    }
}

/// Pricing plan plus per-share slippage and pass-through fees.
#[derive(Debug, Clone, PartialEq)]
pub struct CostModel {
    plan: PricingPlan,
    slippage_per_share: Decimal,
    fees_per_share: Decimal,
}

impl CostModel {
    pub fn new(plan: PricingPlan, slippage_per_share: Decimal, fees_per_share: Decimal) -> Self {
        Self {
            plan,
            slippage_per_share,
            fees_per_share,
        }
    }

    /// Build the model named by `config.plan`.
    ///
    /// An unknown plan identifier or a malformed tier table is a
    /// configuration error.
    pub fn from_config(config: &CostConfig) -> Result<Self> {
        let plan = match config.plan.trim().to_ascii_lowercase().as_str() {
            "pro_fixed" => PricingPlan::FixedRate {
                rate_per_share: config.pro_fixed.rate_per_share,
                min_per_order: config.pro_fixed.min_per_order,
                max_rate_of_trade: config.pro_fixed.max_rate_of_trade,
            },
            "pro_tiered" => {
                let tiers: Vec<RateTier> =
                    config.pro_tiered.tiers.iter().map(RateTier::from).collect();
                validate_tiers(&tiers)?;
                PricingPlan::Tiered {
                    tiers,
                    min_per_order: config.pro_tiered.min_per_order,
                    max_rate_of_trade: config.pro_tiered.max_rate_of_trade,
                }
            }
            "lite" => PricingPlan::Lite {
                rate_per_share: config.lite.rate_per_share,
                min_per_order: config.lite.min_per_order,
            },
            other => {
                return Err(BacktestError::configuration(format!(
                    "unknown pricing plan '{other}' (expected pro_fixed, pro_tiered or lite)"
                )))
            }
        };

        Ok(Self::new(
            plan,
            config.slippage_per_share,
            config.fees_per_share,
        ))
    }

    pub fn plan(&self) -> &PricingPlan {
        &self.plan
    }

    /// Cost of one leg given the month-to-date volume before it executes.
    ///
    /// Zero shares or a non-positive price cost nothing. `None` when any
    /// component, or their total, is out of decimal range.
    pub fn leg_cost(&self, shares: Decimal, price: Decimal, volume_before: Decimal) -> Option<LegCost> {
        if shares <= Decimal::ZERO || price <= Decimal::ZERO {
            return Some(LegCost::default());
        }

        let leg = LegCost {
            commission: self.plan.commission(shares, price, volume_before)?,
            slippage: self.slippage_per_share.checked_mul(shares)?,
            fees: self.fees_per_share.checked_mul(shares)?,
        };
        leg.commission
            .checked_add(leg.slippage)?
            .checked_add(leg.fees)?;
        Some(leg)
    }
}

/// Month-to-date traded shares, keyed by "YYYY-MM".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyVolume {
    by_month: BTreeMap<String, Decimal>,
}

impl MonthlyVolume {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shares traded so far in `month`.
    pub fn before(&self, month: &str) -> Decimal {
        self.by_month.get(month).copied().unwrap_or(Decimal::ZERO)
    }

    /// Add a leg's shares to `month`. Non-positive quantities are ignored.
    pub fn advance(&mut self, month: &str, shares: Decimal) {
        if shares <= Decimal::ZERO {
            return;
        }
        let total = self
            .by_month
            .entry(month.to_string())
            .or_insert(Decimal::ZERO);
        *total = total.saturating_add(shares);
    }

    pub fn months(&self) -> impl Iterator<Item = (&str, Decimal)> {
        self.by_month.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CostConfig;
    use rust_decimal_macros::dec;

    fn model(plan: &str) -> CostModel {
        let config = CostConfig {
            plan: plan.to_string(),
            ..CostConfig::default()
        };
        CostModel::from_config(&config).unwrap()
    }

    // =========================================================================
    // Plan Selection Tests
    // =========================================================================

    #[test]
    fn test_unknown_plan_is_configuration_error() {
        let config = CostConfig {
            plan: "platinum".to_string(),
            ..CostConfig::default()
        };
        let err = CostModel::from_config(&config).unwrap_err();
        assert!(matches!(err, BacktestError::Configuration(_)));
        assert!(err.to_string().contains("platinum"));
    }

    #[test]
    fn test_plan_names() {
        assert_eq!(model("pro_fixed").plan().name(), "pro_fixed");
        assert_eq!(model("PRO_TIERED").plan().name(), "pro_tiered");
        assert_eq!(model("lite").plan().name(), "lite");
    }

    // =========================================================================
    // Commission Tests
    // =========================================================================

    #[test]
    fn test_zero_shares_or_price_costs_nothing() {
        for plan in ["pro_fixed", "pro_tiered", "lite"] {
            let m = model(plan);
            assert_eq!(m.leg_cost(dec!(0), dec!(100), dec!(0)).unwrap().total(), Decimal::ZERO);
            assert_eq!(m.leg_cost(dec!(10), dec!(0), dec!(0)).unwrap().total(), Decimal::ZERO);
        }
    }

    #[test]
    fn test_fixed_minimum_then_cap() {
        let m = model("pro_fixed");
        // 1 share at $100: max(0.005, 1.00) = 1.00, cap 1% of 100 = 1.00
        assert_eq!(m.leg_cost(dec!(1), dec!(100), dec!(0)).unwrap().commission, dec!(1.00));
        // ~0.995 shares at $100.5: minimum $1 capped at 1% of ~$100
        let shares = dec!(100) / dec!(100.5);
        let c = m.leg_cost(shares, dec!(100.5), dec!(0)).unwrap().commission;
        assert_eq!(c, dec!(0.01) * dec!(100.5) * shares);
        // 1000 shares at $50: 5.00, well under the $500 cap
        assert_eq!(m.leg_cost(dec!(1000), dec!(50), dec!(0)).unwrap().commission, dec!(5.000));
    }

    #[test]
    fn test_cap_never_exceeded() {
        for plan in ["pro_fixed", "pro_tiered"] {
            let m = model(plan);
            for (shares, price) in [
                (dec!(0.5), dec!(3)),
                (dec!(1), dec!(100)),
                (dec!(250), dec!(0.8)),
                (dec!(10000), dec!(400)),
            ] {
                let c = m.leg_cost(shares, price, dec!(0)).unwrap().commission;
                assert!(c <= dec!(0.01) * price * shares, "{plan} {shares}@{price}");
            }
        }
    }

    #[test]
    fn test_lite_has_no_cap() {
        let m = model("lite");
        // 1 share at $0.10: max(0.002, 0.003) = 0.003 > 1% of $0.10
        let c = m.leg_cost(dec!(1), dec!(0.10), dec!(0)).unwrap().commission;
        assert_eq!(c, dec!(0.003));
        assert!(c > dec!(0.01) * dec!(0.10));
    }

    #[test]
    fn test_tiered_rate_drops_after_threshold() {
        let m = model("pro_tiered");
        let (shares, price) = (dec!(1000), dec!(50));

        let early = m.leg_cost(shares, price, dec!(0)).unwrap().commission;
        let at_bound = m.leg_cost(shares, price, dec!(300000)).unwrap().commission;
        let later = m.leg_cost(shares, price, dec!(300001)).unwrap().commission;

        assert_eq!(early, dec!(3.5));
        assert_eq!(at_bound, early);
        assert_eq!(later, dec!(2.0));
        assert!(later < early);
    }

    #[test]
    fn test_tiered_unbounded_tier() {
        let m = model("pro_tiered");
        let c = m.leg_cost(dec!(10000), dec!(50), dec!(500000000)).unwrap().commission;
        assert_eq!(c, dec!(5.0));
    }

    #[test]
    fn test_tiered_rate_advances_within_month() {
        let m = model("pro_tiered");
        let mut volume = MonthlyVolume::new();
        let month = "2024-03";
        let (shares, price) = (dec!(200000), dec!(50));

        let first = m.leg_cost(shares, price, volume.before(month)).unwrap();
        volume.advance(month, shares);
        let second = m.leg_cost(shares, price, volume.before(month)).unwrap();
        volume.advance(month, shares);
        let third = m.leg_cost(shares, price, volume.before(month)).unwrap();

        // 200k and then 400k month-to-date
        assert_eq!(first.commission, dec!(700));
        assert_eq!(second.commission, dec!(700));
        assert_eq!(third.commission, dec!(400));
    }

    #[test]
    fn test_slippage_and_fees_added() {
        let config = CostConfig {
            plan: "lite".to_string(),
            slippage_per_share: dec!(0.01),
            fees_per_share: dec!(0.002),
            ..CostConfig::default()
        };
        let m = CostModel::from_config(&config).unwrap();
        let leg = m.leg_cost(dec!(100), dec!(20), dec!(0)).unwrap();
        assert_eq!(leg.commission, dec!(0.2));
        assert_eq!(leg.slippage, dec!(1));
        assert_eq!(leg.fees, dec!(0.2));
        assert_eq!(leg.total(), dec!(1.4));
    }

    #[test]
    fn test_out_of_range_leg_is_none() {
        let m = model("pro_fixed");
        // Trade value for the cap does not fit in a Decimal
        let huge = Decimal::MAX / dec!(10);
        assert!(m.leg_cost(huge, huge, dec!(0)).is_none());
        assert!(m.leg_cost(dec!(10), dec!(100), dec!(0)).is_some());
    }

    // =========================================================================
    // Tier Table Validation Tests
    // =========================================================================

    #[test]
    fn test_tier_table_validation() {
        let mut config = CostConfig {
            plan: "pro_tiered".to_string(),
            ..CostConfig::default()
        };

        config.pro_tiered.tiers = vec![
            TierConfig {
                up_to: Some(dec!(1000)),
                rate_per_share: dec!(0.003),
            },
            TierConfig {
                up_to: Some(dec!(500)),
                rate_per_share: dec!(0.002),
            },
            TierConfig {
                up_to: None,
                rate_per_share: dec!(0.001),
            },
        ];
        assert!(CostModel::from_config(&config).is_err());

        config.pro_tiered.tiers = vec![TierConfig {
            up_to: Some(dec!(1000)),
            rate_per_share: dec!(0.003),
        }];
        assert!(CostModel::from_config(&config).is_err());

        config.pro_tiered.tiers = vec![];
        assert!(CostModel::from_config(&config).is_err());

        config.pro_tiered.tiers = vec![TierConfig {
            up_to: None,
            rate_per_share: dec!(0.003),
        }];
        assert!(CostModel::from_config(&config).is_ok());
    }

    // =========================================================================
    // Monthly Volume Tests
    // =========================================================================

    #[test]
    fn test_monthly_volume_is_per_month() {
        let mut volume = MonthlyVolume::new();
        volume.advance("2024-01", dec!(10));
        volume.advance("2024-01", dec!(5.5));
        volume.advance("2024-02", dec!(3));
        volume.advance("2024-02", dec!(0));

        assert_eq!(volume.before("2024-01"), dec!(15.5));
        assert_eq!(volume.before("2024-02"), dec!(3));
        assert_eq!(volume.before("2024-03"), Decimal::ZERO);
        assert_eq!(volume.months().count(), 2);
    }
}
