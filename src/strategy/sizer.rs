//! Position sizing from available equity.

use crate::config::CapitalConfig;
use rust_decimal::Decimal;
use tracing::debug;

/// Result of sizing a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeDecision {
    /// Tradeable share quantity (> 0)
    Shares(Decimal),
    /// Quantity below the tradeable minimum; the session is skipped
    TooSmall,
    /// Quantity does not fit in a `Decimal` (e.g. a near-zero price)
    OutOfRange,
}

impl SizeDecision {
    pub fn shares(&self) -> Decimal {
        match self {
            SizeDecision::Shares(q) => *q,
            SizeDecision::TooSmall | SizeDecision::OutOfRange => Decimal::ZERO,
        }
    }
}

/// Converts equity into a share quantity.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    allocation_fraction: Decimal,
    fractional_shares: bool,
    min_fractional_shares: Decimal,
}

impl PositionSizer {
    pub fn new(
        allocation_fraction: Decimal,
        fractional_shares: bool,
        min_fractional_shares: Decimal,
    ) -> Self {
        Self {
            allocation_fraction,
            fractional_shares,
            min_fractional_shares,
        }
    }

    pub fn from_config(config: &CapitalConfig) -> Self {
        Self::new(
            config.allocation_fraction,
            config.fractional_shares,
            config.min_fractional_shares,
        )
    }

    /// Raw share quantity for `equity` at `entry_price`, before lot rules.
    ///
    /// Non-positive deployable dollars or price yield zero; `None` when the
    /// quantity overflows.
    pub fn raw_shares(&self, equity: Decimal, entry_price: Decimal) -> Option<Decimal> {
        let dollars = equity.checked_mul(self.allocation_fraction)?;
        if dollars <= Decimal::ZERO || entry_price <= Decimal::ZERO {
            return Some(Decimal::ZERO);
        }
        dollars.checked_div(entry_price)
    }

    /// Size a position.
    ///
    /// Fractional mode vetoes quantities under the minimum lot; whole-share
    /// mode truncates and vetoes a zero result.
    pub fn size(&self, equity: Decimal, entry_price: Decimal) -> SizeDecision {
        let Some(raw) = self.raw_shares(equity, entry_price) else {
            debug!(%equity, %entry_price, "Position size out of decimal range");
            return SizeDecision::OutOfRange;
        };

        let shares = if self.fractional_shares {
            if raw < self.min_fractional_shares || raw.is_zero() {
                debug!(%equity, %entry_price, %raw, "Position below minimum fractional lot");
                return SizeDecision::TooSmall;
            }
            raw
        } else {
            raw.trunc()
        };

        if shares <= Decimal::ZERO {
            debug!(%equity, %entry_price, %raw, "Position rounds to zero whole shares");
            return SizeDecision::TooSmall;
        }

        SizeDecision::Shares(shares)
    }

    pub fn allocation_fraction(&self) -> Decimal {
        self.allocation_fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fractional() -> PositionSizer {
        PositionSizer::new(dec!(1), true, dec!(0.0001))
    }

    #[test]
    fn test_fractional_full_allocation() {
        let sizer = fractional();
        assert_eq!(sizer.size(dec!(100), dec!(50)), SizeDecision::Shares(dec!(2)));
        assert_eq!(
            sizer.size(dec!(105), dec!(100.5)).shares(),
            dec!(105) / dec!(100.5)
        );
    }

    #[test]
    fn test_partial_allocation() {
        let sizer = PositionSizer::new(dec!(0.5), true, dec!(0.0001));
        assert_eq!(sizer.size(dec!(100), dec!(10)), SizeDecision::Shares(dec!(5)));
    }

    #[test]
    fn test_fractional_below_minimum_vetoed() {
        let sizer = fractional();
        // 0.01 / 1000 = 0.00001 < 0.0001
        assert_eq!(sizer.size(dec!(0.01), dec!(1000)), SizeDecision::TooSmall);
    }

    #[test]
    fn test_whole_shares_truncate() {
        let sizer = PositionSizer::new(dec!(1), false, dec!(0.0001));
        assert_eq!(sizer.size(dec!(1000), dec!(376.55)), SizeDecision::Shares(dec!(2)));
    }

    #[test]
    fn test_whole_shares_zero_vetoed() {
        let sizer = PositionSizer::new(dec!(1), false, dec!(0.0001));
        assert_eq!(sizer.size(dec!(100), dec!(376.55)), SizeDecision::TooSmall);
    }

    #[test]
    fn test_non_positive_inputs() {
        let sizer = fractional();
        assert_eq!(sizer.raw_shares(dec!(100), dec!(0)), Some(Decimal::ZERO));
        assert_eq!(sizer.raw_shares(dec!(-5), dec!(100)), Some(Decimal::ZERO));
        assert_eq!(sizer.size(dec!(-5), dec!(100)), SizeDecision::TooSmall);
    }

    #[test]
    fn test_tiny_price_is_out_of_range() {
        let sizer = fractional();
        let price = Decimal::new(1, 28);
        assert_eq!(sizer.raw_shares(dec!(100), price), None);
        assert_eq!(sizer.size(dec!(100), price), SizeDecision::OutOfRange);
        assert_eq!(sizer.size(dec!(100), price).shares(), Decimal::ZERO);
    }
}
