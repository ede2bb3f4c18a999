//! Per-session direction signal from the opening reference bar.

use crate::backtest::{Bar, Session};
use crate::config::SessionTimes;
use crate::error::{BacktestError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade direction for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Long,
    Short,
    Skip,
}

impl Signal {
    /// +1 for long, -1 for short, 0 for skip.
    pub fn direction(&self) -> Decimal {
        match self {
            Signal::Long => Decimal::ONE,
            Signal::Short => Decimal::NEGATIVE_ONE,
            Signal::Skip => Decimal::ZERO,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Long => "long",
            Signal::Short => "short",
            Signal::Skip => "skip",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How `open == close` on the reference bar is decided.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DojiPolicy {
    /// Bit-for-bit equality.
    Exact,
    /// `|close - open| <= rel_tolerance * max(|open|, |close|)`.
    Tolerant { rel_tolerance: Decimal },
}

impl Default for DojiPolicy {
    fn default() -> Self {
        DojiPolicy::Tolerant {
            rel_tolerance: Decimal::new(1, 9),
        }
    }
}

impl DojiPolicy {
    pub fn is_doji(&self, open: Decimal, close: Decimal) -> bool {
        match *self {
            DojiPolicy::Exact => open == close,
            DojiPolicy::Tolerant { rel_tolerance } => {
                (close - open).abs() <= rel_tolerance * open.abs().max(close.abs())
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            DojiPolicy::Tolerant { rel_tolerance } if rel_tolerance < Decimal::ZERO => Err(
                BacktestError::configuration("doji rel_tolerance must not be negative"),
            ),
            _ => Ok(()),
        }
    }
}

/// Why a session produced no trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Reference, entry or exit-deadline bar absent
    MissingBars,
    /// Reference bar closed where it opened
    Doji,
    /// Sized quantity below the tradeable minimum
    PositionTooSmall,
    /// Range-multiple bracket with zero width
    ZeroRange,
    /// Size, levels or P&L do not fit in a `Decimal`
    NumericOverflow,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingBars => "missing_bars",
            SkipReason::Doji => "doji",
            SkipReason::PositionTooSmall => "position_too_small",
            SkipReason::ZeroRange => "zero_range",
            SkipReason::NumericOverflow => "numeric_overflow",
        }
    }

    pub fn note(&self) -> &'static str {
        match self {
            SkipReason::MissingBars => "Missing reference/entry/exit bar",
            SkipReason::Doji => "Doji reference bar",
            SkipReason::PositionTooSmall => "Equity too small for minimum lot",
            SkipReason::ZeroRange => "Reference bar has zero range",
            SkipReason::NumericOverflow => "Prices out of decimal range",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three bars a session needs for a trade.
#[derive(Debug, Clone, Copy)]
pub struct SessionBars<'a> {
    pub reference: &'a Bar,
    pub entry: &'a Bar,
    pub deadline: &'a Bar,
}

/// Outcome of signal evaluation for one session.
#[derive(Debug, Clone, Copy)]
pub enum SignalOutcome<'a> {
    Trade {
        signal: Signal,
        bars: SessionBars<'a>,
    },
    Skip {
        reason: SkipReason,
        /// Reference bar, when present (kept for reporting)
        reference: Option<&'a Bar>,
    },
}

impl SignalOutcome<'_> {
    pub fn signal(&self) -> Signal {
        match self {
            SignalOutcome::Trade { signal, .. } => *signal,
            SignalOutcome::Skip { .. } => Signal::Skip,
        }
    }
}

/// Derives the session signal from the configured reference bar.
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    times: SessionTimes,
    doji: DojiPolicy,
}

impl SignalGenerator {
    pub fn new(times: SessionTimes, doji: DojiPolicy) -> Self {
        Self { times, doji }
    }

    /// Green reference bar → long, red → short, doji or missing bars → skip.
    pub fn evaluate<'a>(&self, session: &'a Session) -> SignalOutcome<'a> {
        let reference = session.bar_at(&self.times.reference);
        let entry = session.bar_at(&self.times.entry);
        let deadline = session.bar_at(&self.times.exit);

        let (Some(reference), Some(entry), Some(deadline)) = (reference, entry, deadline) else {
            return SignalOutcome::Skip {
                reason: SkipReason::MissingBars,
                reference,
            };
        };

        let (open, close) = (reference.open, reference.close);
        if self.doji.is_doji(open, close) {
            return SignalOutcome::Skip {
                reason: SkipReason::Doji,
                reference: Some(reference),
            };
        }

        let signal = if close > open {
            Signal::Long
        } else {
            Signal::Short
        };

        SignalOutcome::Trade {
            signal,
            bars: SessionBars {
                reference,
                entry,
                deadline,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;

    // =========================================================================
    // Test Helpers
    // =========================================================================

    fn times() -> SessionTimes {
        SessionTimes {
            reference: "09:30".to_string(),
            entry: "09:45".to_string(),
            exit: "11:30".to_string(),
            timezone: chrono_tz::America::New_York,
        }
    }

    fn bar(label: &str, minute_offset: i64, open: Decimal, close: Decimal) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap()
                + chrono::Duration::minutes(minute_offset),
            day: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            time_label: label.to_string(),
            open,
            high: open.max(close) + dec!(0.5),
            low: open.min(close) - dec!(0.5),
            close,
            volume: Decimal::ZERO,
        }
    }

    fn session(open: Decimal, close: Decimal) -> Session {
        Session {
            day: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            bars: vec![
                bar("09:30", 0, open, close),
                bar("09:45", 15, dec!(100.5), dec!(100.5)),
                bar("11:30", 120, dec!(101), dec!(101.2)),
            ],
        }
    }

    // =========================================================================
    // Signal Direction Tests
    // =========================================================================

    #[test]
    fn test_green_bar_is_long() {
        let gen = SignalGenerator::new(times(), DojiPolicy::Exact);
        let s = session(dec!(100), dec!(101));
        let outcome = gen.evaluate(&s);
        assert_eq!(outcome.signal(), Signal::Long);
    }

    #[test]
    fn test_red_bar_is_short() {
        let gen = SignalGenerator::new(times(), DojiPolicy::Exact);
        let s = session(dec!(101), dec!(100));
        assert_eq!(gen.evaluate(&s).signal(), Signal::Short);
    }

    #[test]
    fn test_exact_doji_skips() {
        let gen = SignalGenerator::new(times(), DojiPolicy::Exact);
        let s = session(dec!(100), dec!(100));
        match gen.evaluate(&s) {
            SignalOutcome::Skip { reason, reference } => {
                assert_eq!(reason, SkipReason::Doji);
                assert!(reference.is_some());
            }
            other => panic!("expected doji skip, got {other:?}"),
        }
    }

    #[test]
    fn test_doji_policies_differ_on_near_equality() {
        let open = dec!(100);
        let close = dec!(100.00000001);

        // Exact comparison sees a green bar
        let exact = SignalGenerator::new(times(), DojiPolicy::Exact);
        assert_eq!(exact.evaluate(&session(open, close)).signal(), Signal::Long);

        // Relative tolerance 1e-9 * 100 = 1e-7 swallows the 1e-8 difference
        let tolerant = SignalGenerator::new(times(), DojiPolicy::default());
        assert_eq!(
            tolerant.evaluate(&session(open, close)).signal(),
            Signal::Skip
        );
    }

    #[test]
    fn test_missing_entry_bar_skips() {
        let gen = SignalGenerator::new(times(), DojiPolicy::Exact);
        let mut s = session(dec!(100), dec!(101));
        s.bars.retain(|b| b.time_label != "09:45");

        match gen.evaluate(&s) {
            SignalOutcome::Skip { reason, .. } => assert_eq!(reason, SkipReason::MissingBars),
            other => panic!("expected missing bars skip, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_reference_bar_skips_without_reference() {
        let gen = SignalGenerator::new(times(), DojiPolicy::Exact);
        let mut s = session(dec!(100), dec!(101));
        s.bars.retain(|b| b.time_label != "09:30");

        match gen.evaluate(&s) {
            SignalOutcome::Skip { reason, reference } => {
                assert_eq!(reason, SkipReason::MissingBars);
                assert!(reference.is_none());
            }
            other => panic!("expected missing bars skip, got {other:?}"),
        }
    }

    #[test]
    fn test_direction_sign() {
        assert_eq!(Signal::Long.direction(), dec!(1));
        assert_eq!(Signal::Short.direction(), dec!(-1));
        assert_eq!(Signal::Skip.direction(), dec!(0));
    }

    #[test]
    fn test_negative_tolerance_rejected() {
        let policy = DojiPolicy::Tolerant {
            rel_tolerance: dec!(-0.1),
        };
        assert!(policy.validate().is_err());
        assert!(DojiPolicy::Exact.validate().is_ok());
    }
}
