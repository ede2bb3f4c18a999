//! Intrabar stop / target simulation with a scheduled time exit.
//!
//! A position opens at the entry bar's close. Bars strictly after the entry
//! bar, up to and including the exit-deadline bar, are scanned in order; the
//! first bar that touches the target or the stop closes the position at that
//! level. Otherwise the position closes at the deadline bar's close.

use crate::backtest::{Bar, Session};
use crate::error::{BacktestError, Result};
use crate::strategy::{Signal, SkipReason};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stop / target placement policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitPolicy {
    /// Stop at `entry * (1 ∓ stop_pct)`, optional target at `entry * (1 ± target_pct)`.
    Percentage {
        stop_pct: Decimal,
        #[serde(default)]
        target_pct: Option<Decimal>,
    },
    /// Stop at `entry ∓ stop_points`, optional target at `entry ± target_points`.
    FixedPoints {
        stop_points: Decimal,
        #[serde(default)]
        target_points: Option<Decimal>,
    },
    /// Bracket sized by the reference bar's high-low range.
    RangeMultiple {
        stop_multiple: Decimal,
        target_multiple: Decimal,
    },
}

impl Default for ExitPolicy {
    fn default() -> Self {
        ExitPolicy::Percentage {
            stop_pct: Decimal::new(5, 3), // 0.5%
            target_pct: None,
        }
    }
}

impl ExitPolicy {
    pub fn validate(&self) -> Result<()> {
        let (stop, target) = match self {
            ExitPolicy::Percentage {
                stop_pct,
                target_pct,
            } => (*stop_pct, *target_pct),
            ExitPolicy::FixedPoints {
                stop_points,
                target_points,
            } => (*stop_points, *target_points),
            ExitPolicy::RangeMultiple {
                stop_multiple,
                target_multiple,
            } => (*stop_multiple, Some(*target_multiple)),
        };

        if stop <= Decimal::ZERO {
            return Err(BacktestError::configuration(format!(
                "stop size must be positive, got {stop}"
            )));
        }
        if let Some(target) = target {
            if target <= Decimal::ZERO {
                return Err(BacktestError::configuration(format!(
                    "target size must be positive, got {target}"
                )));
            }
        }
        Ok(())
    }

    /// Short description for reports, e.g. "percentage(stop=0.005)".
    pub fn describe(&self) -> String {
        match self {
            ExitPolicy::Percentage {
                stop_pct,
                target_pct: Some(t),
            } => format!("percentage(stop={stop_pct}, target={t})"),
            ExitPolicy::Percentage { stop_pct, .. } => format!("percentage(stop={stop_pct})"),
            ExitPolicy::FixedPoints {
                stop_points,
                target_points: Some(t),
            } => format!("fixed_points(stop={stop_points}, target={t})"),
            ExitPolicy::FixedPoints { stop_points, .. } => {
                format!("fixed_points(stop={stop_points})")
            }
            ExitPolicy::RangeMultiple {
                stop_multiple,
                target_multiple,
            } => format!("range_multiple(stop={stop_multiple}x, target={target_multiple}x)"),
        }
    }
}

/// Price levels that close a position early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitLevels {
    pub stop: Decimal,
    pub target: Option<Decimal>,
}

/// Why a position closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopHit,
    TargetHit,
    TimeExit,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopHit => "stop_hit",
            ExitReason::TargetHit => "target_hit",
            ExitReason::TimeExit => "time_exit",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and why a position closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitFill {
    pub price: Decimal,
    pub time_label: String,
    pub reason: ExitReason,
}

/// Exit simulation parameterized by an [`ExitPolicy`].
#[derive(Debug, Clone)]
pub struct ExitSimulator {
    policy: ExitPolicy,
}

impl ExitSimulator {
    pub fn new(policy: ExitPolicy) -> Self {
        Self { policy }
    }

    /// Compute stop / target levels for a position.
    ///
    /// A range-multiple bracket on a reference bar with no range, or a skip
    /// signal (no direction), is `ZeroRange`; levels outside the decimal
    /// range are `NumericOverflow`.
    pub fn levels(
        &self,
        signal: Signal,
        entry_price: Decimal,
        reference: &Bar,
    ) -> std::result::Result<ExitLevels, SkipReason> {
        let dir = match signal {
            Signal::Skip => return Err(SkipReason::ZeroRange),
            other => other.direction(),
        };

        let levels = match &self.policy {
            ExitPolicy::Percentage {
                stop_pct,
                target_pct,
            } => ExitLevels {
                stop: scaled(entry_price, -dir * stop_pct)?,
                target: target_pct.map(|t| scaled(entry_price, dir * t)).transpose()?,
            },
            ExitPolicy::FixedPoints {
                stop_points,
                target_points,
            } => ExitLevels {
                stop: offset(entry_price, -dir * stop_points)?,
                target: target_points.map(|t| offset(entry_price, dir * t)).transpose()?,
            },
            ExitPolicy::RangeMultiple {
                stop_multiple,
                target_multiple,
            } => {
                let range = reference
                    .high
                    .checked_sub(reference.low)
                    .ok_or(SkipReason::NumericOverflow)?;
                if range <= Decimal::ZERO {
                    return Err(SkipReason::ZeroRange);
                }
                let width = |multiple: Decimal| {
                    multiple
                        .checked_mul(range)
                        .ok_or(SkipReason::NumericOverflow)
                };
                ExitLevels {
                    stop: offset(entry_price, -dir * width(*stop_multiple)?)?,
                    target: Some(offset(entry_price, dir * width(*target_multiple)?)?),
                }
            }
        };

        Ok(levels)
    }

    /// Scan the session window for a breach; fall back to the deadline close.
    ///
    /// When a bar touches both levels, the target wins.
    pub fn simulate(
        &self,
        signal: Signal,
        levels: ExitLevels,
        session: &Session,
        entry: &Bar,
        deadline: &Bar,
    ) -> ExitFill {
        for bar in session.window(entry, deadline) {
            if let Some(reason) = breach(signal, &levels, bar) {
                let price = match reason {
                    ExitReason::TargetHit => levels.target.unwrap_or(levels.stop),
                    _ => levels.stop,
                };
                return ExitFill {
                    price,
                    time_label: bar.time_label.clone(),
                    reason,
                };
            }
        }

        ExitFill {
            price: deadline.close,
            time_label: deadline.time_label.clone(),
            reason: ExitReason::TimeExit,
        }
    }
}

/// `price * (1 + fraction)`.
fn scaled(price: Decimal, fraction: Decimal) -> std::result::Result<Decimal, SkipReason> {
    Decimal::ONE
        .checked_add(fraction)
        .and_then(|factor| factor.checked_mul(price))
        .ok_or(SkipReason::NumericOverflow)
}

/// `price + points`.
fn offset(price: Decimal, points: Decimal) -> std::result::Result<Decimal, SkipReason> {
    price.checked_add(points).ok_or(SkipReason::NumericOverflow)
}

fn breach(signal: Signal, levels: &ExitLevels, bar: &Bar) -> Option<ExitReason> {
    match signal {
        Signal::Long => {
            if levels.target.is_some_and(|t| bar.high >= t) {
                Some(ExitReason::TargetHit)
            } else if bar.low <= levels.stop {
                Some(ExitReason::StopHit)
            } else {
                None
            }
        }
        Signal::Short => {
            if levels.target.is_some_and(|t| bar.low <= t) {
                Some(ExitReason::TargetHit)
            } else if bar.high >= levels.stop {
                Some(ExitReason::StopHit)
            } else {
                None
            }
        }
        Signal::Skip => None,
    }
}
