//! Summary statistics over a backtest ledger.
//!
//! Provides win/loss counts, compounded return, drawdown analysis and the
//! distribution moments of per-session P&L. Statistics that are undefined
//! for the observed sample (no trades, too few values) are `None`.

use crate::backtest::engine::TradeRecord;
use crate::strategy::{ExitReason, Signal, SkipReason};
use crate::utils::decimal::{from_f64, mean, median, ratio, to_f64, to_percent};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Location and shape of a sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub count: usize,
    pub mean: Option<Decimal>,
    pub median: Option<Decimal>,
    /// Sample standard deviation (n > 1)
    pub std_dev: Option<Decimal>,
    /// Adjusted Fisher-Pearson skewness (n > 2)
    pub skewness: Option<Decimal>,
    /// Bias-corrected excess kurtosis (n > 3)
    pub excess_kurtosis: Option<Decimal>,
}

impl Distribution {
    pub fn from_values(values: &[Decimal]) -> Self {
        let samples: Vec<f64> = values.iter().map(|v| to_f64(*v)).collect();
        let moments = Moments::of(&samples);

        Self {
            count: values.len(),
            mean: mean(values),
            median: median(values),
            std_dev: moments.as_ref().and_then(|m| from_f64(m.std_dev)),
            skewness: moments.as_ref().and_then(|m| m.skewness()).and_then(from_f64),
            excess_kurtosis: moments
                .as_ref()
                .and_then(|m| m.excess_kurtosis())
                .and_then(from_f64),
        }
    }
}

/// Central moments of an f64 sample with at least two values.
struct Moments {
    n: f64,
    std_dev: f64,
    /// Sum of standardized cubes
    z3: f64,
    /// Sum of standardized fourth powers
    z4: f64,
}

impl Moments {
    fn of(samples: &[f64]) -> Option<Self> {
        if samples.len() < 2 {
            return None;
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let std_dev = variance.sqrt();

        let (z3, z4) = if std_dev < 1e-12 {
            (0.0, 0.0)
        } else {
            samples.iter().fold((0.0, 0.0), |(s3, s4), x| {
                let z = (x - mean) / std_dev;
                (s3 + z.powi(3), s4 + z.powi(4))
            })
        };

        Some(Self { n, std_dev, z3, z4 })
    }

    fn skewness(&self) -> Option<f64> {
        let n = self.n;
        if n < 3.0 {
            return None;
        }
        Some(n / ((n - 1.0) * (n - 2.0)) * self.z3)
    }

    fn excess_kurtosis(&self) -> Option<f64> {
        let n = self.n;
        if n < 4.0 {
            return None;
        }
        if self.z4 == 0.0 {
            return Some(0.0);
        }
        let scale = n * (n + 1.0) / ((n - 1.0) * (n - 2.0) * (n - 3.0));
        let correction = 3.0 * (n - 1.0).powi(2) / ((n - 2.0) * (n - 3.0));
        Some(scale * self.z4 - correction)
    }
}

/// Backtest summary statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    // Activity
    pub sessions: usize,
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Wins / trades, in percent
    pub win_rate_pct: Option<Decimal>,

    // Returns
    pub starting_equity: Decimal,
    pub ending_equity: Decimal,
    /// ending / starting - 1
    pub total_return: Option<Decimal>,
    /// min over time of equity / running peak - 1 (always <= 0)
    pub max_drawdown: Option<Decimal>,

    // Exits
    pub stops_hit: usize,
    pub targets_hit: usize,
    pub stop_hit_pct: Option<Decimal>,

    // Costs
    pub total_costs: Decimal,

    // Distributions
    pub net_pnl: Distribution,
    pub gross_points: Distribution,
    pub long_mean_net_pnl: Option<Decimal>,
    pub short_mean_net_pnl: Option<Decimal>,

    // Skips
    pub sessions_skipped: usize,
    pub skipped_missing_bars: usize,
    pub skipped_doji: usize,
    pub skipped_position_too_small: usize,
    pub skipped_zero_range: usize,
    pub skipped_numeric_overflow: usize,
}

impl Summary {
    /// Aggregate a ledger produced from `starting_equity`.
    pub fn from_ledger(ledger: &[TradeRecord], starting_equity: Decimal) -> Self {
        let trades: Vec<&TradeRecord> = ledger.iter().filter(|r| r.is_trade()).collect();
        let n = trades.len();

        let wins = trades.iter().filter(|r| r.net_pnl > Decimal::ZERO).count();
        let losses = trades.iter().filter(|r| r.net_pnl < Decimal::ZERO).count();
        let exits = |reason: ExitReason| {
            trades
                .iter()
                .filter(|r| r.exit_reason == Some(reason))
                .count()
        };
        let stops_hit = exits(ExitReason::StopHit);
        let targets_hit = exits(ExitReason::TargetHit);

        let skipped = |reason: SkipReason| {
            ledger
                .iter()
                .filter(|r| r.skip_reason == Some(reason))
                .count()
        };

        let net: Vec<Decimal> = trades.iter().map(|r| r.net_pnl).collect();
        let points: Vec<Decimal> = trades.iter().map(|r| r.gross_points).collect();
        let side_mean = |signal: Signal| {
            let values: Vec<Decimal> = trades
                .iter()
                .filter(|r| r.signal == signal)
                .map(|r| r.net_pnl)
                .collect();
            mean(&values)
        };

        let ending_equity = ledger
            .last()
            .map(|r| r.ending_equity)
            .unwrap_or(starting_equity);
        let count = Decimal::from(n);

        Self {
            sessions: ledger.len(),
            trades: n,
            wins,
            losses,
            win_rate_pct: ratio(Decimal::from(wins), count).map(to_percent),
            starting_equity,
            ending_equity,
            total_return: if n == 0 {
                None
            } else {
                ratio(ending_equity, starting_equity).map(|r| r - Decimal::ONE)
            },
            max_drawdown: if n == 0 {
                None
            } else {
                Some(max_drawdown(ledger))
            },
            stops_hit,
            targets_hit,
            stop_hit_pct: ratio(Decimal::from(stops_hit), count).map(to_percent),
            total_costs: trades.iter().map(|r| r.total_cost).sum(),
            net_pnl: Distribution::from_values(&net),
            gross_points: Distribution::from_values(&points),
            long_mean_net_pnl: side_mean(Signal::Long),
            short_mean_net_pnl: side_mean(Signal::Short),
            sessions_skipped: ledger.len() - n,
            skipped_missing_bars: skipped(SkipReason::MissingBars),
            skipped_doji: skipped(SkipReason::Doji),
            skipped_position_too_small: skipped(SkipReason::PositionTooSmall),
            skipped_zero_range: skipped(SkipReason::ZeroRange),
            skipped_numeric_overflow: skipped(SkipReason::NumericOverflow),
        }
    }

    /// Format the summary as a console report.
    pub fn render(&self) -> String {
        format!(
            r#"═══════════════════════════════════════════════
BACKTEST SUMMARY ({} sessions)
═══════════════════════════════════════════════
RETURNS
  Starting Equity:   ${:.2}
  Ending Equity:     ${:.2}
  Total Return:      {}
  Max Drawdown:      {}

ACTIVITY
  Trades:            {}
  Wins / Losses:     {} / {}
  Win Rate:          {}
  Stops Hit:         {} ({})
  Targets Hit:       {}
  Total Costs:       ${:.2}

NET P&L PER TRADE
  Mean / Median:     {} / {}
  Std Dev:           {}
  Skew / Kurtosis:   {} / {}
  Long / Short Mean: {} / {}

SKIPPED SESSIONS     {}
  Missing Bars:      {}
  Doji:              {}
  Too Small:         {}
  Zero Range:        {}
  Out of Range:      {}
═══════════════════════════════════════════════"#,
            self.sessions,
            self.starting_equity,
            self.ending_equity,
            fmt_pct(self.total_return.map(to_percent)),
            fmt_pct(self.max_drawdown.map(to_percent)),
            self.trades,
            self.wins,
            self.losses,
            fmt_pct(self.win_rate_pct),
            self.stops_hit,
            fmt_pct(self.stop_hit_pct),
            self.targets_hit,
            self.total_costs,
            fmt_num(self.net_pnl.mean),
            fmt_num(self.net_pnl.median),
            fmt_num(self.net_pnl.std_dev),
            fmt_num(self.net_pnl.skewness),
            fmt_num(self.net_pnl.excess_kurtosis),
            fmt_num(self.long_mean_net_pnl),
            fmt_num(self.short_mean_net_pnl),
            self.sessions_skipped,
            self.skipped_missing_bars,
            self.skipped_doji,
            self.skipped_position_too_small,
            self.skipped_zero_range,
            self.skipped_numeric_overflow,
        )
    }
}

fn fmt_pct(value: Option<Decimal>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}%"))
}

fn fmt_num(value: Option<Decimal>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.4}"))
}

/// Deepest fall of the equity curve below its running peak, as a fraction.
///
/// The curve is the ledger's ending equity per session (skipped sessions
/// carry equity forward), so the peak starts at the first session's close,
/// not at the starting equity. Points under a non-positive peak are ignored.
fn max_drawdown(ledger: &[TradeRecord]) -> Decimal {
    let mut peak: Option<Decimal> = None;
    let mut worst = Decimal::ZERO;

    for equity in ledger.iter().map(|r| r.ending_equity) {
        let high = peak.map_or(equity, |p| p.max(equity));
        peak = Some(high);
        if let Some(dd) = ratio(equity, high).filter(|_| high > Decimal::ZERO) {
            worst = worst.min(dd - Decimal::ONE);
        }
    }

    worst
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    // =========================================================================
    // Test Helpers
    // =========================================================================

    fn trade(day: u32, signal: Signal, net: Decimal, start: Decimal, reason: ExitReason) -> TradeRecord {
        TradeRecord {
            day: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            month: "2024-01".to_string(),
            signal,
            ref_open: Some(dec!(100)),
            ref_close: Some(dec!(101)),
            entry_time: Some("09:45".to_string()),
            entry_price: Some(dec!(100)),
            exit_time: Some("11:30".to_string()),
            exit_price: Some(dec!(100) + net),
            exit_reason: Some(reason),
            skip_reason: None,
            shares: dec!(1),
            stop_level: Some(dec!(99.5)),
            target_level: None,
            gross_points: signal.direction() * net,
            gross_return: None,
            gross_pnl: net,
            entry_cost: Decimal::ZERO,
            exit_cost: Decimal::ZERO,
            total_cost: Decimal::ZERO,
            net_pnl: net,
            net_return: None,
            starting_equity: start,
            ending_equity: start + net,
            note: String::new(),
        }
    }

    fn skip(day: u32, reason: SkipReason, equity: Decimal) -> TradeRecord {
        TradeRecord {
            signal: Signal::Skip,
            exit_reason: None,
            skip_reason: Some(reason),
            shares: Decimal::ZERO,
            gross_points: Decimal::ZERO,
            gross_pnl: Decimal::ZERO,
            net_pnl: Decimal::ZERO,
            ending_equity: equity,
            ..trade(day, Signal::Long, Decimal::ZERO, equity, ExitReason::TimeExit)
        }
    }

    /// Chain net P&L values into a compounding ledger.
    fn ledger(nets: &[Decimal]) -> Vec<TradeRecord> {
        let mut equity = dec!(100);
        nets.iter()
            .enumerate()
            .map(|(i, net)| {
                let row = trade(i as u32 + 1, Signal::Long, *net, equity, ExitReason::TimeExit);
                equity += net;
                row
            })
            .collect()
    }

    // =========================================================================
    // Aggregate Tests
    // =========================================================================

    #[test]
    fn test_zero_trades_undefined() {
        let rows = vec![skip(2, SkipReason::Doji, dec!(100))];
        let summary = Summary::from_ledger(&rows, dec!(100));

        assert_eq!(summary.trades, 0);
        assert_eq!(summary.sessions_skipped, 1);
        assert_eq!(summary.skipped_doji, 1);
        assert_eq!(summary.win_rate_pct, None);
        assert_eq!(summary.max_drawdown, None);
        assert_eq!(summary.total_return, None);
        assert_eq!(summary.stop_hit_pct, None);
        assert_eq!(summary.net_pnl.mean, None);
        assert_eq!(summary.ending_equity, dec!(100));
    }

    #[test]
    fn test_counts_and_rates() {
        let mut rows = ledger(&[dec!(5), dec!(-2), dec!(0), dec!(3)]);
        rows[1].exit_reason = Some(ExitReason::StopHit);
        rows.push(skip(9, SkipReason::MissingBars, dec!(106)));

        let summary = Summary::from_ledger(&rows, dec!(100));

        assert_eq!(summary.sessions, 5);
        assert_eq!(summary.trades, 4);
        assert_eq!(summary.wins, 2);
        assert_eq!(summary.losses, 1);
        assert_eq!(summary.win_rate_pct, Some(dec!(50)));
        assert_eq!(summary.stops_hit, 1);
        assert_eq!(summary.stop_hit_pct, Some(dec!(25)));
        assert_eq!(summary.ending_equity, dec!(106));
        assert_eq!(summary.total_return, Some(dec!(0.06)));
        assert_eq!(summary.skipped_missing_bars, 1);
    }

    #[test]
    fn test_side_means() {
        let rows = vec![
            trade(2, Signal::Long, dec!(4), dec!(100), ExitReason::TimeExit),
            trade(3, Signal::Short, dec!(-1), dec!(104), ExitReason::TimeExit),
            trade(4, Signal::Long, dec!(2), dec!(103), ExitReason::TimeExit),
        ];
        let summary = Summary::from_ledger(&rows, dec!(100));
        assert_eq!(summary.long_mean_net_pnl, Some(dec!(3)));
        assert_eq!(summary.short_mean_net_pnl, Some(dec!(-1)));
    }

    // =========================================================================
    // Drawdown Tests
    // =========================================================================

    #[test]
    fn test_drawdown_zero_when_non_decreasing() {
        let rows = ledger(&[dec!(1), dec!(0), dec!(2)]);
        let summary = Summary::from_ledger(&rows, dec!(100));
        assert_eq!(summary.max_drawdown, Some(Decimal::ZERO));
    }

    #[test]
    fn test_drawdown_from_running_peak() {
        // 100 -> 110 -> 99 -> 120 -> 114
        let rows = ledger(&[dec!(10), dec!(-11), dec!(21), dec!(-6)]);
        let summary = Summary::from_ledger(&rows, dec!(100));
        assert_eq!(summary.max_drawdown, Some(dec!(-0.1)));
    }

    #[test]
    fn test_drawdown_peak_starts_at_first_session() {
        // A lone losing session has no earlier peak on the curve
        let rows = ledger(&[dec!(-20)]);
        let summary = Summary::from_ledger(&rows, dec!(100));
        assert_eq!(summary.max_drawdown, Some(Decimal::ZERO));

        // 80 -> 60: measured from the first session's 80, not from 100
        let rows = ledger(&[dec!(-20), dec!(-20)]);
        let summary = Summary::from_ledger(&rows, dec!(100));
        assert_eq!(summary.max_drawdown, Some(dec!(-0.25)));
    }

    #[test]
    fn test_drawdown_never_positive() {
        let patterns: [&[Decimal]; 3] = [
            &[dec!(3), dec!(-1), dec!(-1), dec!(4)],
            &[dec!(-50), dec!(-60), dec!(5)],
            &[dec!(0.5); 6],
        ];
        for nets in patterns {
            let dd = Summary::from_ledger(&ledger(nets), dec!(100)).max_drawdown;
            assert!(dd.unwrap() <= Decimal::ZERO);
        }
    }

    // =========================================================================
    // Distribution Tests
    // =========================================================================

    #[test]
    fn test_distribution_moments() {
        let dist = Distribution::from_values(&[dec!(1), dec!(2), dec!(3), dec!(4)]);
        assert_eq!(dist.mean, Some(dec!(2.5)));
        assert_eq!(dist.median, Some(dec!(2.5)));

        let std = to_f64(dist.std_dev.unwrap());
        assert!((std - 1.290_994_448_7).abs() < 1e-9);
        assert!(to_f64(dist.skewness.unwrap()).abs() < 1e-9);
        assert!((to_f64(dist.excess_kurtosis.unwrap()) + 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_distribution_small_samples() {
        let one = Distribution::from_values(&[dec!(7)]);
        assert_eq!(one.mean, Some(dec!(7)));
        assert_eq!(one.std_dev, None);

        let three = Distribution::from_values(&[dec!(1), dec!(2), dec!(6)]);
        assert!(three.std_dev.is_some());
        assert!(three.skewness.unwrap() > Decimal::ZERO);
        assert_eq!(three.excess_kurtosis, None);
    }

    #[test]
    fn test_render_mentions_undefined() {
        let summary = Summary::from_ledger(&[], dec!(100));
        let text = summary.render();
        assert!(text.contains("BACKTEST SUMMARY (0 sessions)"));
        assert!(text.contains("n/a"));
        assert!(text.contains("$100.00"));
    }
}
