//! Ledger and summary export (CSV / JSON).

use crate::backtest::engine::{BacktestResult, TradeRecord};
use crate::backtest::metrics::{Distribution, Summary};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Files written for one run.
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub ledger_csv: PathBuf,
    pub summary_csv: PathBuf,
    pub result_json: PathBuf,
}

/// Write one row per session, skipped sessions included.
pub fn write_ledger_csv<W: Write>(writer: W, ledger: &[TradeRecord]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for row in ledger {
        csv.serialize(row).context("Failed to serialize ledger row")?;
    }
    csv.flush().context("Failed to flush ledger CSV")?;
    Ok(())
}

/// Write the summary as `metric,value` rows; undefined values are empty.
pub fn write_summary_csv<W: Write>(writer: W, summary: &Summary) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(["metric", "value"])?;
    for (metric, value) in summary_rows(summary) {
        csv.write_record([metric.as_str(), value.as_str()])?;
    }
    csv.flush().context("Failed to flush summary CSV")?;
    Ok(())
}

fn summary_rows(s: &Summary) -> Vec<(String, String)> {
    let mut rows = vec![
        row("sessions", s.sessions),
        row("trades", s.trades),
        row("wins", s.wins),
        row("losses", s.losses),
        opt("win_rate_pct", s.win_rate_pct),
        row("starting_equity", s.starting_equity),
        row("ending_equity", s.ending_equity),
        opt("total_return", s.total_return),
        opt("max_drawdown", s.max_drawdown),
        row("stops_hit", s.stops_hit),
        row("targets_hit", s.targets_hit),
        opt("stop_hit_pct", s.stop_hit_pct),
        row("total_costs", s.total_costs),
        opt("long_mean_net_pnl", s.long_mean_net_pnl),
        opt("short_mean_net_pnl", s.short_mean_net_pnl),
    ];
    distribution_rows(&mut rows, "net_pnl", &s.net_pnl);
    distribution_rows(&mut rows, "gross_points", &s.gross_points);
    rows.extend([
        row("sessions_skipped", s.sessions_skipped),
        row("skipped_missing_bars", s.skipped_missing_bars),
        row("skipped_doji", s.skipped_doji),
        row("skipped_position_too_small", s.skipped_position_too_small),
        row("skipped_zero_range", s.skipped_zero_range),
        row("skipped_numeric_overflow", s.skipped_numeric_overflow),
    ]);
    rows
}

fn distribution_rows(rows: &mut Vec<(String, String)>, prefix: &str, d: &Distribution) {
    rows.push(row(&format!("{prefix}_count"), d.count));
    rows.push(opt(&format!("{prefix}_mean"), d.mean));
    rows.push(opt(&format!("{prefix}_median"), d.median));
    rows.push(opt(&format!("{prefix}_std"), d.std_dev));
    rows.push(opt(&format!("{prefix}_skew"), d.skewness));
    rows.push(opt(&format!("{prefix}_excess_kurtosis"), d.excess_kurtosis));
}

fn row(metric: &str, value: impl ToString) -> (String, String) {
    (metric.to_string(), value.to_string())
}

fn opt(metric: &str, value: Option<Decimal>) -> (String, String) {
    (
        metric.to_string(),
        value.map(|v| v.to_string()).unwrap_or_default(),
    )
}

impl BacktestResult {
    /// Write `ledger.csv`, `summary.csv` and `result.json` into `output_dir`.
    pub fn export(&self, output_dir: impl AsRef<Path>) -> Result<ReportPaths> {
        let dir = output_dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

        let paths = ReportPaths {
            ledger_csv: dir.join("ledger.csv"),
            summary_csv: dir.join("summary.csv"),
            result_json: dir.join("result.json"),
        };

        let ledger = std::fs::File::create(&paths.ledger_csv)
            .with_context(|| format!("Failed to create {}", paths.ledger_csv.display()))?;
        write_ledger_csv(ledger, &self.ledger)?;

        let summary = std::fs::File::create(&paths.summary_csv)
            .with_context(|| format!("Failed to create {}", paths.summary_csv.display()))?;
        write_summary_csv(summary, &self.summary)?;

        let json = serde_json::to_string_pretty(self).context("Failed to serialize result")?;
        std::fs::write(&paths.result_json, json)
            .with_context(|| format!("Failed to write {}", paths.result_json.display()))?;

        info!(dir = %dir.display(), rows = self.ledger.len(), "Reports written");
        Ok(paths)
    }

    /// Console summary with the tested period.
    pub fn render(&self) -> String {
        let period = match (self.first_bar, self.last_bar) {
            (Some(first), Some(last)) => format!(
                "{} to {}",
                first.format("%Y-%m-%d"),
                last.format("%Y-%m-%d")
            ),
            _ => "n/a".to_string(),
        };
        format!(
            "{}\n\nBacktest Period: {}\nBars: {}\nExit Policy: {}\nPricing Plan: {}",
            self.summary.render(),
            period,
            self.bars_loaded,
            self.config.exit.policy.describe(),
            self.config.costs.plan,
        )
    }
}
