//! Backtesting module for the opening-bar momentum strategy.
//!
//! This module provides:
//! - Historical bar loading and session grouping
//! - Sequential session simulation with compounding equity
//! - Summary statistics over the resulting ledger
//! - CSV / JSON report export
//!
//! # Example
//!
//! ```rust,ignore
//! use intraday_backtester::backtest::{BacktestEngine, CsvBarSource};
//! use intraday_backtester::Config;
//!
//! let source = CsvBarSource::new("data/dia_15m.csv")?;
//! let engine = BacktestEngine::new(source, Config::load(None)?);
//!
//! let result = engine.run()?;
//! println!("{}", result.render());
//! ```

mod data;
mod engine;
mod metrics;
mod report;

pub use data::{
    month_key, parse_timestamp, Bar, BarRequest, BarSeries, BarSource, CsvBarSource,
    NaiveTimestampPolicy, RawBar, Session,
};
pub use engine::{
    BacktestEngine, BacktestResult, NegativeEquityPolicy, SessionSimulator, SimulationState,
    TradeRecord,
};
pub use metrics::{Distribution, Summary};
pub use report::{write_ledger_csv, write_summary_csv, ReportPaths};
