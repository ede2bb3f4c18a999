//! # Intraday Backtester
//!
//! Backtests an opening-bar momentum strategy over historical intraday bars
//! with compounding equity and a tiered per-share commission model.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `backtest`: Bar loading, session simulation, summary statistics, reports
//! - `strategy`: Direction signal, position sizing, stop / target exits
//! - `costs`: Per-leg commission, slippage and fee model
//! - `persistence`: SQLite run history
//! - `error`: Error taxonomy
//! - `utils`: Shared decimal helpers

pub mod backtest;
pub mod config;
pub mod costs;
pub mod error;
pub mod persistence;
pub mod strategy;
pub mod utils;

pub use config::Config;
pub use error::{BacktestError, Result};
