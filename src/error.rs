//! Error taxonomy for the backtester.
//!
//! Input and configuration problems are fatal and abort the run before any
//! session is simulated. Session-level problems (missing bars, doji, undersized
//! positions) are not errors; they surface as skip rows in the ledger.

use thiserror::Error;

/// Errors produced by the backtester library.
#[derive(Debug, Error)]
pub enum BacktestError {
    /// Malformed or missing input columns, unparseable timestamps or prices.
    #[error("data format error: {0}")]
    DataFormat(String),

    /// Invalid configuration (unknown pricing plan, non-positive stop, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl BacktestError {
    pub fn data_format(msg: impl Into<String>) -> Self {
        Self::DataFormat(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, BacktestError>;
