//! SQLite run history.
//!
//! Every completed backtest can be stored with:
//! - The effective configuration (as JSON)
//! - Headline summary figures plus the full summary JSON
//! - One row per ledger session

use crate::backtest::BacktestResult;
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// One stored run, as listed by `runs`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub data_source: String,
    pub plan: String,
    pub exit_policy: String,
    pub sessions: usize,
    pub trades: usize,
    pub starting_equity: Decimal,
    pub ending_equity: Decimal,
    pub total_return: Option<Decimal>,
    pub max_drawdown: Option<Decimal>,
}

/// One stored ledger row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTrade {
    pub day: String,
    pub signal: String,
    pub reason: String,
    pub shares: Decimal,
    pub net_pnl: Decimal,
    pub ending_equity: Decimal,
}

/// SQLite-backed store of backtest runs.
pub struct ResultStore {
    conn: Connection,
}

impl ResultStore {
    /// Open (or create) the store at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())?;
        let store = Self { conn };
        store.init_schema()?;

        info!(path = %db_path.as_ref().display(), "Result store opened");
        Ok(store)
    }

    /// Store backed by an in-memory database.
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                data_source TEXT NOT NULL,
                plan TEXT NOT NULL,
                exit_policy TEXT NOT NULL,
                sessions INTEGER NOT NULL,
                trades INTEGER NOT NULL,
                starting_equity TEXT NOT NULL,
                ending_equity TEXT NOT NULL,
                total_return TEXT,
                max_drawdown TEXT,
                config_json TEXT NOT NULL,
                summary_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ledger_rows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                day TEXT NOT NULL,
                signal TEXT NOT NULL,
                reason TEXT NOT NULL,
                shares TEXT NOT NULL,
                entry_price TEXT,
                exit_price TEXT,
                net_pnl TEXT NOT NULL,
                ending_equity TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_ledger_run ON ledger_rows(run_id);
            "#,
        )?;

        debug!("Result store schema initialized");
        Ok(())
    }

    /// Persist a run and its ledger; returns the new run id.
    pub fn save_run(&self, result: &BacktestResult, data_source: &str) -> Result<i64> {
        let tx = self.conn.unchecked_transaction()?;
        let summary = &result.summary;

        tx.execute(
            r#"
            INSERT INTO runs (created_at, data_source, plan, exit_policy, sessions, trades,
                              starting_equity, ending_equity, total_return, max_drawdown,
                              config_json, summary_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                Utc::now().to_rfc3339(),
                data_source,
                result.config.costs.plan,
                result.config.exit.policy.describe(),
                summary.sessions as i64,
                summary.trades as i64,
                summary.starting_equity.to_string(),
                summary.ending_equity.to_string(),
                summary.total_return.map(|v| v.to_string()),
                summary.max_drawdown.map(|v| v.to_string()),
                serde_json::to_string(&result.config)?,
                serde_json::to_string(summary)?,
            ],
        )?;
        let run_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO ledger_rows (run_id, day, signal, reason, shares, entry_price,
                                         exit_price, net_pnl, ending_equity)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;
            for row in &result.ledger {
                stmt.execute(params![
                    run_id,
                    row.day.to_string(),
                    row.signal.as_str(),
                    row.reason(),
                    row.shares.to_string(),
                    row.entry_price.map(|v| v.to_string()),
                    row.exit_price.map(|v| v.to_string()),
                    row.net_pnl.to_string(),
                    row.ending_equity.to_string(),
                ])?;
            }
        }

        tx.commit()?;

        debug!(run_id, rows = result.ledger.len(), "Run saved");
        Ok(run_id)
    }

    /// Most recent runs first.
    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, created_at, data_source, plan, exit_policy, sessions, trades,
                   starting_equity, ending_equity, total_return, max_drawdown
            FROM runs ORDER BY id DESC LIMIT ?1
            "#,
        )?;

        let runs = stmt
            .query_map([limit as i64], |row| {
                Ok(RunRecord {
                    id: row.get(0)?,
                    created_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(1)?)
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e))
                        })?,
                    data_source: row.get(2)?,
                    plan: row.get(3)?,
                    exit_policy: row.get(4)?,
                    sessions: row.get::<_, i64>(5)? as usize,
                    trades: row.get::<_, i64>(6)? as usize,
                    starting_equity: decimal(row, 7)?,
                    ending_equity: decimal(row, 8)?,
                    total_return: optional_decimal(row, 9)?,
                    max_drawdown: optional_decimal(row, 10)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(runs)
    }

    /// Ledger rows of a stored run, in session order.
    pub fn ledger(&self, run_id: i64) -> Result<Vec<StoredTrade>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT day, signal, reason, shares, net_pnl, ending_equity
            FROM ledger_rows WHERE run_id = ?1 ORDER BY id
            "#,
        )?;

        let rows = stmt
            .query_map([run_id], |row| {
                Ok(StoredTrade {
                    day: row.get(0)?,
                    signal: row.get(1)?,
                    reason: row.get(2)?,
                    shares: decimal(row, 3)?,
                    net_pnl: decimal(row, 4)?,
                    ending_equity: decimal(row, 5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

/// Decimal stored as TEXT in column `idx`.
fn decimal(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    parse_decimal(idx, &text)
}

fn optional_decimal(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    row.get::<_, Option<String>>(idx)?
        .map(|text| parse_decimal(idx, &text))
        .transpose()
}

fn parse_decimal(idx: usize, text: &str) -> rusqlite::Result<Decimal> {
    Decimal::from_str(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
