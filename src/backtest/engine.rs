//! Backtesting simulation engine.
//!
//! Replays sessions in chronological order, threading equity and
//! month-to-date volume from one session to the next.

use crate::backtest::data::{Bar, BarRequest, BarSeries, BarSource, Session};
use crate::backtest::metrics::Summary;
use crate::config::Config;
use crate::costs::{CostModel, MonthlyVolume};
use crate::error::{BacktestError, Result};
use crate::strategy::{
    ExitReason, ExitSimulator, PositionSizer, Signal, SignalGenerator, SignalOutcome,
    SizeDecision, SkipReason,
};
use crate::utils::decimal::ratio;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// What happens when a losing session drives equity below zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeEquityPolicy {
    /// Equity may go negative; later sessions are then sized to nothing.
    #[default]
    Allow,
    /// Ending equity is floored at zero.
    ClampAtZero,
}

/// State carried from one session to the next.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationState {
    pub equity: Decimal,
    pub monthly_volume: MonthlyVolume,
}

impl SimulationState {
    pub fn new(starting_equity: Decimal) -> Self {
        Self {
            equity: starting_equity,
            monthly_volume: MonthlyVolume::new(),
        }
    }
}

/// One ledger row: a traded or skipped session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub day: NaiveDate,
    pub month: String,
    pub signal: Signal,
    pub ref_open: Option<Decimal>,
    pub ref_close: Option<Decimal>,
    pub entry_time: Option<String>,
    pub entry_price: Option<Decimal>,
    pub exit_time: Option<String>,
    pub exit_price: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
    pub skip_reason: Option<SkipReason>,
    pub shares: Decimal,
    pub stop_level: Option<Decimal>,
    pub target_level: Option<Decimal>,
    /// Direction-normalized price move per share
    pub gross_points: Decimal,
    pub gross_return: Option<Decimal>,
    pub gross_pnl: Decimal,
    pub entry_cost: Decimal,
    pub exit_cost: Decimal,
    pub total_cost: Decimal,
    pub net_pnl: Decimal,
    /// Net P&L over deployed capital (equity * allocation)
    pub net_return: Option<Decimal>,
    pub starting_equity: Decimal,
    pub ending_equity: Decimal,
    pub note: String,
}

impl TradeRecord {
    fn skipped(
        session: &Session,
        reason: SkipReason,
        reference: Option<&Bar>,
        entry: Option<&Bar>,
        equity: Decimal,
    ) -> Self {
        Self {
            day: session.day,
            month: session.month_key(),
            signal: Signal::Skip,
            ref_open: reference.map(|b| b.open),
            ref_close: reference.map(|b| b.close),
            entry_time: entry.map(|b| b.time_label.clone()),
            entry_price: entry.map(|b| b.close),
            exit_time: None,
            exit_price: None,
            exit_reason: None,
            skip_reason: Some(reason),
            shares: Decimal::ZERO,
            stop_level: None,
            target_level: None,
            gross_points: Decimal::ZERO,
            gross_return: None,
            gross_pnl: Decimal::ZERO,
            entry_cost: Decimal::ZERO,
            exit_cost: Decimal::ZERO,
            total_cost: Decimal::ZERO,
            net_pnl: Decimal::ZERO,
            net_return: None,
            starting_equity: equity,
            ending_equity: equity,
            note: reason.note().to_string(),
        }
    }

    pub fn is_trade(&self) -> bool {
        self.skip_reason.is_none()
    }

    /// Exit reason for trades, skip reason for skipped sessions.
    pub fn reason(&self) -> &'static str {
        match (self.exit_reason, self.skip_reason) {
            (Some(exit), _) => exit.as_str(),
            (None, Some(skip)) => skip.as_str(),
            (None, None) => "",
        }
    }
}

/// Per-session decision pipeline: signal, size, entry leg, exit, exit leg.
#[derive(Debug, Clone)]
pub struct SessionSimulator {
    signals: SignalGenerator,
    sizer: PositionSizer,
    costs: CostModel,
    exits: ExitSimulator,
    negative_equity: NegativeEquityPolicy,
}

impl SessionSimulator {
    pub fn new(
        signals: SignalGenerator,
        sizer: PositionSizer,
        costs: CostModel,
        exits: ExitSimulator,
        negative_equity: NegativeEquityPolicy,
    ) -> Self {
        Self {
            signals,
            sizer,
            costs,
            exits,
            negative_equity,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            SignalGenerator::new(config.session.times()?, config.signal.doji),
            PositionSizer::from_config(&config.capital),
            CostModel::from_config(&config.costs)?,
            ExitSimulator::new(config.exit.policy.clone()),
            config.capital.negative_equity,
        ))
    }

    /// Simulate every session in order from a fresh state.
    pub fn run(&self, sessions: &[Session], starting_equity: Decimal) -> (Vec<TradeRecord>, SimulationState) {
        let mut state = SimulationState::new(starting_equity);
        let ledger = sessions
            .iter()
            .map(|session| self.step(session, &mut state))
            .collect();
        (ledger, state)
    }

    /// Simulate one session, updating `state` in place.
    ///
    /// State only changes for a traded session; every skip leaves equity and
    /// monthly volume untouched.
    pub fn step(&self, session: &Session, state: &mut SimulationState) -> TradeRecord {
        let starting_equity = state.equity;
        let month = session.month_key();

        let (signal, bars) = match self.signals.evaluate(session) {
            SignalOutcome::Trade { signal, bars } => (signal, bars),
            SignalOutcome::Skip { reason, reference } => {
                debug!(day = %session.day, reason = %reason, "Session skipped");
                return TradeRecord::skipped(session, reason, reference, None, starting_equity);
            }
        };
        let skip = |reason: SkipReason| {
            TradeRecord::skipped(
                session,
                reason,
                Some(bars.reference),
                Some(bars.entry),
                starting_equity,
            )
        };

        let entry_price = bars.entry.close;
        let shares = match self.sizer.size(starting_equity, entry_price) {
            SizeDecision::Shares(q) => q,
            SizeDecision::TooSmall => {
                warn!(
                    day = %session.day,
                    equity = %starting_equity,
                    "Position too small, session skipped"
                );
                return skip(SkipReason::PositionTooSmall);
            }
            SizeDecision::OutOfRange => {
                warn!(day = %session.day, entry = %entry_price, "Position size out of range, session skipped");
                return skip(SkipReason::NumericOverflow);
            }
        };

        let levels = match self.exits.levels(signal, entry_price, bars.reference) {
            Ok(levels) => levels,
            Err(reason) => {
                debug!(day = %session.day, reason = %reason, "No exit bracket, session skipped");
                return skip(reason);
            }
        };

        let fill = self
            .exits
            .simulate(signal, levels, session, bars.entry, bars.deadline);

        let volume_before = state.monthly_volume.before(&month);
        let Some(pnl) = self.settle(signal, shares, entry_price, fill.price, volume_before) else {
            warn!(day = %session.day, entry = %entry_price, "P&L out of range, session skipped");
            return skip(SkipReason::NumericOverflow);
        };
        let Some(mut ending_equity) = starting_equity.checked_add(pnl.net_pnl) else {
            warn!(day = %session.day, "Equity out of range, session skipped");
            return skip(SkipReason::NumericOverflow);
        };

        // Entry leg, then exit leg
        state.monthly_volume.advance(&month, shares);
        state.monthly_volume.advance(&month, shares);

        if ending_equity < Decimal::ZERO
            && self.negative_equity == NegativeEquityPolicy::ClampAtZero
        {
            warn!(day = %session.day, equity = %ending_equity, "Equity clamped at zero");
            ending_equity = Decimal::ZERO;
        }
        if ending_equity <= Decimal::ZERO {
            warn!(day = %session.day, equity = %ending_equity, "Equity is no longer positive");
        }
        state.equity = ending_equity;

        debug!(
            day = %session.day,
            signal = %signal,
            shares = %shares,
            entry = %entry_price,
            exit = %fill.price,
            reason = %fill.reason,
            net = %pnl.net_pnl,
            equity = %ending_equity,
            "Session traded"
        );

        let deployed = starting_equity.checked_mul(self.sizer.allocation_fraction());

        TradeRecord {
            day: session.day,
            month,
            signal,
            ref_open: Some(bars.reference.open),
            ref_close: Some(bars.reference.close),
            entry_time: Some(bars.entry.time_label.clone()),
            entry_price: Some(entry_price),
            exit_time: Some(fill.time_label),
            exit_price: Some(fill.price),
            exit_reason: Some(fill.reason),
            skip_reason: None,
            shares,
            stop_level: Some(levels.stop),
            target_level: levels.target,
            gross_points: pnl.gross_points,
            gross_return: ratio(pnl.gross_points, entry_price),
            gross_pnl: pnl.gross_pnl,
            entry_cost: pnl.entry_cost,
            exit_cost: pnl.exit_cost,
            total_cost: pnl.total_cost,
            net_pnl: pnl.net_pnl,
            net_return: deployed.and_then(|d| ratio(pnl.net_pnl, d)),
            starting_equity,
            ending_equity,
            note: String::new(),
        }
    }

    /// Price both legs and the round trip's P&L.
    ///
    /// The entry leg sees `volume_before`; the exit leg sees it plus the entry
    /// shares. `None` when any amount leaves the decimal range.
    fn settle(
        &self,
        signal: Signal,
        shares: Decimal,
        entry_price: Decimal,
        exit_price: Decimal,
        volume_before: Decimal,
    ) -> Option<Settlement> {
        let entry_leg = self.costs.leg_cost(shares, entry_price, volume_before)?;
        let exit_leg = self
            .costs
            .leg_cost(shares, exit_price, volume_before.checked_add(shares)?)?;

        let entry_cost = entry_leg.total();
        let exit_cost = exit_leg.total();
        let gross_points = exit_price
            .checked_sub(entry_price)?
            .checked_mul(signal.direction())?;
        let gross_pnl = shares.checked_mul(gross_points)?;
        let total_cost = entry_cost.checked_add(exit_cost)?;

        Some(Settlement {
            entry_cost,
            exit_cost,
            gross_points,
            gross_pnl,
            total_cost,
            net_pnl: gross_pnl.checked_sub(total_cost)?,
        })
    }
}

/// Money side of one traded session.
struct Settlement {
    entry_cost: Decimal,
    exit_cost: Decimal,
    gross_points: Decimal,
    gross_pnl: Decimal,
    total_cost: Decimal,
    net_pnl: Decimal,
}

/// Complete result of a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub config: Config,
    pub ledger: Vec<TradeRecord>,
    pub summary: Summary,
    pub bars_loaded: usize,
    pub first_bar: Option<DateTime<Utc>>,
    pub last_bar: Option<DateTime<Utc>>,
}

/// The backtesting engine: loads bars from a source and simulates them.
pub struct BacktestEngine<S: BarSource> {
    source: S,
    config: Config,
    request: BarRequest,
}

impl<S: BarSource> BacktestEngine<S> {
    pub fn new(source: S, config: Config) -> Self {
        Self {
            source,
            config,
            request: BarRequest::default(),
        }
    }

    pub fn with_request(mut self, request: BarRequest) -> Self {
        self.request = request;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the backtest.
    ///
    /// Configuration and input errors abort before any session is simulated.
    pub fn run(&self) -> Result<BacktestResult> {
        self.config.validate()?;
        let simulator = SessionSimulator::from_config(&self.config)?;
        let times = self.config.session.times()?;

        let raw = self.source.fetch_bars(&self.request)?;
        if raw.is_empty() {
            return Err(BacktestError::data_format("no bars to backtest"));
        }

        let series = BarSeries::normalize(raw, times.timezone, self.config.session.naive_timestamps)?;
        let sessions = series.sessions();
        let range = series.available_range();

        info!(
            bars = series.len(),
            sessions = sessions.len(),
            reference = %times.reference,
            entry = %times.entry,
            exit = %times.exit,
            "Starting backtest"
        );

        let starting_equity = self.config.capital.starting_equity;
        let (ledger, state) = simulator.run(&sessions, starting_equity);
        let summary = Summary::from_ledger(&ledger, starting_equity);

        info!(
            trades = summary.trades,
            skipped = summary.sessions_skipped,
            final_equity = %state.equity,
            "Backtest complete"
        );

        Ok(BacktestResult {
            config: self.config.clone(),
            ledger,
            summary,
            bars_loaded: series.len(),
            first_bar: range.map(|(first, _)| first),
            last_bar: range.map(|(_, last)| last),
        })
    }
}
