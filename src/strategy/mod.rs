//! Opening-bar momentum strategy.
//!
//! Contains the per-session decision logic:
//! - Direction signal from the reference bar
//! - Position sizing from compounding equity
//! - Intrabar stop / target simulation with a time exit

mod exit;
mod signal;
mod sizer;

pub use exit::{ExitFill, ExitLevels, ExitPolicy, ExitReason, ExitSimulator};
pub use signal::{DojiPolicy, SessionBars, Signal, SignalGenerator, SignalOutcome, SkipReason};
pub use sizer::{PositionSizer, SizeDecision};
