//! Configuration management for the intraday backtester.
//!
//! Loads settings from an optional TOML file and environment variables.

use crate::backtest::{NaiveTimestampPolicy, NegativeEquityPolicy};
use crate::costs::CostModel;
use crate::error::{BacktestError, Result};
use crate::strategy::{DojiPolicy, ExitPolicy};
use chrono::NaiveTime;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main backtest configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Session time-of-day labels and time zone
    #[serde(default)]
    pub session: SessionConfig,
    /// Signal derivation from the reference bar
    #[serde(default)]
    pub signal: SignalConfig,
    /// Stop / target policy
    #[serde(default)]
    pub exit: ExitConfig,
    /// Starting equity and position sizing
    #[serde(default)]
    pub capital: CapitalConfig,
    /// Commission plan, slippage and pass-through fees
    #[serde(default)]
    pub costs: CostConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Bar whose open/close decides direction ("HH:MM", local time)
    #[serde(default = "default_reference_time")]
    pub reference_time: String,
    /// Bar whose close is the entry fill
    #[serde(default = "default_entry_time")]
    pub entry_time: String,
    /// Exit-deadline bar; its close is the time-based exit
    #[serde(default = "default_exit_time")]
    pub exit_time: String,
    /// IANA time zone used for trading-day and time-of-day labels
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// How timestamps without an offset are interpreted
    #[serde(default)]
    pub naive_timestamps: NaiveTimestampPolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Exact or tolerance-based open == close comparison
    #[serde(default)]
    pub doji: DojiPolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExitConfig {
    #[serde(default)]
    pub policy: ExitPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapitalConfig {
    /// Equity at the start of the run
    #[serde(default = "default_starting_equity")]
    pub starting_equity: Decimal,
    /// Fraction of equity deployed per trade (0.0-1.0]
    #[serde(default = "default_allocation_fraction")]
    pub allocation_fraction: Decimal,
    /// Allow fractional share quantities
    #[serde(default = "default_fractional_shares")]
    pub fractional_shares: bool,
    /// Smallest fractional quantity that may be traded
    #[serde(default = "default_min_fractional_shares")]
    pub min_fractional_shares: Decimal,
    /// What happens when a loss drives equity below zero
    #[serde(default)]
    pub negative_equity: NegativeEquityPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    /// Pricing plan identifier: "pro_fixed", "pro_tiered" or "lite"
    #[serde(default = "default_plan")]
    pub plan: String,
    /// Slippage per share per side
    #[serde(default)]
    pub slippage_per_share: Decimal,
    /// Regulatory / exchange / clearing pass-through per share per side
    #[serde(default)]
    pub fees_per_share: Decimal,
    #[serde(default)]
    pub pro_fixed: FlatRateConfig,
    #[serde(default)]
    pub pro_tiered: TieredConfig,
    #[serde(default)]
    pub lite: LiteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatRateConfig {
    #[serde(default = "default_fixed_rate")]
    pub rate_per_share: Decimal,
    #[serde(default = "default_fixed_min")]
    pub min_per_order: Decimal,
    /// Commission cap as a fraction of trade value
    #[serde(default = "default_max_rate_of_trade")]
    pub max_rate_of_trade: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TieredConfig {
    #[serde(default = "default_tiered_min")]
    pub min_per_order: Decimal,
    #[serde(default = "default_max_rate_of_trade")]
    pub max_rate_of_trade: Decimal,
    /// Ascending monthly share-volume brackets; the last one is unbounded
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    /// Inclusive monthly share volume ceiling (None = unbounded)
    #[serde(default)]
    pub up_to: Option<Decimal>,
    pub rate_per_share: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiteConfig {
    #[serde(default = "default_lite_rate")]
    pub rate_per_share: Decimal,
    #[serde(default = "default_lite_min")]
    pub min_per_order: Decimal,
}

/// Parsed, validated session times.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionTimes {
    pub reference: String,
    pub entry: String,
    pub exit: String,
    pub timezone: Tz,
}

// Default value functions
fn default_reference_time() -> String {
    "09:30".to_string()
}

fn default_entry_time() -> String {
    "09:45".to_string()
}

fn default_exit_time() -> String {
    "11:30".to_string()
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

fn default_starting_equity() -> Decimal {
    Decimal::new(100, 0) // $100
}

fn default_allocation_fraction() -> Decimal {
    Decimal::ONE
}

fn default_fractional_shares() -> bool {
    true
}

fn default_min_fractional_shares() -> Decimal {
    Decimal::new(1, 4) // 0.0001
}

fn default_plan() -> String {
    "pro_fixed".to_string()
}

fn default_fixed_rate() -> Decimal {
    Decimal::new(5, 3) // $0.005 per share
}

fn default_fixed_min() -> Decimal {
    Decimal::new(100, 2) // $1.00
}

fn default_max_rate_of_trade() -> Decimal {
    Decimal::new(1, 2) // 1% of trade value
}

fn default_tiered_min() -> Decimal {
    Decimal::new(35, 2) // $0.35
}

fn default_tiers() -> Vec<TierConfig> {
    vec![
        TierConfig {
            up_to: Some(Decimal::new(300_000, 0)),
            rate_per_share: Decimal::new(35, 4),
        },
        TierConfig {
            up_to: Some(Decimal::new(3_000_000, 0)),
            rate_per_share: Decimal::new(20, 4),
        },
        TierConfig {
            up_to: Some(Decimal::new(20_000_000, 0)),
            rate_per_share: Decimal::new(15, 4),
        },
        TierConfig {
            up_to: Some(Decimal::new(100_000_000, 0)),
            rate_per_share: Decimal::new(10, 4),
        },
        TierConfig {
            up_to: None,
            rate_per_share: Decimal::new(5, 4),
        },
    ]
}

fn default_lite_rate() -> Decimal {
    Decimal::new(2, 3) // $0.002 per share
}

fn default_lite_min() -> Decimal {
    Decimal::new(3, 3) // $0.003
}

/// Parse an "HH:MM" label and return its canonical form.
pub fn canonical_time_label(label: &str) -> Result<String> {
    NaiveTime::parse_from_str(label.trim(), "%H:%M")
        .map(|t| t.format("%H:%M").to_string())
        .map_err(|e| {
            BacktestError::configuration(format!("invalid time-of-day label '{label}': {e}"))
        })
}

impl Config {
    /// Load configuration from `.env`, an optional TOML file and `IBT__*` variables.
    ///
    /// Without an explicit path, `backtest.toml` in the working directory is
    /// used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file_source = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name("backtest").required(false),
        };

        let config = config::Config::builder()
            .add_source(file_source)
            .add_source(config::Environment::default().separator("__").prefix("IBT"))
            .build()
            .map_err(|e| {
                BacktestError::configuration(format!("failed to build configuration: {e}"))
            })?;

        config.try_deserialize().map_err(|e| {
            BacktestError::configuration(format!("failed to deserialize configuration: {e}"))
        })
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        self.session.times()?;
        self.exit.policy.validate()?;
        self.signal.doji.validate()?;

        let capital = &self.capital;
        if capital.starting_equity <= Decimal::ZERO {
            return Err(BacktestError::configuration(
                "starting_equity must be positive",
            ));
        }
        if capital.allocation_fraction <= Decimal::ZERO
            || capital.allocation_fraction > Decimal::ONE
        {
            return Err(BacktestError::configuration(
                "allocation_fraction must be in (0, 1]",
            ));
        }
        if capital.min_fractional_shares < Decimal::ZERO {
            return Err(BacktestError::configuration(
                "min_fractional_shares must not be negative",
            ));
        }

        if self.costs.slippage_per_share < Decimal::ZERO
            || self.costs.fees_per_share < Decimal::ZERO
        {
            return Err(BacktestError::configuration(
                "slippage_per_share and fees_per_share must not be negative",
            ));
        }
        CostModel::from_config(&self.costs)?;

        Ok(())
    }
}

impl SessionConfig {
    /// Parse and check the configured labels and time zone.
    ///
    /// The reference bar may coincide with the entry bar, but the exit
    /// deadline must come strictly after entry.
    pub fn times(&self) -> Result<SessionTimes> {
        let reference = canonical_time_label(&self.reference_time)?;
        let entry = canonical_time_label(&self.entry_time)?;
        let exit = canonical_time_label(&self.exit_time)?;

        if reference > entry {
            return Err(BacktestError::configuration(format!(
                "reference_time {reference} must not be after entry_time {entry}"
            )));
        }
        if exit <= entry {
            return Err(BacktestError::configuration(format!(
                "exit_time {exit} must be after entry_time {entry}"
            )));
        }

        let timezone: Tz = self.timezone.parse().map_err(|_| {
            BacktestError::configuration(format!("unknown time zone '{}'", self.timezone))
        })?;

        Ok(SessionTimes {
            reference,
            entry,
            exit,
            timezone,
        })
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reference_time: default_reference_time(),
            entry_time: default_entry_time(),
            exit_time: default_exit_time(),
            timezone: default_timezone(),
            naive_timestamps: NaiveTimestampPolicy::default(),
        }
    }
}

impl Default for CapitalConfig {
    fn default() -> Self {
        Self {
            starting_equity: default_starting_equity(),
            allocation_fraction: default_allocation_fraction(),
            fractional_shares: default_fractional_shares(),
            min_fractional_shares: default_min_fractional_shares(),
            negative_equity: NegativeEquityPolicy::default(),
        }
    }
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            plan: default_plan(),
            slippage_per_share: Decimal::ZERO,
            fees_per_share: Decimal::ZERO,
            pro_fixed: FlatRateConfig::default(),
            pro_tiered: TieredConfig::default(),
            lite: LiteConfig::default(),
        }
    }
}

impl Default for FlatRateConfig {
    fn default() -> Self {
        Self {
            rate_per_share: default_fixed_rate(),
            min_per_order: default_fixed_min(),
            max_rate_of_trade: default_max_rate_of_trade(),
        }
    }
}

impl Default for TieredConfig {
    fn default() -> Self {
        Self {
            min_per_order: default_tiered_min(),
            max_rate_of_trade: default_max_rate_of_trade(),
            tiers: default_tiers(),
        }
    }
}

impl Default for LiteConfig {
    fn default() -> Self {
        Self {
            rate_per_share: default_lite_rate(),
            min_per_order: default_lite_min(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_canonical_time_label() {
        assert_eq!(canonical_time_label("09:30").unwrap(), "09:30");
        assert_eq!(canonical_time_label(" 9:45 ").unwrap(), "09:45");
        assert!(canonical_time_label("25:00").is_err());
        assert!(canonical_time_label("noon").is_err());
    }

    #[test]
    fn test_session_times_ordering() {
        let mut session = SessionConfig::default();
        let times = session.times().unwrap();
        assert_eq!(times.reference, "09:30");
        assert_eq!(times.entry, "09:45");
        assert_eq!(times.exit, "11:30");
        assert_eq!(times.timezone, chrono_tz::America::New_York);

        // Entry on the reference bar is allowed (range breakout setup)
        session.entry_time = "09:30".to_string();
        assert!(session.times().is_ok());

        session.exit_time = "09:30".to_string();
        assert!(matches!(
            session.times(),
            Err(BacktestError::Configuration(_))
        ));
    }

    #[test]
    fn test_unknown_timezone_rejected() {
        let session = SessionConfig {
            timezone: "Mars/Olympus_Mons".to_string(),
            ..SessionConfig::default()
        };
        assert!(matches!(
            session.times(),
            Err(BacktestError::Configuration(_))
        ));
    }

    #[test]
    fn test_unknown_plan_rejected() {
        let mut config = Config::default();
        config.costs.plan = "platinum".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("platinum"));
    }

    #[test]
    fn test_non_positive_stop_rejected() {
        let mut config = Config::default();
        config.exit.policy = ExitPolicy::Percentage {
            stop_pct: Decimal::ZERO,
            target_pct: None,
        };
        assert!(matches!(
            config.validate(),
            Err(BacktestError::Configuration(_))
        ));
    }

    #[test]
    fn test_allocation_fraction_bounds() {
        let mut config = Config::default();
        config.capital.allocation_fraction = dec!(1.5);
        assert!(config.validate().is_err());

        config.capital.allocation_fraction = dec!(0.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_tiers_match_plan_table() {
        let tiers = default_tiers();
        assert_eq!(tiers.len(), 5);
        assert_eq!(tiers[0].up_to, Some(dec!(300000)));
        assert_eq!(tiers[0].rate_per_share, dec!(0.0035));
        assert_eq!(tiers[4].up_to, None);
        assert_eq!(tiers[4].rate_per_share, dec!(0.0005));
    }

    #[test]
    fn test_deserialize_from_toml_source() {
        let toml = r#"
            [session]
            timezone = "Europe/London"

            [exit.policy]
            kind = "fixed_points"
            stop_points = "1.0"

            [costs]
            plan = "lite"
        "#;

        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.session.timezone, "Europe/London");
        assert_eq!(config.session.entry_time, "09:45");
        assert_eq!(config.costs.plan, "lite");
        assert_eq!(
            config.exit.policy,
            ExitPolicy::FixedPoints {
                stop_points: dec!(1.0),
                target_points: None,
            }
        );
        assert!(config.validate().is_ok());
    }
}
