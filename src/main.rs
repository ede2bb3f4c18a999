//! Intraday Backtester - Main Entry Point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use intraday_backtester::backtest::{BacktestEngine, BarRequest, CsvBarSource};
use intraday_backtester::config::Config;
use intraday_backtester::persistence::ResultStore;
use intraday_backtester::strategy::ExitPolicy;
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Intraday Backtester CLI
#[derive(Parser)]
#[command(name = "intraday-backtester")]
#[command(version, about = "Opening-bar momentum backtests with compounding equity")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backtest on a CSV bar file
    Backtest {
        /// Path to CSV data file
        #[arg(short, long)]
        data: PathBuf,

        /// Configuration file (default: ./backtest.toml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Percentage stop, e.g. 0.005 for 0.5%
        #[arg(short, long)]
        stop: Option<Decimal>,

        /// Pricing plan: pro_fixed, pro_tiered or lite
        #[arg(short, long)]
        plan: Option<String>,

        /// Symbol label recorded with the run
        #[arg(long, default_value = "DIA")]
        symbol: String,

        /// Output directory for ledger / summary files
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// SQLite database to record the run in
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// List runs stored in a results database
    Runs {
        /// Path to SQLite database
        #[arg(long, default_value = "data/backtests.db")]
        db: PathBuf,

        /// Maximum number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Print the effective configuration
    Config {
        /// Configuration file (default: ./backtest.toml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging()?;

    match cli.command {
        Commands::Backtest {
            data,
            config,
            stop,
            plan,
            symbol,
            output,
            db,
        } => run_backtest(BacktestArgs {
            data,
            config,
            stop,
            plan,
            symbol,
            output,
            db,
        }),
        Commands::Runs { db, limit } => show_runs(&db, limit),
        Commands::Config { config } => show_config(config.as_deref()),
    }
}

/// Initialize stdout + daily-rolling file logging.
fn init_logging() -> Result<WorkerGuard> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::daily("logs", "backtester.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("intraday_backtester=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(true)
        .init();

    Ok(guard)
}

/// Load configuration and apply CLI overrides.
fn load_config(path: Option<&Path>, stop: Option<Decimal>, plan: Option<String>) -> Result<Config> {
    let mut config = Config::load(path).context("Failed to load configuration")?;

    if let Some(stop_pct) = stop {
        config.exit.policy = match config.exit.policy {
            ExitPolicy::Percentage { target_pct, .. } => ExitPolicy::Percentage {
                stop_pct,
                target_pct,
            },
            _ => ExitPolicy::Percentage {
                stop_pct,
                target_pct: None,
            },
        };
    }
    if let Some(plan) = plan {
        config.costs.plan = plan;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("Configuration:");
    info!(
        "   Session: ref {} / entry {} / exit {} ({})",
        config.session.reference_time,
        config.session.entry_time,
        config.session.exit_time,
        config.session.timezone
    );
    info!("   Exit Policy: {}", config.exit.policy.describe());
    info!(
        "   Starting Equity: ${} (allocation {})",
        config.capital.starting_equity, config.capital.allocation_fraction
    );
    info!(
        "   Pricing Plan: {} (slippage {}/sh, fees {}/sh)",
        config.costs.plan, config.costs.slippage_per_share, config.costs.fees_per_share
    );
}

struct BacktestArgs {
    data: PathBuf,
    config: Option<PathBuf>,
    stop: Option<Decimal>,
    plan: Option<String>,
    symbol: String,
    output: Option<PathBuf>,
    db: Option<PathBuf>,
}

/// Run a single backtest.
fn run_backtest(args: BacktestArgs) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║              BACKTEST MODE                                 ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    let config = load_config(args.config.as_deref(), args.stop, args.plan)?;

    info!("Loading data from: {}", args.data.display());
    let source = CsvBarSource::new(&args.data)
        .with_context(|| format!("Failed to load bars from {}", args.data.display()))?;
    info!("   Rows: {}", source.len());

    let request = BarRequest {
        symbol: args.symbol,
        ..BarRequest::default()
    };
    let engine = BacktestEngine::new(source, config).with_request(request);
    log_config(engine.config());
    let result = engine.run().context("Backtest failed")?;

    println!("\n{}", result.render());

    if let Some(dir) = &args.output {
        let paths = result.export(dir)?;
        info!("Ledger saved to: {}", paths.ledger_csv.display());
        info!("Summary saved to: {}", paths.summary_csv.display());
        info!("Result saved to: {}", paths.result_json.display());
    }

    if let Some(db) = &args.db {
        if let Some(parent) = db.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let store = ResultStore::new(db)?;
        let run_id = store.save_run(&result, &args.data.display().to_string())?;
        info!("Run #{} recorded in {}", run_id, db.display());
    }

    Ok(())
}

/// List stored runs.
fn show_runs(db: &Path, limit: usize) -> Result<()> {
    if !db.exists() {
        println!("Database not found: {}", db.display());
        return Ok(());
    }

    let store = ResultStore::new(db)?;
    let runs = store.list_runs(limit)?;
    if runs.is_empty() {
        println!("No runs recorded in {}", db.display());
        return Ok(());
    }

    println!(
        "{:>5}  {:<20}  {:<10}  {:<36}  {:>6}  {:>12}  {:>9}  {:>9}",
        "ID", "CREATED", "PLAN", "EXIT POLICY", "TRADES", "END EQUITY", "RETURN", "MAX DD"
    );
    for run in runs {
        println!(
            "{:>5}  {:<20}  {:<10}  {:<36}  {:>6}  {:>12.2}  {:>9}  {:>9}",
            run.id,
            run.created_at.format("%Y-%m-%d %H:%M:%S"),
            run.plan,
            run.exit_policy,
            run.trades,
            run.ending_equity,
            pct(run.total_return),
            pct(run.max_drawdown),
        );
    }

    Ok(())
}

fn pct(value: Option<Decimal>) -> String {
    value.map_or_else(
        || "n/a".to_string(),
        |v| format!("{:.2}%", v * Decimal::ONE_HUNDRED),
    )
}

/// Print the effective configuration as JSON.
fn show_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path, None, None)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
