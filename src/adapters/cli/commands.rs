//! CLI Command Handlers
//!
//! Implementation of all CLI commands for the Titan trader.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::alpaca::{AlpacaClient, AlpacaConfig};
use crate::adapters::paper::PaperBroker;
use crate::application::{
    ApprovalGate, ApprovalReport, CancellationToken, ExecutionEngine, ExecutionSettings,
    LiveMonitor, LoopTiming, MonitorSettings, TradingOrchestrator,
};
use crate::config::{load_config, write_template, AppConfig, LoggingSection};
use crate::domain::{ApprovalStore, LoadStatus};
use crate::ports::{BarSource, BrokeragePort, Lookback};
use crate::strategy::{FeatureEngine, WinProbabilityModel};

/// Titan - band-touch mean reversion for US equities
#[derive(Parser, Debug)]
#[command(
    name = "titan",
    version = env!("CARGO_PKG_VERSION"),
    about = "Band-touch mean reversion with a learned approval gate",
    long_about = "Titan scores a ticker universe offline with a gradient-boosted \
                  win-probability model, then watches the approved tickers live and \
                  enters lower-band touches with bracket orders."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Score the universe and rewrite the approval file
    Score(ScoreCmd),

    /// Start the live trading loop
    Run(RunCmd),

    /// Print the current approval file
    Approved(ApprovedCmd),

    /// Write a starter configuration file
    InitConfig(InitConfigCmd),
}

/// Run the approval batch
#[derive(Parser, Debug)]
pub struct ScoreCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/titan.toml")]
    pub config: PathBuf,

    /// Keep re-scoring every `approval.interval_secs` until Ctrl+C
    #[arg(long)]
    pub repeat: bool,
}

/// Start the live loop
#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/titan.toml")]
    pub config: PathBuf,

    /// Fill orders against an in-process paper account
    #[arg(short, long)]
    pub paper: bool,

    /// Starting cash for the paper account
    #[arg(long, value_name = "AMOUNT", default_value = "100000")]
    pub paper_cash: f64,
}

/// Show approved tickers
#[derive(Parser, Debug)]
pub struct ApprovedCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/titan.toml")]
    pub config: PathBuf,
}

/// Write a config template
#[derive(Parser, Debug)]
pub struct InitConfigCmd {
    /// Destination path
    #[arg(value_name = "FILE", default_value = "config/titan.toml")]
    pub path: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

/// Execute the CLI command
pub async fn execute(app: CliApp) -> Result<()> {
    let config_path = match &app.command {
        Command::Score(cmd) => Some(cmd.config.as_path()),
        Command::Run(cmd) => Some(cmd.config.as_path()),
        Command::Approved(cmd) => Some(cmd.config.as_path()),
        Command::InitConfig(_) => None,
    };

    let config = match config_path {
        Some(path) => Some(
            load_config(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        ),
        None => None,
    };

    let logging = config.as_ref().map(|c| c.logging.clone()).unwrap_or_default();
    init_logging(app.verbose, app.debug, &logging)?;

    match (app.command, config) {
        (Command::Score(cmd), Some(config)) => score_command(cmd, config).await,
        (Command::Run(cmd), Some(config)) => run_command(cmd, config).await,
        (Command::Approved(_), Some(config)) => approved_command(config),
        (Command::InitConfig(cmd), _) => init_config_command(cmd),
        (_, None) => bail!("No configuration loaded"),
    }
}

/// Initialize logging system
fn init_logging(verbose: bool, debug: bool, logging: &LoggingSection) -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let level = effective_level(verbose, debug, &logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if logging.log_to_file {
        let file = open_log_file(&crate::config::expand_path(&logging.log_file))?;
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(std::io::stdout.and(Mutex::new(file)))
            .init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }

    Ok(())
}

/// Configured level, raised to `debug`/`info` by the flags but never lowered.
/// Directive lists such as `titan_trader=trace,warn` pass through untouched.
fn effective_level<'a>(verbose: bool, debug: bool, configured: &'a str) -> &'a str {
    use tracing::level_filters::LevelFilter;

    let (floor, name) = if debug {
        (LevelFilter::DEBUG, "debug")
    } else if verbose {
        (LevelFilter::INFO, "info")
    } else {
        return configured;
    };
    match configured.trim().parse::<LevelFilter>() {
        Ok(level) if level < floor => name,
        _ => configured,
    }
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// Build the Alpaca client; missing credentials are fatal
fn connect(config: &AppConfig) -> Result<Arc<AlpacaClient>> {
    let (key, secret) = config
        .broker
        .credentials()
        .context("Brokerage credentials are required (set them in the environment or .env)")?;
    let client = AlpacaClient::new(AlpacaConfig::from_section(&config.broker, key, secret))
        .context("Failed to create brokerage client")?;
    Ok(Arc::new(client))
}

/// Stop `token` on Ctrl+C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            token.cancel();
        }
    });
}

/// Handle score command
async fn score_command(cmd: ScoreCmd, config: AppConfig) -> Result<()> {
    if config.universe.is_empty() {
        bail!("Universe is empty: add [[universe]] entries to {}", cmd.config.display());
    }

    let client = connect(&config)?;
    let source: Arc<dyn BarSource> = client;
    let gate = ApprovalGate::new(
        source,
        WinProbabilityModel::new(FeatureEngine::default(), config.approval.model.clone()),
    )
    .with_threshold(config.approval.threshold)
    .with_history(
        config.approval_interval(),
        Lookback::Window(chrono::Duration::days(config.approval.lookback_days as i64)),
    );
    let store = ApprovalStore::new(config.approval_path());

    if !cmd.repeat {
        let report = gate.run(&config.universe, &store).await?;
        print_report(&report, gate.threshold());
        return Ok(());
    }

    let token = CancellationToken::new();
    cancel_on_ctrl_c(token.clone());
    let interval = Duration::from_secs(config.approval.interval_secs);
    tracing::info!("Scoring every {:?} until Ctrl+C", interval);

    loop {
        match gate.run(&config.universe, &store).await {
            Ok(report) => print_report(&report, gate.threshold()),
            Err(e) => tracing::error!("[{}] Approval batch failed: {}", e.kind(), e),
        }
        if !token.sleep(interval).await {
            break;
        }
    }
    Ok(())
}

fn print_report(report: &ApprovalReport, threshold: f64) {
    println!("{:<8} {:>8} {:>8}  {}", "TICKER", "P(WIN)", "SAMPLES", "RESULT");
    for score in &report.scores {
        let result = match score.failure {
            Some(kind) => kind.to_string(),
            None if score.probability > threshold => "approved".to_string(),
            None => "rejected".to_string(),
        };
        println!(
            "{:<8} {:>8.3} {:>8}  {}",
            score.ticker,
            score.probability,
            score.report.as_ref().map(|r| r.samples).unwrap_or(0),
            result
        );
    }
    println!(
        "\n{} of {} approved (threshold {:.2})",
        report.approved.len(),
        report.scores.len(),
        threshold
    );
}

/// Handle run command
async fn run_command(cmd: RunCmd, config: AppConfig) -> Result<()> {
    tracing::info!("Starting Titan live loop...");
    tracing::info!("Config: {}", cmd.config.display());

    let client = connect(&config)?;
    let source: Arc<dyn BarSource> = client.clone();
    let broker: Arc<dyn BrokeragePort> = if cmd.paper {
        tracing::warn!(
            "PAPER TRADING MODE - orders fill against a simulated ${:.2} account",
            cmd.paper_cash
        );
        Arc::new(PaperBroker::new(cmd.paper_cash, source.clone()).with_clock(client))
    } else {
        client
    };

    let monitor = LiveMonitor::new(source, MonitorSettings::from_section(&config.live));
    let engine = ExecutionEngine::new(
        broker.clone(),
        ExecutionSettings::from_section(&config.execution),
    );
    let orchestrator = TradingOrchestrator::new(
        broker,
        monitor,
        engine,
        ApprovalStore::new(config.approval_path()),
    )
    .with_timing(LoopTiming::from_section(&config.live));

    orchestrator
        .verify_session()
        .await
        .context("Cannot establish a brokerage session")?;

    cancel_on_ctrl_c(orchestrator.cancel_token());
    orchestrator.run().await;

    tracing::info!("Titan stopped");
    Ok(())
}

/// Handle approved command
fn approved_command(config: AppConfig) -> Result<()> {
    let store = ApprovalStore::new(config.approval_path());
    let set = match store.try_load() {
        LoadStatus::Loaded(set) => set,
        LoadStatus::Missing => {
            println!("No approval file at {}", store.path().display());
            return Ok(());
        }
        LoadStatus::Corrupted(reason) => {
            bail!("Approval file {} is unreadable: {}", store.path().display(), reason)
        }
    };

    println!("Approved tickers ({}) in {}:", set.len(), store.path().display());
    for (ticker, record) in set.iter() {
        let exit_leg = if record.config.trail {
            format!("trail {} ticks", record.config.trail_ticks)
        } else {
            format!("stop {:.1}%", record.config.stop_loss_pct * 100.0)
        };
        println!(
            "  {:<8} score {:.3} | dev {:.2} | exit {:?} | {} | entry {:?}",
            ticker, record.score, record.config.dev, record.config.exit, exit_leg, record.config.entry_rule
        );
    }
    Ok(())
}

/// Handle init-config command
fn init_config_command(cmd: InitConfigCmd) -> Result<()> {
    if cmd.path.exists() && !cmd.force {
        bail!("{} already exists (use --force to overwrite)", cmd.path.display());
    }
    write_template(&cmd.path)
        .with_context(|| format!("Failed to write {}", cmd.path.display()))?;
    println!("Wrote config template to {}", cmd.path.display());
    Ok(())
}
