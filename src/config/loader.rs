//! Configuration Loader
//!
//! Loads the application config from a TOML file, applies `TITAN__SECTION__KEY`
//! environment overrides, and validates the result. Every section has
//! defaults, so a file only needs to name what it changes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{EntryOrderKind, TimeInForce, DEFAULT_APPROVAL_FILE};
use crate::ports::BarInterval;
use crate::strategy::{BoostingParams, EntryRule, ExitPolicy, StrategyConfig, DEFAULT_BAND_WINDOW};

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "TITAN";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub approval: ApprovalSection,
    #[serde(default)]
    pub live: LiveSection,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub logging: LoggingSection,
    /// Candidate tickers scored by the approval batch
    #[serde(default)]
    pub universe: Vec<UniverseEntry>,
}

/// Approval batch configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalSection {
    /// Approve iff win-probability > threshold
    pub threshold: f64,
    /// Shared approval file
    pub approval_file: String,
    /// Training bar size ("1h")
    pub bar_interval: String,
    /// Training history in days
    pub lookback_days: u32,
    /// Cadence for `score --repeat`
    pub interval_secs: u64,
    pub model: BoostingParams,
}

impl Default for ApprovalSection {
    fn default() -> Self {
        Self {
            threshold: 0.30,
            approval_file: DEFAULT_APPROVAL_FILE.to_string(),
            bar_interval: "1h".to_string(),
            lookback_days: 60,
            interval_secs: 3600,
            model: BoostingParams::default(),
        }
    }
}

/// Price series the live bands are computed over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandSource {
    #[default]
    Close,
    /// (High + Low + Close) / 3
    Typical,
}

/// Live loop configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveSection {
    pub poll_interval_secs: u64,
    /// Sleep after a failed cycle
    pub error_backoff_secs: u64,
    /// Sleep while the market is closed
    pub market_closed_sleep_secs: u64,
    /// Approval file reload cadence
    pub reload_interval_secs: u64,
    /// Raw bar size polled from the broker ("1m")
    pub bar_interval: String,
    /// Raw bars requested per poll
    pub bar_limit: usize,
    /// Resampled bar size in minutes
    pub resample_minutes: u32,
    pub band_window: usize,
    pub band_source: BandSource,
}

impl Default for LiveSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            error_backoff_secs: 30,
            market_closed_sleep_secs: 900,
            reload_interval_secs: 900,
            bar_interval: "1m".to_string(),
            bar_limit: 100,
            resample_minutes: 5,
            band_window: DEFAULT_BAND_WINDOW,
            band_source: BandSource::Close,
        }
    }
}

/// Position sizing mode
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SizingMode {
    /// Single best-scored candidate takes `fraction` of buying power
    BuyingPowerFraction { fraction: f64, min_buying_power: f64 },
    /// Every candidate gets `allocation` of a fixed notional account
    FixedNotional { account_size: f64, allocation: f64 },
}

impl Default for SizingMode {
    fn default() -> Self {
        SizingMode::BuyingPowerFraction {
            fraction: 0.95,
            min_buying_power: 500.0,
        }
    }
}

/// Order execution configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSection {
    pub sizing: SizingMode,
    pub entry_order: EntryOrderKind,
    /// Decimal places for limit and stop prices
    pub price_precision: u32,
    /// Minimum price increment; trailing amount = trail_ticks x tick_size
    pub tick_size: f64,
    pub time_in_force: TimeInForce,
    /// How long a submitted entry counts as held before the broker reports it
    pub pending_ttl_secs: u64,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            sizing: SizingMode::default(),
            entry_order: EntryOrderKind::Market,
            price_precision: 2,
            tick_size: 0.01,
            time_in_force: TimeInForce::Day,
            pending_ttl_secs: 900,
        }
    }
}

/// Brokerage API configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSection {
    /// Trading API base URL
    pub trading_url: String,
    /// Market data API base URL
    pub data_url: String,
    /// Data feed ("iex" or "sip")
    pub feed: String,
    /// Environment variable holding the API key id
    pub key_env: String,
    /// Environment variable holding the API secret
    pub secret_env: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            trading_url: "https://paper-api.alpaca.markets".to_string(),
            data_url: "https://data.alpaca.markets".to_string(),
            feed: "iex".to_string(),
            key_env: "ALPACA_KEY".to_string(),
            secret_env: "ALPACA_SECRET".to_string(),
            timeout_secs: 10,
            max_retries: 3,
        }
    }
}

impl BrokerSection {
    /// Read the API credentials from the configured environment variables
    pub fn credentials(&self) -> Result<(String, String), ConfigError> {
        let key = read_env(&self.key_env)?;
        let secret = read_env(&self.secret_env)?;
        Ok((key, secret))
    }
}

fn read_env(name: &str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingCredential(name.to_string())),
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Log to file (in addition to stdout)
    pub log_to_file: bool,
    pub log_file: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_file: false,
            log_file: "logs/titan.log".to_string(),
        }
    }
}

/// One candidate ticker with the parameters it is scored and traded with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseEntry {
    pub ticker: String,
    #[serde(flatten)]
    pub config: StrategyConfig,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    LoadError(#[from] config::ConfigError),
    #[error("Failed to write config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to serialize TOML: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Missing credential: environment variable {0} is not set")]
    MissingCredential(String),
}

/// Load configuration from a TOML file plus environment overrides
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig, ConfigError> {
    let path = expand_path(&path.as_ref().to_string_lossy());
    let settings = config::Config::builder()
        .add_source(config::File::from(path.as_path()).format(config::FileFormat::Toml))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config: AppConfig = settings.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

/// Expand `~` and environment variables in a configured path
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(raw).as_ref()),
    }
}

impl AppConfig {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Approval section
        if !(self.approval.threshold >= 0.0 && self.approval.threshold < 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "approval.threshold must be in [0, 1), got {}",
                self.approval.threshold
            )));
        }
        if self.approval.approval_file.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "approval.approval_file cannot be empty".to_string(),
            ));
        }
        if self.approval.lookback_days == 0 {
            return Err(ConfigError::ValidationError(
                "approval.lookback_days must be > 0".to_string(),
            ));
        }
        parse_interval("approval.bar_interval", &self.approval.bar_interval)?;
        self.approval
            .model
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("approval.model: {}", e)))?;

        // Live section
        parse_interval("live.bar_interval", &self.live.bar_interval)?;
        if self.live.poll_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "live.poll_interval_secs must be > 0".to_string(),
            ));
        }
        if self.live.band_window < 2 {
            return Err(ConfigError::ValidationError(format!(
                "live.band_window must be >= 2, got {}",
                self.live.band_window
            )));
        }
        if self.live.resample_minutes == 0 {
            return Err(ConfigError::ValidationError(
                "live.resample_minutes must be > 0".to_string(),
            ));
        }

        // Execution section
        match self.execution.sizing {
            SizingMode::BuyingPowerFraction { fraction, min_buying_power } => {
                if !(fraction > 0.0 && fraction <= 1.0) {
                    return Err(ConfigError::ValidationError(format!(
                        "execution.sizing.fraction must be in (0, 1], got {}",
                        fraction
                    )));
                }
                if min_buying_power < 0.0 {
                    return Err(ConfigError::ValidationError(format!(
                        "execution.sizing.min_buying_power must be >= 0, got {}",
                        min_buying_power
                    )));
                }
            }
            SizingMode::FixedNotional { account_size, allocation } => {
                if account_size <= 0.0 {
                    return Err(ConfigError::ValidationError(format!(
                        "execution.sizing.account_size must be > 0, got {}",
                        account_size
                    )));
                }
                if !(allocation > 0.0 && allocation <= 1.0) {
                    return Err(ConfigError::ValidationError(format!(
                        "execution.sizing.allocation must be in (0, 1], got {}",
                        allocation
                    )));
                }
            }
        }
        if self.execution.tick_size <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "execution.tick_size must be > 0, got {}",
                self.execution.tick_size
            )));
        }
        if self.execution.price_precision > 8 {
            return Err(ConfigError::ValidationError(format!(
                "execution.price_precision must be <= 8, got {}",
                self.execution.price_precision
            )));
        }

        // Broker section
        if self.broker.trading_url.is_empty() || self.broker.data_url.is_empty() {
            return Err(ConfigError::ValidationError(
                "broker URLs cannot be empty".to_string(),
            ));
        }

        // Universe
        for entry in &self.universe {
            if entry.ticker.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "universe ticker cannot be empty".to_string(),
                ));
            }
            entry.config.validate().map_err(|e| {
                ConfigError::ValidationError(format!("universe {}: {}", entry.ticker, e))
            })?;
        }

        Ok(())
    }

    pub fn approval_path(&self) -> PathBuf {
        expand_path(&self.approval.approval_file)
    }

    pub fn log_path(&self) -> PathBuf {
        expand_path(&self.logging.log_file)
    }

    pub fn approval_interval(&self) -> BarInterval {
        BarInterval::parse(&self.approval.bar_interval).unwrap_or(BarInterval::Hour)
    }

    pub fn live_interval(&self) -> BarInterval {
        BarInterval::parse(&self.live.bar_interval).unwrap_or(BarInterval::Minute)
    }

    /// Starter config written by `init-config`
    pub fn template() -> Self {
        Self {
            universe: vec![
                UniverseEntry {
                    ticker: "SPY".to_string(),
                    config: StrategyConfig::with_dev(2.0),
                },
                UniverseEntry {
                    ticker: "AAPL".to_string(),
                    config: StrategyConfig::with_dev(1.5)
                        .with_exit(ExitPolicy::Upper)
                        .with_entry_rule(EntryRule::Touch),
                },
            ],
            ..Default::default()
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Write the template config to `path`, creating parent directories
pub fn write_template(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, AppConfig::template().to_toml()?)?;
    Ok(())
}

fn parse_interval(field: &str, value: &str) -> Result<BarInterval, ConfigError> {
    BarInterval::parse(value).ok_or_else(|| {
        ConfigError::ValidationError(format!("{} is not a supported bar size: {:?}", field, value))
    })
}
