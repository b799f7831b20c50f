//! Strategy Parameters
//!
//! Per-asset parameters shared by the approval batch and the live loop.
//! A config is immutable for the duration of a cycle; the live loop swaps in
//! a fresh snapshot whenever the approval file is reloaded.

use serde::{Deserialize, Serialize};

/// Default fixed stop distance below entry (5%)
pub const DEFAULT_STOP_LOSS_PCT: f64 = 0.05;

/// Take-profit target policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExitPolicy {
    /// Exit at the rolling mean (middle band)
    #[default]
    Median,
    /// Exit at the upper band
    Upper,
}

/// Which price of the latest bar must breach the lower band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryRule {
    /// Bar close at or below the lower band
    #[default]
    Close,
    /// Bar low at or below the lower band
    Touch,
}

/// Per-asset strategy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Band width in standard deviations
    pub dev: f64,
    /// Take-profit policy
    #[serde(default)]
    pub exit: ExitPolicy,
    /// Use a trailing stop instead of a fixed stop
    #[serde(default)]
    pub trail: bool,
    /// Trailing distance in ticks (amount = ticks x tick size)
    #[serde(default)]
    pub trail_ticks: u32,
    /// Fixed stop distance as a fraction of entry; also the labeling stop
    #[serde(default = "default_stop_loss_pct", alias = "trail_pct", alias = "sl")]
    pub stop_loss_pct: f64,
    /// Entry trigger rule
    #[serde(default, alias = "entry")]
    pub entry_rule: EntryRule,
}

fn default_stop_loss_pct() -> f64 {
    DEFAULT_STOP_LOSS_PCT
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            dev: 2.0,
            exit: ExitPolicy::Median,
            trail: false,
            trail_ticks: 0,
            stop_loss_pct: DEFAULT_STOP_LOSS_PCT,
            entry_rule: EntryRule::Close,
        }
    }
}

impl StrategyConfig {
    /// Create a config with the given band width and defaults elsewhere
    pub fn with_dev(dev: f64) -> Self {
        Self {
            dev,
            ..Default::default()
        }
    }

    pub fn with_exit(mut self, exit: ExitPolicy) -> Self {
        self.exit = exit;
        self
    }

    pub fn with_trailing(mut self, ticks: u32) -> Self {
        self.trail = true;
        self.trail_ticks = ticks;
        self
    }

    pub fn with_stop_loss(mut self, pct: f64) -> Self {
        self.stop_loss_pct = pct;
        self
    }

    pub fn with_entry_rule(mut self, rule: EntryRule) -> Self {
        self.entry_rule = rule;
        self
    }

    /// Trailing distance in price units
    pub fn trail_amount(&self, tick_size: f64) -> f64 {
        self.trail_ticks as f64 * tick_size
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.dev > 0.0 && self.dev <= 5.0) {
            return Err(ConfigError::InvalidDev(self.dev));
        }
        if !(self.stop_loss_pct > 0.0 && self.stop_loss_pct <= 0.5) {
            return Err(ConfigError::InvalidStopLoss(self.stop_loss_pct));
        }
        if self.trail && self.trail_ticks == 0 {
            return Err(ConfigError::InvalidTrail);
        }
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid band width: {0} (must be 0 < dev <= 5)")]
    InvalidDev(f64),
    #[error("Invalid stop loss: {0} (must be 0 < pct <= 0.5)")]
    InvalidStopLoss(f64),
    #[error("Trailing stop enabled with zero trail_ticks")]
    InvalidTrail,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StrategyConfig::default();
        assert_eq!(config.dev, 2.0);
        assert_eq!(config.exit, ExitPolicy::Median);
        assert!(!config.trail);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = StrategyConfig::with_dev(1.5)
            .with_exit(ExitPolicy::Upper)
            .with_trailing(30)
            .with_entry_rule(EntryRule::Touch);
        assert_eq!(config.dev, 1.5);
        assert_eq!(config.exit, ExitPolicy::Upper);
        assert!(config.trail);
        assert!((config.trail_amount(0.01) - 0.30).abs() < 1e-12);
        assert_eq!(config.entry_rule, EntryRule::Touch);
    }

    #[test]
    fn test_invalid_dev() {
        let config = StrategyConfig::with_dev(0.0);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidDev(_))));
        let config = StrategyConfig::with_dev(f64::NAN);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidDev(_))));
    }

    #[test]
    fn test_invalid_stop_and_trail() {
        let config = StrategyConfig::with_dev(1.5).with_stop_loss(0.9);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidStopLoss(_))));

        let mut config = StrategyConfig::with_dev(1.5);
        config.trail = true;
        assert_eq!(config.validate(), Err(ConfigError::InvalidTrail));
    }

    #[test]
    fn test_deserialize_with_aliases() {
        let json = r#"{"dev": 1.5, "exit": "MEDIAN", "trail_pct": 0.05}"#;
        let config: StrategyConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.dev, 1.5);
        assert_eq!(config.stop_loss_pct, 0.05);
        assert_eq!(config.entry_rule, EntryRule::Close);
        assert!(!config.trail);

        let json = r#"{"dev": 2.0, "sl": 0.04, "exit": "UPPER", "trail": true, "trail_ticks": 20, "entry": "TOUCH"}"#;
        let config: StrategyConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.stop_loss_pct, 0.04);
        assert_eq!(config.exit, ExitPolicy::Upper);
        assert_eq!(config.trail_ticks, 20);
        assert_eq!(config.entry_rule, EntryRule::Touch);
    }

    #[test]
    fn test_serialize_uses_wire_names() {
        let config = StrategyConfig::with_dev(1.5).with_exit(ExitPolicy::Upper);
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["exit"], "UPPER");
        assert_eq!(value["entry_rule"], "CLOSE");
        assert_eq!(value["stop_loss_pct"], 0.05);
    }
}
