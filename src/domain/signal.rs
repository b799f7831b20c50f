//! Entry signals and the per-ticker monitor state machine

use std::fmt;

use chrono::{DateTime, Utc};

use crate::strategy::{BandPoint, EntryRule, StrategyConfig};

/// Live monitor state for one ticker within a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonitorState {
    /// No band condition observed
    #[default]
    Idle,
    /// Band condition observed, no position held
    Armed,
    /// Bracket submitted; exits are managed by the broker
    Entered,
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorState::Idle => write!(f, "IDLE"),
            MonitorState::Armed => write!(f, "ARMED"),
            MonitorState::Entered => write!(f, "ENTERED"),
        }
    }
}

/// A detected lower-band breach for a ticker not currently held.
/// Transient: built by the monitor and consumed by the execution engine in
/// the same cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEvent {
    pub ticker: String,
    /// Close of the latest bar; entry sizing and limit price use this
    pub reference_price: f64,
    /// Price that was compared against the lower band (close or low)
    pub trigger_price: f64,
    pub band: BandPoint,
    /// Approval score, used to rank candidates
    pub score: f64,
    pub config: StrategyConfig,
    /// Timestamp of the bar that triggered
    pub bar_time: DateTime<Utc>,
}

impl SignalEvent {
    /// Take-profit price before rounding
    pub fn target(&self) -> f64 {
        self.band.target(self.config.exit)
    }

    pub fn entry_rule(&self) -> EntryRule {
        self.config.entry_rule
    }
}

impl fmt::Display for SignalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} trigger={:.4} lower={:.4} sma={:.4} score={:.3}",
            self.ticker,
            self.config.entry_rule,
            self.trigger_price,
            self.band.lower,
            self.band.sma,
            self.score
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::ExitPolicy;
    use chrono::TimeZone;

    #[test]
    fn test_target_follows_exit_policy() {
        let mut event = SignalEvent {
            ticker: "XYZ".to_string(),
            reference_price: 9.7,
            trigger_price: 9.7,
            band: BandPoint::new(10.5, 0.5, 1.5),
            score: 0.4,
            config: StrategyConfig::with_dev(1.5),
            bar_time: Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap(),
        };
        assert!((event.target() - 10.5).abs() < 1e-12);

        event.config = event.config.clone().with_exit(ExitPolicy::Upper);
        assert!((event.target() - 11.25).abs() < 1e-12);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(MonitorState::default().to_string(), "IDLE");
        assert_eq!(MonitorState::Entered.to_string(), "ENTERED");
    }
}
