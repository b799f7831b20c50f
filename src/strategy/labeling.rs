//! Triple-Barrier Label Generator
//!
//! For each feature row `i` with a full 5-bar lookahead:
//!
//! - if the bar's low touched the lower band, open a virtual long at its close
//!   with target = SMA (MEDIAN) or Upper (UPPER) and stop = close * (1 - stop_loss_pct)
//! - scan bars i+1..=i+5; the target is checked before the stop on each bar,
//!   so a bar that reaches both resolves as a win
//! - neither barrier inside the horizon is a timeout, labelled 0
//! - rows that never touched the band are non-events, labelled 0 without a scan
//!
//! The last `horizon` rows never receive a label.

use crate::strategy::features::FeatureRow;
use crate::strategy::params::{ExitPolicy, StrategyConfig};

/// Forward horizon in bars
pub const LABEL_HORIZON: usize = 5;

/// How a row's virtual trade resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelOutcome {
    /// Target reached first
    Win { bars_held: usize },
    /// Stop reached first
    Loss { bars_held: usize },
    /// Neither barrier within the horizon
    Timeout,
    /// Band not touched, no trade opened
    NoEvent,
}

impl LabelOutcome {
    /// Binary training label
    pub fn label(&self) -> u8 {
        match self {
            LabelOutcome::Win { .. } => 1,
            _ => 0,
        }
    }

    pub fn is_event(&self) -> bool {
        !matches!(self, LabelOutcome::NoEvent)
    }
}

/// Outcome counts for logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelSummary {
    pub rows: usize,
    pub events: usize,
    pub wins: usize,
    pub losses: usize,
    pub timeouts: usize,
}

impl LabelSummary {
    pub fn from_outcomes(outcomes: &[LabelOutcome]) -> Self {
        let mut summary = Self {
            rows: outcomes.len(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                LabelOutcome::Win { .. } => summary.wins += 1,
                LabelOutcome::Loss { .. } => summary.losses += 1,
                LabelOutcome::Timeout => summary.timeouts += 1,
                LabelOutcome::NoEvent => continue,
            }
            summary.events += 1;
        }
        summary
    }

    /// Fraction of band touches that won; 0 when there were none
    pub fn win_rate(&self) -> f64 {
        if self.events == 0 {
            0.0
        } else {
            self.wins as f64 / self.events as f64
        }
    }
}

/// Triple-barrier labeler bound to one asset's exit and stop parameters
#[derive(Debug, Clone, Copy)]
pub struct TripleBarrierLabeler {
    horizon: usize,
    exit: ExitPolicy,
    stop_loss_pct: f64,
}

impl TripleBarrierLabeler {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            horizon: LABEL_HORIZON,
            exit: config.exit,
            stop_loss_pct: config.stop_loss_pct,
        }
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Outcome for every row that has a full lookahead.
    /// The result has `rows.len() - horizon` entries (or none).
    pub fn outcomes(&self, rows: &[FeatureRow]) -> Vec<LabelOutcome> {
        let labelled = rows.len().saturating_sub(self.horizon);
        (0..labelled).map(|i| self.outcome_at(rows, i)).collect()
    }

    /// Binary labels aligned with the first `rows.len() - horizon` rows
    pub fn labels(&self, rows: &[FeatureRow]) -> Vec<u8> {
        self.outcomes(rows).iter().map(LabelOutcome::label).collect()
    }

    fn outcome_at(&self, rows: &[FeatureRow], i: usize) -> LabelOutcome {
        let row = &rows[i];
        if row.bar.low > row.band.lower {
            return LabelOutcome::NoEvent;
        }

        let entry = row.bar.close;
        let target = row.band.target(self.exit);
        let stop = entry * (1.0 - self.stop_loss_pct);

        for j in 1..=self.horizon {
            let Some(next) = rows.get(i + j) else { break };
            if next.bar.high >= target {
                return LabelOutcome::Win { bars_held: j };
            }
            if next.bar.low <= stop {
                return LabelOutcome::Loss { bars_held: j };
            }
        }
        LabelOutcome::Timeout
    }
}
