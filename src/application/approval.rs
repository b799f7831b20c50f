//! Approval Gate
//!
//! Batch job: score every universe ticker, keep those whose win-probability
//! clears the threshold, and replace the approval file with exactly that set.
//! A failure on one ticker is logged with the ticker and scored as 0; the
//! batch always runs to completion.

use std::sync::Arc;

use chrono::Duration;

use crate::config::UniverseEntry;
use crate::domain::{ApprovalError, ApprovalRecord, ApprovalSet, ApprovalStore, FailureKind};
use crate::ports::{BarInterval, BarSource, Lookback};
use crate::strategy::{ScoreError, ScoreReport, StrategyConfig, WinProbabilityModel};

/// Default approval threshold
pub const DEFAULT_APPROVAL_THRESHOLD: f64 = 0.30;

/// Result of scoring one ticker
#[derive(Debug, Clone)]
pub struct TickerScore {
    pub ticker: String,
    pub config: StrategyConfig,
    /// Win-probability; 0 when scoring failed
    pub probability: f64,
    /// Set when scoring failed
    pub failure: Option<FailureKind>,
    pub report: Option<ScoreReport>,
}

impl TickerScore {
    fn from_result(entry: &UniverseEntry, result: Result<ScoreReport, ScoreError>) -> Self {
        match result {
            Ok(report) => Self {
                ticker: entry.ticker.clone(),
                config: entry.config.clone(),
                probability: report.probability,
                failure: None,
                report: Some(report),
            },
            Err(e) => Self {
                ticker: entry.ticker.clone(),
                config: entry.config.clone(),
                probability: 0.0,
                failure: Some(e.kind()),
                report: None,
            },
        }
    }
}

/// Everything one batch run produced
#[derive(Debug, Clone, Default)]
pub struct ApprovalReport {
    pub scores: Vec<TickerScore>,
    pub approved: ApprovalSet,
}

impl ApprovalReport {
    pub fn failures(&self) -> usize {
        self.scores.iter().filter(|s| s.failure.is_some()).count()
    }
}

/// Keep the tickers whose probability is strictly above `threshold`
pub fn select_approved(scores: &[TickerScore], threshold: f64) -> ApprovalSet {
    let mut set = ApprovalSet::new();
    for score in scores.iter().filter(|s| s.probability > threshold) {
        set.insert(
            score.ticker.clone(),
            ApprovalRecord::new(score.config.clone(), score.probability),
        );
    }
    set
}

/// Scores a ticker universe against fresh history
pub struct ApprovalGate {
    source: Arc<dyn BarSource>,
    model: WinProbabilityModel,
    threshold: f64,
    interval: BarInterval,
    lookback: Lookback,
}

impl ApprovalGate {
    pub fn new(source: Arc<dyn BarSource>, model: WinProbabilityModel) -> Self {
        Self {
            source,
            model,
            threshold: DEFAULT_APPROVAL_THRESHOLD,
            interval: BarInterval::Hour,
            lookback: Lookback::Window(Duration::days(60)),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_history(mut self, interval: BarInterval, lookback: Lookback) -> Self {
        self.interval = interval;
        self.lookback = lookback;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Fetch history and score one ticker
    pub async fn score_ticker(
        &self,
        ticker: &str,
        config: &StrategyConfig,
    ) -> Result<ScoreReport, ScoreError> {
        let bars = self.source.get_bars(ticker, self.interval, self.lookback).await?;
        self.model.score(&bars, config)
    }

    /// Score every entry sequentially and select the approved subset
    pub async fn evaluate(&self, universe: &[UniverseEntry]) -> ApprovalReport {
        let mut scores = Vec::with_capacity(universe.len());

        for entry in universe {
            let result = self.score_ticker(&entry.ticker, &entry.config).await;
            let score = TickerScore::from_result(entry, result.map_err(|e| {
                tracing::warn!("[{}] {}: {} (probability 0)", e.kind(), entry.ticker, e);
                e
            }));

            if let Some(report) = &score.report {
                tracing::info!(
                    "{} | p={:.3} | samples={} touches={} wins={} | {}",
                    entry.ticker,
                    report.probability,
                    report.samples,
                    report.labels.events,
                    report.labels.wins,
                    if report.probability > self.threshold { "APPROVED" } else { "rejected" }
                );
            }
            scores.push(score);
        }

        let approved = select_approved(&scores, self.threshold);
        ApprovalReport { scores, approved }
    }

    /// Evaluate the universe and replace the approval file with the result
    pub async fn run(
        &self,
        universe: &[UniverseEntry],
        store: &ApprovalStore,
    ) -> Result<ApprovalReport, ApprovalError> {
        let report = self.evaluate(universe).await;
        store.save(&report.approved)?;

        tracing::info!(
            "Approval batch complete: {}/{} approved, {} failed (threshold {:.2})",
            report.approved.len(),
            report.scores.len(),
            report.failures(),
            self.threshold
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Bar;
    use crate::ports::mocks::MockBarSource;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn entry(ticker: &str) -> UniverseEntry {
        UniverseEntry {
            ticker: ticker.to_string(),
            config: StrategyConfig::with_dev(1.5),
        }
    }

    fn score(ticker: &str, probability: f64) -> TickerScore {
        TickerScore {
            ticker: ticker.to_string(),
            config: StrategyConfig::default(),
            probability,
            failure: None,
            report: None,
        }
    }

    fn oscillating(n: usize) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2026, 1, 5, 14, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let t = i as f64;
                let close = 50.0 + (t * 0.45).sin() * 2.0 + (t * 0.13).cos();
                Bar::new(
                    start + Duration::hours(i as i64),
                    close,
                    close + 0.4,
                    close - 0.4,
                    close,
                    10_000.0 + ((i * 37) % 11) as f64 * 500.0,
                )
            })
            .collect()
    }

    #[test]
    fn test_threshold_is_strict() {
        let scores = vec![score("A", 0.30), score("B", 0.31), score("C", 0.0)];
        let set = select_approved(&scores, 0.30);
        assert_eq!(set.tickers().collect::<Vec<_>>(), vec!["B"]);
        assert!((set.get("B").unwrap().score - 0.31).abs() < 1e-12);
    }

    #[test]
    fn test_approval_monotonic_in_threshold() {
        let scores: Vec<TickerScore> = [0.05, 0.2, 0.3, 0.31, 0.5, 0.77, 0.99]
            .iter()
            .enumerate()
            .map(|(i, p)| score(&format!("T{}", i), *p))
            .collect();

        let mut previous = usize::MAX;
        for step in 0..=20 {
            let threshold = step as f64 * 0.05;
            let approved = select_approved(&scores, threshold);
            assert!(approved.len() <= previous);
            // every ticker approved at a higher threshold was approved at this one
            let lower = select_approved(&scores, (threshold - 0.05).max(0.0));
            assert!(approved.tickers().all(|t| lower.contains(t)));
            previous = approved.len();
        }
    }

    #[tokio::test]
    async fn test_failures_score_zero_and_batch_continues() {
        let source = MockBarSource::new()
            .with_bars("GOOD", oscillating(300))
            .with_bars("SHORT", oscillating(30))
            .with_failure("DOWN");
        let gate = ApprovalGate::new(Arc::new(source), WinProbabilityModel::default())
            .with_threshold(0.0);

        let report = gate
            .evaluate(&[entry("SHORT"), entry("DOWN"), entry("GOOD")])
            .await;

        assert_eq!(report.scores.len(), 3);
        assert_eq!(report.scores[0].failure, Some(FailureKind::DataInsufficient));
        assert_eq!(report.scores[0].probability, 0.0);
        assert_eq!(report.scores[1].failure, Some(FailureKind::BrokerCallFailure));
        assert!(report.scores[2].failure.is_none());
        assert_eq!(report.failures(), 2);

        // failed tickers never clear the gate, even at threshold 0
        assert!(!report.approved.contains("SHORT"));
        assert!(!report.approved.contains("DOWN"));
    }

    #[tokio::test]
    async fn test_run_replaces_file() {
        let dir = tempdir().unwrap();
        let store = ApprovalStore::new(dir.path().join("approved.json"));

        let mut stale = ApprovalSet::new();
        stale.insert("OLD", ApprovalRecord::new(StrategyConfig::default(), 0.9));
        store.save(&stale).unwrap();

        let source = MockBarSource::new().with_bars("SHORT", oscillating(10));
        let gate = ApprovalGate::new(Arc::new(source), WinProbabilityModel::default());
        let report = gate.run(&[entry("SHORT")], &store).await.unwrap();

        assert!(report.approved.is_empty());
        let on_disk = store.load().unwrap().unwrap();
        assert!(on_disk.is_empty());
    }
}
