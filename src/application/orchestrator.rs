//! Trading Orchestrator
//!
//! The live loop. Each tick:
//!
//! 1. reload the approval snapshot if the reload interval has elapsed
//! 2. ask the broker whether the market is open
//! 3. fetch held positions and clear settled pending entries
//! 4. poll every approved ticker that is neither held nor pending
//! 5. hand the signals to the execution engine
//!
//! Per-ticker failures are logged and skipped. An unreachable clock counts as
//! open, a positions failure falls back to the last known holdings, and a
//! buying-power failure skips execution for the tick. Only a positions
//! failure with nothing to fall back on fails the tick; `run` then sleeps
//! the error back-off and tries again.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::RwLock;

use crate::application::cancel::CancellationToken;
use crate::application::execution::{ExecutionEngine, ExecutionOutcome};
use crate::application::monitor::{LiveMonitor, MonitorOutcome};
use crate::config::LiveSection;
use crate::domain::{ApprovalSet, ApprovalStore, FailureKind, MonitorState, SignalEvent};
use crate::ports::{BrokerError, BrokeragePort};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Broker call failed: {0}")]
    Broker(#[from] BrokerError),
}

impl CycleError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CycleError::Broker(e) => e.kind(),
        }
    }
}

/// Loop cadences
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopTiming {
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub market_closed_sleep: Duration,
    pub reload_interval: Duration,
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self::from_section(&LiveSection::default())
    }
}

impl LoopTiming {
    pub fn from_section(section: &LiveSection) -> Self {
        Self {
            poll_interval: Duration::from_secs(section.poll_interval_secs),
            error_backoff: Duration::from_secs(section.error_backoff_secs),
            market_closed_sleep: Duration::from_secs(section.market_closed_sleep_secs),
            reload_interval: Duration::from_secs(section.reload_interval_secs),
        }
    }
}

/// What one tick did
#[derive(Debug, Default)]
pub struct CycleReport {
    pub market_open: bool,
    /// Tickers polled this tick
    pub polled: usize,
    /// Tickers skipped because they are held or have an entry pending
    pub skipped: usize,
    pub signals: Vec<SignalEvent>,
    pub outcomes: Vec<(String, ExecutionOutcome)>,
    /// Tickers whose poll failed
    pub failed: Vec<String>,
}

impl CycleReport {
    pub fn submitted(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_submitted()).count()
    }
}

/// Status snapshot of the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorStatus {
    pub is_running: bool,
    pub approved: Vec<String>,
    pub cycles: u64,
}

struct ApprovalSnapshot {
    set: Arc<ApprovalSet>,
    loaded_at: Option<Instant>,
}

/// Main live orchestrator that coordinates monitoring and execution
pub struct TradingOrchestrator {
    broker: Arc<dyn BrokeragePort>,
    monitor: LiveMonitor,
    engine: ExecutionEngine,
    store: ApprovalStore,
    timing: LoopTiming,
    snapshot: RwLock<ApprovalSnapshot>,
    last_positions: RwLock<Option<HashSet<String>>>,
    cancel: CancellationToken,
    is_running: AtomicBool,
    cycles: AtomicU64,
}

impl TradingOrchestrator {
    pub fn new(
        broker: Arc<dyn BrokeragePort>,
        monitor: LiveMonitor,
        engine: ExecutionEngine,
        store: ApprovalStore,
    ) -> Self {
        Self {
            broker,
            monitor,
            engine,
            store,
            timing: LoopTiming::default(),
            snapshot: RwLock::new(ApprovalSnapshot {
                set: Arc::new(ApprovalSet::new()),
                loaded_at: None,
            }),
            last_positions: RwLock::new(None),
            cancel: CancellationToken::new(),
            is_running: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
        }
    }

    pub fn with_timing(mut self, timing: LoopTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn timing(&self) -> LoopTiming {
        self.timing
    }

    /// Confirm the brokerage session works before entering the loop
    pub async fn verify_session(&self) -> Result<f64, CycleError> {
        let buying_power = self.broker.get_buying_power().await?;
        tracing::info!("Brokerage session OK, buying power {:.2}", buying_power);
        Ok(buying_power)
    }

    /// Re-read the approval file now, regardless of the reload interval.
    ///
    /// Trailing-stop records are dropped when the broker cannot take them.
    pub async fn reload_approvals(&self) -> Arc<ApprovalSet> {
        let mut set = self.store.load_or_empty();
        if !self.broker.supports_trailing_stop() {
            set.retain(|ticker, record| {
                if record.config.trail {
                    tracing::warn!(
                        "[{}] {} | trailing stop not supported by this broker; ticker not watched",
                        FailureKind::ConfigMissing,
                        ticker
                    );
                }
                !record.config.trail
            });
        }
        let set = Arc::new(set);
        tracing::info!(
            "Approval set reloaded: {} ticker(s) [{}]",
            set.len(),
            set.tickers().collect::<Vec<_>>().join(", ")
        );

        let mut snapshot = self.snapshot.write().await;
        snapshot.set = Arc::clone(&set);
        snapshot.loaded_at = Some(Instant::now());
        set
    }

    /// Current snapshot, reloaded first if it is due
    async fn approvals(&self) -> Arc<ApprovalSet> {
        {
            let snapshot = self.snapshot.read().await;
            let fresh = snapshot
                .loaded_at
                .map(|t| t.elapsed() < self.timing.reload_interval)
                .unwrap_or(false);
            if fresh {
                return Arc::clone(&snapshot.set);
            }
        }
        self.reload_approvals().await
    }

    /// Run the live loop until cancelled
    pub async fn run(&self) {
        self.is_running.store(true, Ordering::SeqCst);
        tracing::info!(
            "Starting live loop - poll {:?}, reload {:?}, approvals {}",
            self.timing.poll_interval,
            self.timing.reload_interval,
            self.store.path().display()
        );

        while !self.cancel.is_cancelled() {
            let pause = match self.tick().await {
                Ok(report) if !report.market_open => {
                    tracing::info!(
                        "Market closed; sleeping {:?}",
                        self.timing.market_closed_sleep
                    );
                    self.timing.market_closed_sleep
                }
                Ok(_) => self.timing.poll_interval,
                Err(e) => {
                    tracing::error!(
                        "[{}] Cycle failed: {}; retrying in {:?}",
                        e.kind(),
                        e,
                        self.timing.error_backoff
                    );
                    self.timing.error_backoff
                }
            };

            if !self.cancel.sleep(pause).await {
                break;
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        tracing::info!("Live loop stopped");
    }

    /// Execute one live cycle
    pub async fn tick(&self) -> Result<CycleReport, CycleError> {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        let approvals = self.approvals().await;

        let market_open = match self.broker.is_market_open().await {
            Ok(open) => open,
            Err(e) => {
                tracing::warn!(
                    "[{}] Market clock unavailable: {}; assuming open",
                    e.kind(),
                    e
                );
                true
            }
        };
        let mut report = CycleReport {
            market_open,
            ..Default::default()
        };
        if !report.market_open {
            return Ok(report);
        }

        let positions = self.positions().await?;
        self.engine.reconcile_pending(&positions).await;

        for (ticker, record) in approvals.iter() {
            if self.cancel.is_cancelled() {
                break;
            }
            if positions.contains(ticker) || self.engine.is_pending(ticker).await {
                tracing::debug!("{} | {}", ticker, MonitorState::Entered);
                report.skipped += 1;
                continue;
            }

            report.polled += 1;
            match self.monitor.poll(ticker, record).await {
                Ok(outcome) => {
                    log_monitor_outcome(ticker, &outcome);
                    if let MonitorOutcome::Signal(signal) = outcome {
                        report.signals.push(signal);
                    }
                }
                Err(e) => {
                    tracing::warn!("[{}] {} | bar poll failed: {}", FailureKind::BrokerCallFailure, ticker, e);
                    report.failed.push(ticker.to_string());
                }
            }
        }

        if report.signals.is_empty() {
            return Ok(report);
        }

        let buying_power = match self.broker.get_buying_power().await {
            Ok(amount) => amount,
            Err(e) => {
                tracing::warn!(
                    "[{}] Buying power unavailable: {}; {} signal(s) not executed",
                    e.kind(),
                    e,
                    report.signals.len()
                );
                return Ok(report);
            }
        };
        report.outcomes = self
            .engine
            .execute(&report.signals, &positions, buying_power)
            .await;

        tracing::info!(
            "Cycle: {} polled, {} skipped, {} signal(s), {} submitted",
            report.polled,
            report.skipped,
            report.signals.len(),
            report.submitted()
        );
        Ok(report)
    }

    /// Held tickers from the broker, or the last set it reported
    async fn positions(&self) -> Result<HashSet<String>, CycleError> {
        match self.broker.get_positions().await {
            Ok(positions) => {
                *self.last_positions.write().await = Some(positions.clone());
                Ok(positions)
            }
            Err(e) => match self.last_positions.read().await.clone() {
                Some(stale) => {
                    tracing::warn!(
                        "[{}] Positions unavailable: {}; using last known {} holding(s)",
                        e.kind(),
                        e,
                        stale.len()
                    );
                    Ok(stale)
                }
                None => Err(e.into()),
            },
        }
    }

    /// Stop the live loop
    pub fn stop(&self) {
        self.cancel.cancel();
        tracing::info!("Stop signal sent to orchestrator");
    }

    pub async fn status(&self) -> OrchestratorStatus {
        let snapshot = self.snapshot.read().await;
        OrchestratorStatus {
            is_running: self.is_running.load(Ordering::SeqCst),
            approved: snapshot.set.tickers().map(str::to_string).collect(),
            cycles: self.cycles.load(Ordering::Relaxed),
        }
    }
}

fn log_monitor_outcome(ticker: &str, outcome: &MonitorOutcome) {
    match outcome {
        MonitorOutcome::Signal(signal) => tracing::info!(
            "{} | {} | {:?} {:.4} <= lower {:.4} (sma {:.4}, std {:.4}) | target {:.4}",
            ticker,
            outcome.state(),
            signal.entry_rule(),
            signal.trigger_price,
            signal.band.lower,
            signal.band.sma,
            signal.band.std,
            signal.target()
        ),
        MonitorOutcome::NoSignal { trigger_price, band } => tracing::info!(
            "{} | {} | price {:.4} lower {:.4} sma {:.4}",
            ticker,
            outcome.state(),
            trigger_price,
            band.lower,
            band.sma
        ),
        MonitorOutcome::Insufficient { bars, required } => tracing::warn!(
            "[{}] {} | {} resampled bars, need {}",
            FailureKind::DataInsufficient,
            ticker,
            bars,
            required
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::execution::ExecutionSettings;
    use crate::application::monitor::MonitorSettings;
    use crate::domain::{ApprovalRecord, Bar};
    use crate::ports::mocks::{MockBarSource, MockBroker};
    use crate::strategy::StrategyConfig;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use tempfile::{tempdir, TempDir};

    /// 20 five-minute bars: mean 10.5, std 0.5, last close `last`
    fn bars_ending_at(last: f64) -> Vec<Bar> {
        let d = last - 10.5;
        let e = ((4.75 - 2.0 * d * d) / 18.0).sqrt();
        let mut closes: Vec<f64> = (0..18)
            .map(|i| if i % 2 == 0 { 10.5 + e } else { 10.5 - e })
            .collect();
        closes.push(10.5 - d);
        closes.push(last);

        let start = Utc.with_ymd_and_hms(2026, 3, 2, 14, 30, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar::new(start + ChronoDuration::minutes(5 * i as i64), c, c, c, c, 100.0))
            .collect()
    }

    struct Fixture {
        _dir: TempDir,
        store: ApprovalStore,
        source: MockBarSource,
        broker: MockBroker,
    }

    impl Fixture {
        fn new(broker: MockBroker) -> Self {
            let dir = tempdir().unwrap();
            let store = ApprovalStore::new(dir.path().join("approved.json"));
            let mut set = ApprovalSet::new();
            set.insert("XYZ", ApprovalRecord::new(StrategyConfig::with_dev(1.5), 0.4));
            store.save(&set).unwrap();

            Self {
                _dir: dir,
                store,
                source: MockBarSource::new().with_bars("XYZ", bars_ending_at(9.7)),
                broker,
            }
        }

        fn orchestrator(&self) -> TradingOrchestrator {
            let broker: Arc<dyn BrokeragePort> = Arc::new(self.broker.clone());
            TradingOrchestrator::new(
                Arc::clone(&broker),
                LiveMonitor::new(Arc::new(self.source.clone()), MonitorSettings::default()),
                ExecutionEngine::new(broker, ExecutionSettings::default()),
                self.store.clone(),
            )
        }
    }

    #[tokio::test]
    async fn test_tick_submits_on_signal() {
        let fx = Fixture::new(MockBroker::new().with_buying_power(1000.0));
        let report = fx.orchestrator().tick().await.unwrap();

        assert!(report.market_open);
        assert_eq!(report.polled, 1);
        assert_eq!(report.signals.len(), 1);
        assert_eq!(report.submitted(), 1);
        assert_eq!(fx.broker.get_submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_market_closed_skips_polling() {
        let fx = Fixture::new(MockBroker::new().with_buying_power(1000.0).with_market_open(false));
        let report = fx.orchestrator().tick().await.unwrap();

        assert!(!report.market_open);
        assert!(fx.source.get_calls().is_empty());
        assert!(fx.broker.get_submissions().is_empty());
    }

    #[tokio::test]
    async fn test_held_ticker_not_polled() {
        let fx = Fixture::new(MockBroker::new().with_buying_power(1000.0).with_position("XYZ"));
        let report = fx.orchestrator().tick().await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.polled, 0);
        assert!(fx.source.get_calls().is_empty());
    }

    #[tokio::test]
    async fn test_consecutive_ticks_enter_once() {
        let fx = Fixture::new(MockBroker::new().with_buying_power(1000.0).with_fill_on_submit());
        let orchestrator = fx.orchestrator();

        orchestrator.tick().await.unwrap();
        let second = orchestrator.tick().await.unwrap();

        assert_eq!(second.skipped, 1);
        assert_eq!(fx.broker.get_submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_unfilled_entry_not_duplicated() {
        // no fill reported: the pending guard keeps the ticker out
        let fx = Fixture::new(MockBroker::new().with_buying_power(1000.0));
        let orchestrator = fx.orchestrator();

        orchestrator.tick().await.unwrap();
        orchestrator.tick().await.unwrap();
        assert_eq!(fx.broker.get_submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_broker_failure_fails_tick() {
        // no holdings seen yet, so there is nothing to fall back on
        let fx = Fixture::new(MockBroker::new());
        fx.broker.set_account_failure(true);
        let err = fx.orchestrator().tick().await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::BrokerCallFailure);
    }

    #[tokio::test]
    async fn test_clock_failure_assumes_open() {
        let fx = Fixture::new(MockBroker::new().with_buying_power(1000.0));
        fx.broker.set_clock_failure(true);

        let report = fx.orchestrator().tick().await.unwrap();
        assert!(report.market_open);
        assert_eq!(report.polled, 1);
        assert_eq!(report.submitted(), 1);
        assert_eq!(fx.broker.get_submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_positions_failure_uses_last_known() {
        let fx = Fixture::new(MockBroker::new().with_buying_power(1000.0).with_position("XYZ"));
        let orchestrator = fx.orchestrator();

        let first = orchestrator.tick().await.unwrap();
        assert_eq!(first.skipped, 1);

        fx.broker.set_positions_failure(true);
        let second = orchestrator.tick().await.unwrap();
        assert_eq!(second.skipped, 1);
        assert_eq!(second.polled, 0);
        assert!(fx.broker.get_submissions().is_empty());
    }

    #[tokio::test]
    async fn test_positions_failure_without_history_fails_tick() {
        let fx = Fixture::new(MockBroker::new().with_buying_power(1000.0));
        fx.broker.set_positions_failure(true);

        let err = fx.orchestrator().tick().await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::BrokerCallFailure);
        assert!(fx.source.get_calls().is_empty());
    }

    #[tokio::test]
    async fn test_trailing_approval_dropped_without_broker_support() {
        let fx = Fixture::new(
            MockBroker::new()
                .with_buying_power(1000.0)
                .with_trailing_stops(false),
        );
        let mut set = ApprovalSet::new();
        let config = StrategyConfig::with_dev(1.5).with_trailing(30);
        set.insert("XYZ", ApprovalRecord::new(config, 0.4));
        fx.store.save(&set).unwrap();

        let orchestrator = fx.orchestrator();
        for _ in 0..3 {
            let report = orchestrator.tick().await.unwrap();
            assert_eq!(report.polled, 0);
            assert!(report.outcomes.is_empty());
        }
        assert!(orchestrator.status().await.approved.is_empty());
        assert!(fx.source.get_calls().is_empty());
        assert!(fx.broker.get_submissions().is_empty());
    }

    #[tokio::test]
    async fn test_trailing_approval_kept_with_broker_support() {
        let fx = Fixture::new(MockBroker::new().with_buying_power(1000.0));
        let mut set = ApprovalSet::new();
        let config = StrategyConfig::with_dev(1.5).with_trailing(30);
        set.insert("XYZ", ApprovalRecord::new(config, 0.4));
        fx.store.save(&set).unwrap();

        let report = fx.orchestrator().tick().await.unwrap();
        assert_eq!(report.submitted(), 1);
        assert_eq!(fx.broker.get_submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_poll_failure_is_per_ticker() {
        let fx = Fixture::new(MockBroker::new().with_buying_power(1000.0));
        let mut set = fx.store.load().unwrap().unwrap();
        set.insert("DOWN", ApprovalRecord::new(StrategyConfig::with_dev(1.5), 0.9));
        fx.store.save(&set).unwrap();

        let source = fx.source.clone().with_failure("DOWN");
        let broker: Arc<dyn BrokeragePort> = Arc::new(fx.broker.clone());
        let orchestrator = TradingOrchestrator::new(
            Arc::clone(&broker),
            LiveMonitor::new(Arc::new(source), MonitorSettings::default()),
            ExecutionEngine::new(broker, ExecutionSettings::default()),
            fx.store.clone(),
        );

        let report = orchestrator.tick().await.unwrap();
        assert_eq!(report.failed, vec!["DOWN".to_string()]);
        assert_eq!(report.submitted(), 1);
    }

    #[tokio::test]
    async fn test_reload_on_interval() {
        let fx = Fixture::new(MockBroker::new().with_market_open(false));
        let orchestrator = fx.orchestrator().with_timing(LoopTiming {
            reload_interval: Duration::from_secs(3600),
            ..Default::default()
        });

        orchestrator.tick().await.unwrap();
        assert_eq!(orchestrator.status().await.approved, vec!["XYZ".to_string()]);

        // replaced on disk, but the snapshot is not due yet
        fx.store.save(&ApprovalSet::new()).unwrap();
        orchestrator.tick().await.unwrap();
        assert_eq!(orchestrator.status().await.approved.len(), 1);

        orchestrator.reload_approvals().await;
        assert!(orchestrator.status().await.approved.is_empty());
    }

    #[tokio::test]
    async fn test_missing_approval_file_is_empty() {
        let fx = Fixture::new(MockBroker::new().with_buying_power(1000.0));
        std::fs::remove_file(fx.store.path()).unwrap();

        let report = fx.orchestrator().tick().await.unwrap();
        assert_eq!(report.polled, 0);
        assert!(fx.broker.get_submissions().is_empty());
    }

    #[tokio::test]
    async fn test_stop_ends_run() {
        let fx = Fixture::new(MockBroker::new().with_market_open(false));
        let orchestrator = Arc::new(fx.orchestrator());

        let runner = Arc::clone(&orchestrator);
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(orchestrator.status().await.is_running);
        orchestrator.stop();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!orchestrator.status().await.is_running);
        assert!(orchestrator.status().await.cycles >= 1);
    }
}
