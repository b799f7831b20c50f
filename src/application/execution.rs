//! Execution Engine
//!
//! Turns the cycle's signals into bracket orders:
//!
//! 1. drop tickers already held or with an entry still pending
//! 2. size each remaining candidate (`qty = floor(capital / price)`)
//! 3. build the bracket: entry, take-profit limit at the band target, and a
//!    fixed stop at `entry * (1 - stop_loss_pct)` or a trailing stop
//! 4. submit once; a rejection is logged and not retried
//!
//! Prices are rounded to the configured precision in `Decimal` before they
//! reach the broker.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use tokio::sync::Mutex;

use crate::config::{ExecutionSection, SizingMode};
use crate::domain::{
    BracketOrderSpec, EntryOrderKind, OrderError, OrderType, SignalEvent, TimeInForce,
};
use crate::ports::{BrokerError, BrokeragePort, OrderHandle};

/// Execution settings
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    pub sizing: SizingMode,
    pub entry_order: EntryOrderKind,
    pub price_precision: u32,
    pub tick_size: f64,
    pub time_in_force: TimeInForce,
    pub pending_ttl: Duration,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self::from_section(&ExecutionSection::default())
    }
}

impl ExecutionSettings {
    pub fn from_section(section: &ExecutionSection) -> Self {
        Self {
            sizing: section.sizing,
            entry_order: section.entry_order,
            price_precision: section.price_precision,
            tick_size: section.tick_size,
            time_in_force: section.time_in_force,
            pending_ttl: Duration::from_secs(section.pending_ttl_secs),
        }
    }
}

/// What happened to one signal
#[derive(Debug)]
pub enum ExecutionOutcome {
    Submitted { handle: OrderHandle, quantity: u64 },
    /// Broker already reports a position
    AlreadyHeld,
    /// An entry was submitted recently and has not shown up as a position yet
    Pending,
    /// Take-all mode: another candidate scored higher
    NotSelected,
    /// Buying power at or below the take-all minimum
    BelowMinimumBuyingPower { buying_power: f64 },
    /// Sized to zero shares
    ZeroQuantity,
    /// Order would cost more than remaining buying power
    InsufficientBuyingPower { required: f64, available: f64 },
    InvalidOrder(OrderError),
    Rejected(BrokerError),
}

impl ExecutionOutcome {
    pub fn is_submitted(&self) -> bool {
        matches!(self, ExecutionOutcome::Submitted { .. })
    }
}

/// Shares affordable with `capital` at `price`; 0 for any non-positive or non-finite input
pub fn size_quantity(capital: f64, price: f64) -> u64 {
    if !(capital.is_finite() && price.is_finite()) || capital <= 0.0 || price <= 0.0 {
        return 0;
    }
    (capital / price).floor() as u64
}

/// Round `value` to `dp` places, half away from zero
pub fn round_price(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// Truncate `value` to `dp` places toward negative infinity
pub fn floor_price(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::ToNegativeInfinity)
}

fn to_decimal(field: &'static str, value: f64) -> Result<Decimal, OrderError> {
    Decimal::from_f64(value)
        .filter(|d| *d > Decimal::ZERO)
        .ok_or_else(|| OrderError::InvalidPrice {
            field,
            value: value.to_string(),
        })
}

pub struct ExecutionEngine {
    broker: Arc<dyn BrokeragePort>,
    settings: ExecutionSettings,
    /// ticker -> submission time of an entry not yet reported as a position
    pending: Mutex<HashMap<String, Instant>>,
    sequence: AtomicU64,
}

impl ExecutionEngine {
    pub fn new(broker: Arc<dyn BrokeragePort>, settings: ExecutionSettings) -> Self {
        Self {
            broker,
            settings,
            pending: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    /// Forget pending entries the broker now reports, and any past their TTL
    pub async fn reconcile_pending(&self, positions: &HashSet<String>) {
        let ttl = self.settings.pending_ttl;
        let mut pending = self.pending.lock().await;
        pending.retain(|ticker, submitted| {
            let keep = !positions.contains(ticker) && submitted.elapsed() < ttl;
            if !keep {
                tracing::debug!("Pending entry cleared for {}", ticker);
            }
            keep
        });
    }

    pub async fn is_pending(&self, ticker: &str) -> bool {
        self.pending.lock().await.contains_key(ticker)
    }

    /// Build the bracket for a sized signal
    pub fn build_bracket(
        &self,
        signal: &SignalEvent,
        quantity: u64,
    ) -> Result<BracketOrderSpec, OrderError> {
        let dp = self.settings.price_precision;
        let entry_price = round_price(to_decimal("entry", signal.reference_price)?, dp);
        let take_profit = round_price(to_decimal("take_profit", signal.target())?, dp);

        let entry_type = match self.settings.entry_order {
            EntryOrderKind::Market => OrderType::Market,
            EntryOrderKind::Limit => OrderType::Limit {
                limit_price: entry_price,
            },
        };

        let config = &signal.config;
        let stop_type = if config.trail {
            let amount = to_decimal("trail_amount", config.trail_amount(self.settings.tick_size))?;
            OrderType::TrailingStop {
                trail_amount: round_price(amount, dp),
            }
        } else {
            let pct = Decimal::from_f64(config.stop_loss_pct).ok_or_else(|| {
                OrderError::InvalidPrice {
                    field: "stop_loss_pct",
                    value: config.stop_loss_pct.to_string(),
                }
            })?;
            OrderType::Stop {
                stop_price: floor_price(entry_price * (Decimal::ONE - pct), dp),
            }
        };

        BracketOrderSpec::long(
            self.next_parent_id(&signal.ticker),
            signal.ticker.clone(),
            quantity,
            entry_type,
            take_profit,
            stop_type,
            self.settings.time_in_force,
        )
    }

    /// Size, build and submit entries for this cycle's signals
    pub async fn execute(
        &self,
        signals: &[SignalEvent],
        positions: &HashSet<String>,
        buying_power: f64,
    ) -> Vec<(String, ExecutionOutcome)> {
        let mut outcomes = Vec::with_capacity(signals.len());
        let mut candidates: Vec<&SignalEvent> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for signal in signals {
            if positions.contains(&signal.ticker) {
                outcomes.push((signal.ticker.clone(), ExecutionOutcome::AlreadyHeld));
            } else if self.is_pending(&signal.ticker).await || !seen.insert(signal.ticker.as_str()) {
                outcomes.push((signal.ticker.clone(), ExecutionOutcome::Pending));
            } else {
                candidates.push(signal);
            }
        }

        match self.settings.sizing {
            SizingMode::BuyingPowerFraction { fraction, min_buying_power } => {
                // best score first; ties keep signal order
                let best = candidates
                    .iter()
                    .enumerate()
                    .max_by(|(ia, a), (ib, b)| a.score.total_cmp(&b.score).then(ib.cmp(ia)))
                    .map(|(i, _)| i);

                for (i, signal) in candidates.iter().enumerate() {
                    let outcome = if Some(i) != best {
                        ExecutionOutcome::NotSelected
                    } else if buying_power <= min_buying_power {
                        ExecutionOutcome::BelowMinimumBuyingPower { buying_power }
                    } else {
                        let qty = size_quantity(buying_power * fraction, signal.reference_price);
                        self.enter(signal, qty, buying_power).await
                    };
                    outcomes.push((signal.ticker.clone(), outcome));
                }
            }
            SizingMode::FixedNotional { account_size, allocation } => {
                let mut available = buying_power;
                for signal in candidates {
                    let qty = size_quantity(account_size * allocation, signal.reference_price);
                    let outcome = self.enter(signal, qty, available).await;
                    if outcome.is_submitted() {
                        available -= qty as f64 * signal.reference_price;
                    }
                    outcomes.push((signal.ticker.clone(), outcome));
                }
            }
        }

        for (ticker, outcome) in &outcomes {
            self.log_outcome(ticker, outcome);
        }
        outcomes
    }

    async fn enter(&self, signal: &SignalEvent, qty: u64, available: f64) -> ExecutionOutcome {
        if qty == 0 {
            return ExecutionOutcome::ZeroQuantity;
        }
        let required = qty as f64 * signal.reference_price;
        if required > available {
            return ExecutionOutcome::InsufficientBuyingPower { required, available };
        }

        let spec = match self.build_bracket(signal, qty) {
            Ok(spec) => spec,
            Err(e) => return ExecutionOutcome::InvalidOrder(e),
        };

        match self.broker.submit_bracket(&spec).await {
            Ok(handle) => {
                self.pending
                    .lock()
                    .await
                    .insert(signal.ticker.clone(), Instant::now());
                ExecutionOutcome::Submitted {
                    handle,
                    quantity: qty,
                }
            }
            Err(e) => ExecutionOutcome::Rejected(e),
        }
    }

    fn next_parent_id(&self, ticker: &str) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("titan-{}-{}-{}", ticker, Utc::now().timestamp_millis(), seq)
    }

    fn log_outcome(&self, ticker: &str, outcome: &ExecutionOutcome) {
        match outcome {
            ExecutionOutcome::Submitted { handle, quantity } => tracing::info!(
                "{} | ENTERED | qty={} parent={} broker_id={} status={}",
                ticker,
                quantity,
                handle.parent_id,
                handle.broker_order_id,
                handle.status
            ),
            ExecutionOutcome::Rejected(e) => {
                tracing::error!("[{}] {} | order failed: {}", e.kind(), ticker, e)
            }
            ExecutionOutcome::InvalidOrder(e) => {
                tracing::error!("{} | invalid bracket: {}", ticker, e)
            }
            ExecutionOutcome::InsufficientBuyingPower { required, available } => tracing::warn!(
                "{} | skipped: needs {:.2}, buying power {:.2}",
                ticker,
                required,
                available
            ),
            ExecutionOutcome::BelowMinimumBuyingPower { buying_power } => tracing::warn!(
                "{} | skipped: buying power {:.2} below minimum",
                ticker,
                buying_power
            ),
            ExecutionOutcome::ZeroQuantity => tracing::debug!("{} | sized to zero shares", ticker),
            ExecutionOutcome::NotSelected => tracing::info!("{} | not selected (lower score)", ticker),
            ExecutionOutcome::AlreadyHeld => tracing::debug!("{} | already held", ticker),
            ExecutionOutcome::Pending => tracing::debug!("{} | entry pending", ticker),
        }
    }
}
