//! Paper Broker
//!
//! In-process brokerage for `run --paper`. Entries fill immediately: limit
//! entries at their limit price, market entries at the latest minute close
//! from the bar source. Legs are taken in submission order: the held entry,
//! then the linked exits, with the last transmitting leg releasing the
//! bracket. Cash and positions are tracked in memory; exits rest on the book
//! but never trigger, so a paper position stays open for the lifetime of the
//! process.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::Mutex;

use crate::domain::{BracketOrderSpec, OrderRequest, OrderType};
use crate::ports::{BarInterval, BarSource, BrokerError, BrokeragePort, Lookback, OrderHandle};

#[derive(Debug, Default)]
struct PaperAccount {
    cash: f64,
    positions: HashMap<String, u64>,
    orders: Vec<BracketOrderSpec>,
    exits: Vec<OrderRequest>,
}

/// Simulated brokerage account
pub struct PaperBroker {
    account: Mutex<PaperAccount>,
    marks: Arc<dyn BarSource>,
    clock: Option<Arc<dyn BrokeragePort>>,
}

impl PaperBroker {
    pub fn new(starting_cash: f64, marks: Arc<dyn BarSource>) -> Self {
        Self {
            account: Mutex::new(PaperAccount {
                cash: starting_cash,
                ..Default::default()
            }),
            marks,
            clock: None,
        }
    }

    /// Delegate market-hours checks to a live broker
    pub fn with_clock(mut self, clock: Arc<dyn BrokeragePort>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Brackets accepted so far
    pub async fn orders(&self) -> Vec<BracketOrderSpec> {
        self.account.lock().await.orders.clone()
    }

    /// Exit legs resting against filled entries for `ticker`
    pub async fn resting_exits(&self, ticker: &str) -> Vec<OrderRequest> {
        self.account
            .lock()
            .await
            .exits
            .iter()
            .filter(|leg| leg.symbol == ticker)
            .cloned()
            .collect()
    }

    pub async fn position(&self, ticker: &str) -> u64 {
        self.account.lock().await.positions.get(ticker).copied().unwrap_or(0)
    }

    async fn fill_price(&self, entry: &OrderRequest) -> Result<f64, BrokerError> {
        match entry.order_type {
            OrderType::Limit { limit_price } => limit_price
                .to_f64()
                .ok_or_else(|| BrokerError::ParseError(format!("limit price {}", limit_price))),
            OrderType::Market => {
                let bars = self
                    .marks
                    .get_bars(&entry.symbol, BarInterval::Minute, Lookback::Bars(1))
                    .await
                    .map_err(|e| BrokerError::ApiError(format!("no mark for {}: {}", entry.symbol, e)))?;
                bars.last()
                    .map(|b| b.close)
                    .filter(|p| p.is_finite() && *p > 0.0)
                    .ok_or_else(|| BrokerError::Rejected(format!("no mark for {}", entry.symbol)))
            }
            other => Err(BrokerError::Unsupported(format!("{} entry", other.name()))),
        }
    }
}

/// Walk the legs in submission order. Returns the held entry and its linked
/// exits; the bracket goes live only if the final leg transmits.
fn sequence_legs(spec: &BracketOrderSpec) -> Result<(&OrderRequest, Vec<OrderRequest>), BrokerError> {
    let mut held: Option<&OrderRequest> = None;
    let mut exits = Vec::new();
    let mut released = false;

    for leg in spec.submission_sequence() {
        match (held, leg.parent_id.as_deref()) {
            (None, None) if !leg.transmit => held = Some(leg),
            (None, _) => {
                return Err(BrokerError::Rejected(format!(
                    "{} must be a held parent order",
                    leg.client_id
                )))
            }
            (Some(entry), Some(parent)) if parent == entry.client_id => exits.push(leg.clone()),
            (Some(_), _) => {
                return Err(BrokerError::Rejected(format!(
                    "{} is not linked to the held entry",
                    leg.client_id
                )))
            }
        }
        released = leg.transmit;
    }

    match held {
        Some(entry) if released => Ok((entry, exits)),
        _ => Err(BrokerError::Rejected(format!(
            "bracket {} was never transmitted",
            spec.parent_id()
        ))),
    }
}

#[async_trait]
impl BrokeragePort for PaperBroker {
    async fn get_buying_power(&self) -> Result<f64, BrokerError> {
        Ok(self.account.lock().await.cash)
    }

    async fn get_positions(&self) -> Result<HashSet<String>, BrokerError> {
        let account = self.account.lock().await;
        Ok(account
            .positions
            .iter()
            .filter(|(_, qty)| **qty > 0)
            .map(|(ticker, _)| ticker.clone())
            .collect())
    }

    async fn is_market_open(&self) -> Result<bool, BrokerError> {
        match &self.clock {
            Some(clock) => clock.is_market_open().await,
            None => Ok(true),
        }
    }

    async fn submit_bracket(&self, spec: &BracketOrderSpec) -> Result<OrderHandle, BrokerError> {
        spec.validate()?;
        let (entry, exits) = sequence_legs(spec)?;
        let price = self.fill_price(entry).await?;
        let cost = price * entry.quantity as f64;

        let mut account = self.account.lock().await;
        if cost > account.cash {
            return Err(BrokerError::Rejected(format!(
                "insufficient buying power: need {:.2}, have {:.2}",
                cost, account.cash
            )));
        }

        account.cash -= cost;
        *account.positions.entry(entry.symbol.clone()).or_insert(0) += entry.quantity;
        account.exits.extend(exits);
        account.orders.push(spec.clone());
        let n = account.orders.len();

        tracing::info!(
            "[PAPER] Filled {} x {} @ {:.4} (tp {}, stop {})",
            spec.quantity(),
            spec.symbol(),
            price,
            spec.take_profit.order_type.name(),
            spec.stop.order_type.name()
        );

        Ok(OrderHandle {
            parent_id: spec.parent_id().to_string(),
            broker_order_id: format!("paper-{}", n),
            status: "filled".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bar, TimeInForce};
    use crate::ports::mocks::{MockBarSource, MockBroker};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn marks(close: f64) -> Arc<dyn BarSource> {
        let bar = Bar::new(Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap(), close, close, close, close, 100.0);
        Arc::new(MockBarSource::new().with_bars("XYZ", vec![bar]))
    }

    fn bracket(qty: u64, entry: OrderType) -> BracketOrderSpec {
        BracketOrderSpec::long(
            "p1",
            "XYZ",
            qty,
            entry,
            dec!(10.50),
            OrderType::TrailingStop { trail_amount: dec!(0.05) },
            TimeInForce::Day,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_market_fill_at_mark() {
        let broker = PaperBroker::new(1000.0, marks(10.0));
        let handle = broker.submit_bracket(&bracket(19, OrderType::Market)).await.unwrap();

        assert_eq!(handle.status, "filled");
        assert_eq!(broker.position("XYZ").await, 19);
        assert!((broker.get_buying_power().await.unwrap() - 810.0).abs() < 1e-9);
        assert!(broker.get_positions().await.unwrap().contains("XYZ"));
        assert_eq!(broker.orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_limit_fill_and_insufficient_cash() {
        let broker = PaperBroker::new(100.0, marks(10.0));
        let limit = OrderType::Limit { limit_price: dec!(9.70) };

        assert!(broker.submit_bracket(&bracket(10, limit)).await.is_ok());
        assert!((broker.get_buying_power().await.unwrap() - 3.0).abs() < 1e-9);

        let err = broker.submit_bracket(&bracket(10, limit)).await.unwrap_err();
        assert!(matches!(err, BrokerError::Rejected(_)));
        assert_eq!(broker.position("XYZ").await, 10);
    }

    #[tokio::test]
    async fn test_exits_rest_after_entry_fill() {
        let broker = PaperBroker::new(1000.0, marks(10.0));
        let spec = bracket(19, OrderType::Market);
        broker.submit_bracket(&spec).await.unwrap();

        let exits = broker.resting_exits("XYZ").await;
        let ids: Vec<&str> = exits.iter().map(|leg| leg.client_id.as_str()).collect();
        assert_eq!(ids, vec!["p1-tp", "p1-sl"]);
        assert!(exits.iter().all(|leg| leg.parent_id.as_deref() == Some("p1")));
        assert!(exits.iter().all(|leg| leg.quantity == 19));
        assert!(broker.resting_exits("ABC").await.is_empty());
    }

    #[tokio::test]
    async fn test_transmitted_entry_rejected() {
        let broker = PaperBroker::new(1000.0, marks(10.0));
        let mut spec = bracket(19, OrderType::Market);
        spec.entry.transmit = true;

        let err = broker.submit_bracket(&spec).await.unwrap_err();
        assert!(matches!(err, BrokerError::Rejected(_)));
        assert_eq!(broker.position("XYZ").await, 0);
        assert!(broker.resting_exits("XYZ").await.is_empty());
        assert!((broker.get_buying_power().await.unwrap() - 1000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_untransmitted_bracket_rejected() {
        let broker = PaperBroker::new(1000.0, marks(10.0));
        let mut spec = bracket(19, OrderType::Market);
        spec.stop.transmit = false;

        assert!(matches!(
            broker.submit_bracket(&spec).await,
            Err(BrokerError::Rejected(_))
        ));
        assert_eq!(broker.position("XYZ").await, 0);
    }

    #[tokio::test]
    async fn test_clock_delegation() {
        let broker = PaperBroker::new(100.0, marks(10.0));
        assert!(broker.is_market_open().await.unwrap());

        let closed = Arc::new(MockBroker::new().with_market_open(false));
        let broker = broker.with_clock(closed);
        assert!(!broker.is_market_open().await.unwrap());
    }
}
