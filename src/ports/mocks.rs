//! In-memory port implementations for tests.
//!
//! Both mocks record every call so tests can assert on what the pipeline
//! asked for and what it submitted.
//!
//! Public and ungated: the integration tests under `tests/` link the library
//! as an ordinary dependency, where `cfg(test)` is off. Nothing outside the
//! test code constructs these, and the `titan` binary never reaches them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::domain::{Bar, BracketOrderSpec};
use crate::ports::{
    BarInterval, BarSource, BrokerError, BrokeragePort, Lookback, MarketDataError, OrderHandle,
};

/// Bar source serving fixed series per ticker
#[derive(Debug, Default, Clone)]
pub struct MockBarSource {
    calls: Arc<Mutex<Vec<(String, BarInterval)>>>,
    bars: Arc<Mutex<HashMap<String, Vec<Bar>>>>,
    failures: Arc<Mutex<HashSet<String>>>,
}

impl MockBarSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the series returned for a ticker
    pub fn with_bars(self, ticker: &str, bars: Vec<Bar>) -> Self {
        self.set_bars(ticker, bars);
        self
    }

    /// Builder method to make every request for a ticker fail
    pub fn with_failure(self, ticker: &str) -> Self {
        self.failures.lock().unwrap().insert(ticker.to_string());
        self
    }

    /// Replace the series for a ticker between polls
    pub fn set_bars(&self, ticker: &str, bars: Vec<Bar>) {
        self.bars.lock().unwrap().insert(ticker.to_string(), bars);
    }

    /// Get all recorded calls
    pub fn get_calls(&self) -> Vec<(String, BarInterval)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BarSource for MockBarSource {
    async fn get_bars(
        &self,
        ticker: &str,
        interval: BarInterval,
        lookback: Lookback,
    ) -> Result<Vec<Bar>, MarketDataError> {
        self.calls.lock().unwrap().push((ticker.to_string(), interval));

        if self.failures.lock().unwrap().contains(ticker) {
            return Err(MarketDataError::RestError(format!("mock failure for {}", ticker)));
        }

        let bars = self
            .bars
            .lock()
            .unwrap()
            .get(ticker)
            .cloned()
            .unwrap_or_default();

        Ok(match lookback {
            Lookback::Bars(n) if bars.len() > n => bars[bars.len() - n..].to_vec(),
            _ => bars,
        })
    }
}

/// Broker with scripted account state that records submitted brackets
#[derive(Debug, Clone)]
pub struct MockBroker {
    buying_power: Arc<Mutex<f64>>,
    positions: Arc<Mutex<HashSet<String>>>,
    market_open: Arc<Mutex<bool>>,
    fail_account_calls: Arc<Mutex<bool>>,
    fail_clock: Arc<Mutex<bool>>,
    fail_positions: Arc<Mutex<bool>>,
    reject_orders: Arc<Mutex<bool>>,
    submissions: Arc<Mutex<Vec<BracketOrderSpec>>>,
    fill_on_submit: bool,
    trailing_stops: bool,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self {
            buying_power: Arc::new(Mutex::new(0.0)),
            positions: Arc::new(Mutex::new(HashSet::new())),
            market_open: Arc::new(Mutex::new(true)),
            fail_account_calls: Arc::new(Mutex::new(false)),
            fail_clock: Arc::new(Mutex::new(false)),
            fail_positions: Arc::new(Mutex::new(false)),
            reject_orders: Arc::new(Mutex::new(false)),
            submissions: Arc::new(Mutex::new(Vec::new())),
            fill_on_submit: false,
            trailing_stops: true,
        }
    }
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buying_power(self, amount: f64) -> Self {
        *self.buying_power.lock().unwrap() = amount;
        self
    }

    pub fn with_position(self, ticker: &str) -> Self {
        self.positions.lock().unwrap().insert(ticker.to_string());
        self
    }

    pub fn with_market_open(self, open: bool) -> Self {
        *self.market_open.lock().unwrap() = open;
        self
    }

    /// Builder method to report a position as soon as a bracket is submitted
    pub fn with_fill_on_submit(mut self) -> Self {
        self.fill_on_submit = true;
        self
    }

    /// Builder method to advertise (or withhold) trailing-stop exits
    pub fn with_trailing_stops(mut self, supported: bool) -> Self {
        self.trailing_stops = supported;
        self
    }

    pub fn set_market_open(&self, open: bool) {
        *self.market_open.lock().unwrap() = open;
    }

    pub fn set_account_failure(&self, fail: bool) {
        *self.fail_account_calls.lock().unwrap() = fail;
    }

    /// Fail only the market clock call
    pub fn set_clock_failure(&self, fail: bool) {
        *self.fail_clock.lock().unwrap() = fail;
    }

    /// Fail only the positions call
    pub fn set_positions_failure(&self, fail: bool) {
        *self.fail_positions.lock().unwrap() = fail;
    }

    pub fn set_reject_orders(&self, reject: bool) {
        *self.reject_orders.lock().unwrap() = reject;
    }

    /// Get all submitted brackets
    pub fn get_submissions(&self) -> Vec<BracketOrderSpec> {
        self.submissions.lock().unwrap().clone()
    }

    fn check_account(&self) -> Result<(), BrokerError> {
        if *self.fail_account_calls.lock().unwrap() {
            return Err(BrokerError::ApiError("mock account failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokeragePort for MockBroker {
    async fn get_buying_power(&self) -> Result<f64, BrokerError> {
        self.check_account()?;
        Ok(*self.buying_power.lock().unwrap())
    }

    async fn get_positions(&self) -> Result<HashSet<String>, BrokerError> {
        self.check_account()?;
        if *self.fail_positions.lock().unwrap() {
            return Err(BrokerError::ApiError("mock positions failure".to_string()));
        }
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn is_market_open(&self) -> Result<bool, BrokerError> {
        self.check_account()?;
        if *self.fail_clock.lock().unwrap() {
            return Err(BrokerError::ApiError("mock clock failure".to_string()));
        }
        Ok(*self.market_open.lock().unwrap())
    }

    fn supports_trailing_stop(&self) -> bool {
        self.trailing_stops
    }

    async fn submit_bracket(&self, spec: &BracketOrderSpec) -> Result<OrderHandle, BrokerError> {
        spec.validate()?;
        if *self.reject_orders.lock().unwrap() {
            return Err(BrokerError::Rejected(format!("mock rejection for {}", spec.symbol())));
        }

        self.submissions.lock().unwrap().push(spec.clone());
        if self.fill_on_submit {
            self.positions.lock().unwrap().insert(spec.symbol().to_string());
        }

        let n = self.submissions.lock().unwrap().len();
        Ok(OrderHandle {
            parent_id: spec.parent_id().to_string(),
            broker_order_id: format!("mock-{}", n),
            status: "accepted".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderType, TimeInForce};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn bar(close: f64) -> Bar {
        Bar::new(Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap(), close, close, close, close, 1.0)
    }

    #[tokio::test]
    async fn test_mock_bar_source() {
        let mock = MockBarSource::new()
            .with_bars("AAPL", vec![bar(1.0), bar(2.0), bar(3.0)])
            .with_failure("FAIL");

        let all = mock.get_bars("AAPL", BarInterval::Hour, Lookback::Window(chrono::Duration::days(60))).await;
        assert_eq!(all.unwrap().len(), 3);

        let tail = mock.get_bars("AAPL", BarInterval::Minute, Lookback::Bars(2)).await.unwrap();
        assert_eq!(tail[0].close, 2.0);

        assert!(mock.get_bars("NONE", BarInterval::Hour, Lookback::Bars(10)).await.unwrap().is_empty());
        assert!(mock.get_bars("FAIL", BarInterval::Hour, Lookback::Bars(10)).await.is_err());
        assert_eq!(mock.get_calls().len(), 4);
    }

    #[tokio::test]
    async fn test_mock_broker_records_submissions() {
        let mock = MockBroker::new().with_buying_power(1000.0).with_fill_on_submit();
        let spec = BracketOrderSpec::long(
            "p1",
            "XYZ",
            10,
            OrderType::Market,
            dec!(10.5),
            OrderType::Stop { stop_price: dec!(9.2) },
            TimeInForce::Day,
        )
        .unwrap();

        let handle = mock.submit_bracket(&spec).await.unwrap();
        assert_eq!(handle.parent_id, "p1");
        assert_eq!(mock.get_submissions().len(), 1);
        assert!(mock.get_positions().await.unwrap().contains("XYZ"));

        mock.set_reject_orders(true);
        assert!(matches!(mock.submit_bracket(&spec).await, Err(BrokerError::Rejected(_))));

        mock.set_clock_failure(true);
        assert!(mock.is_market_open().await.is_err());
        assert!(mock.get_positions().await.is_ok());

        mock.set_account_failure(true);
        assert!(mock.get_buying_power().await.is_err());
    }
}
