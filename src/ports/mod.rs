//! Ports Layer - Trait definitions for external dependencies
//!
//! This module defines the interfaces (ports) that adapters must implement.
//! Following hexagonal architecture, these traits abstract:
//! - Historical and live OHLCV bars
//! - Brokerage account state and bracket order submission

pub mod market_data;
pub mod brokerage;
/// Test doubles, shared by unit and integration tests
pub mod mocks;

pub use market_data::{BarInterval, BarSource, Lookback, MarketDataError};
pub use brokerage::{BrokerError, BrokeragePort, OrderHandle};
