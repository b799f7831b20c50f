use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{BracketOrderSpec, FailureKind, OrderError};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Unsupported order: {0}")]
    Unsupported(String),

    #[error("Response parsing failed: {0}")]
    ParseError(String),

    #[error("Invalid order: {0}")]
    InvalidOrder(#[from] OrderError),
}

impl BrokerError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::BrokerCallFailure
    }
}

/// Broker acknowledgement for a submitted bracket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderHandle {
    /// Client id of the entry order
    pub parent_id: String,
    /// Broker-assigned id of the entry order
    pub broker_order_id: String,
    /// Broker status string at submission time
    pub status: String,
}

/// Brokerage port.
///
/// Every call may fail; callers log and carry on rather than abort the loop.
#[async_trait]
pub trait BrokeragePort: Send + Sync {
    /// Cash available for new entries
    async fn get_buying_power(&self) -> Result<f64, BrokerError>;

    /// Tickers with a non-zero position
    async fn get_positions(&self) -> Result<HashSet<String>, BrokerError>;

    async fn is_market_open(&self) -> Result<bool, BrokerError>;

    /// Whether a bracket may carry a trailing-stop exit leg
    fn supports_trailing_stop(&self) -> bool {
        true
    }

    /// Submit a bracket: entry first, exits linked to it
    async fn submit_bracket(&self, spec: &BracketOrderSpec) -> Result<OrderHandle, BrokerError>;
}
