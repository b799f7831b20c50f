//! Order types and bracket construction
//!
//! A bracket is one parent entry plus two linked exits (take-profit and a
//! fixed or trailing stop). Children carry the parent's client id and only
//! activate once the entry fills. Prices are `Decimal` so they reach the
//! broker already rounded to the instrument's precision.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Order construction errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OrderError {
    #[error("Quantity must be positive, got {0}")]
    NonPositiveQuantity(u64),

    #[error("Invalid price for {field}: {value}")]
    InvalidPrice { field: &'static str, value: String },

    #[error("Bracket leg {leg} quantity {got} does not match entry quantity {expected}")]
    QuantityMismatch { leg: &'static str, expected: u64, got: u64 },

    #[error("Bracket leg {0} is not linked to parent")]
    MissingParentLink(&'static str),
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Order type with its price parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit { limit_price: Decimal },
    Stop { stop_price: Decimal },
    TrailingStop { trail_amount: Decimal },
}

impl OrderType {
    pub fn name(&self) -> &'static str {
        match self {
            OrderType::Market => "MKT",
            OrderType::Limit { .. } => "LMT",
            OrderType::Stop { .. } => "STP",
            OrderType::TrailingStop { .. } => "TRAIL",
        }
    }
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    #[default]
    Day,
    Gtc,
}

/// Entry order style used by the execution engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrderKind {
    #[default]
    Market,
    Limit,
}

/// A single order leg
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Client-assigned order id
    pub client_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    /// Client id of the parent order, for child legs
    pub parent_id: Option<String>,
    /// Whether the broker may activate this leg as soon as it is received
    pub transmit: bool,
}

/// Parent entry with linked take-profit and stop exits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketOrderSpec {
    pub entry: OrderRequest,
    pub take_profit: OrderRequest,
    pub stop: OrderRequest,
}

impl BracketOrderSpec {
    /// Build a long bracket. Entry is held back (`transmit = false`) so that
    /// neither exit can go live before the parent is known to the broker.
    pub fn long(
        parent_id: impl Into<String>,
        symbol: impl Into<String>,
        quantity: u64,
        entry_type: OrderType,
        take_profit_price: Decimal,
        stop_type: OrderType,
        time_in_force: TimeInForce,
    ) -> Result<Self, OrderError> {
        if quantity == 0 {
            return Err(OrderError::NonPositiveQuantity(quantity));
        }
        if take_profit_price <= Decimal::ZERO {
            return Err(OrderError::InvalidPrice {
                field: "take_profit",
                value: take_profit_price.to_string(),
            });
        }
        match stop_type {
            OrderType::Stop { stop_price } if stop_price > Decimal::ZERO => {}
            OrderType::TrailingStop { trail_amount } if trail_amount > Decimal::ZERO => {}
            other => {
                return Err(OrderError::InvalidPrice {
                    field: "stop",
                    value: format!("{:?}", other),
                })
            }
        }

        let parent_id = parent_id.into();
        let symbol = symbol.into();

        let entry = OrderRequest {
            client_id: parent_id.clone(),
            symbol: symbol.clone(),
            side: OrderSide::Buy,
            quantity,
            order_type: entry_type,
            time_in_force,
            parent_id: None,
            transmit: false,
        };
        let take_profit = OrderRequest {
            client_id: format!("{}-tp", parent_id),
            symbol: symbol.clone(),
            side: OrderSide::Sell,
            quantity,
            order_type: OrderType::Limit {
                limit_price: take_profit_price,
            },
            time_in_force,
            parent_id: Some(parent_id.clone()),
            transmit: true,
        };
        let stop = OrderRequest {
            client_id: format!("{}-sl", parent_id),
            symbol,
            side: OrderSide::Sell,
            quantity,
            order_type: stop_type,
            time_in_force,
            parent_id: Some(parent_id),
            transmit: true,
        };

        let spec = Self {
            entry,
            take_profit,
            stop,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Check the bracket invariants: equal quantities, children linked to the entry
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.entry.quantity == 0 {
            return Err(OrderError::NonPositiveQuantity(0));
        }
        for (leg, order) in [("take_profit", &self.take_profit), ("stop", &self.stop)] {
            if order.quantity != self.entry.quantity {
                return Err(OrderError::QuantityMismatch {
                    leg,
                    expected: self.entry.quantity,
                    got: order.quantity,
                });
            }
            if order.parent_id.as_deref() != Some(self.entry.client_id.as_str()) {
                return Err(OrderError::MissingParentLink(leg));
            }
        }
        Ok(())
    }

    /// Legs in submission order: entry first, then both exits
    pub fn submission_sequence(&self) -> [&OrderRequest; 3] {
        [&self.entry, &self.take_profit, &self.stop]
    }

    pub fn symbol(&self) -> &str {
        &self.entry.symbol
    }

    pub fn quantity(&self) -> u64 {
        self.entry.quantity
    }

    pub fn parent_id(&self) -> &str {
        &self.entry.client_id
    }

    /// True if the stop leg is a trailing stop
    pub fn is_trailing(&self) -> bool {
        matches!(self.stop.order_type, OrderType::TrailingStop { .. })
    }
}
