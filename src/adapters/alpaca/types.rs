//! Alpaca REST wire types
//!
//! Alpaca encodes money and quantities as decimal strings.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{Bar, BracketOrderSpec, OrderSide, OrderType, TimeInForce};
use crate::ports::{BarInterval, BrokerError};

/// GET /v2/account (fields used here only)
#[derive(Debug, Clone, Deserialize)]
pub struct AccountResponse {
    pub buying_power: String,
    #[serde(default)]
    pub trading_blocked: bool,
}

/// GET /v2/positions element
#[derive(Debug, Clone, Deserialize)]
pub struct PositionResponse {
    pub symbol: String,
    pub qty: String,
}

/// GET /v2/clock
#[derive(Debug, Clone, Deserialize)]
pub struct ClockResponse {
    pub is_open: bool,
    #[serde(default)]
    pub next_open: Option<DateTime<Utc>>,
}

/// One bar from GET /v2/stocks/{symbol}/bars
#[derive(Debug, Clone, Deserialize)]
pub struct BarResponse {
    pub t: DateTime<Utc>,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
}

impl From<BarResponse> for Bar {
    fn from(b: BarResponse) -> Self {
        Bar::new(b.t, b.o, b.h, b.l, b.c, b.v)
    }
}

/// Page of bars; `bars` is null when the window is empty
#[derive(Debug, Clone, Deserialize)]
pub struct BarsPage {
    #[serde(default)]
    pub bars: Option<Vec<BarResponse>>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Error body returned on 4xx
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TakeProfitLeg {
    pub limit_price: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopLossLeg {
    pub stop_price: Decimal,
}

/// POST /v2/orders body for a bracket
#[derive(Debug, Clone, Serialize)]
pub struct BracketOrderRequest {
    pub symbol: String,
    pub qty: String,
    pub side: &'static str,
    #[serde(rename = "type")]
    pub order_type: &'static str,
    pub time_in_force: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    pub order_class: &'static str,
    pub client_order_id: String,
    pub take_profit: TakeProfitLeg,
    pub stop_loss: StopLossLeg,
}

impl TryFrom<&BracketOrderSpec> for BracketOrderRequest {
    type Error = BrokerError;

    fn try_from(spec: &BracketOrderSpec) -> Result<Self, Self::Error> {
        let (order_type, limit_price) = match spec.entry.order_type {
            OrderType::Market => ("market", None),
            OrderType::Limit { limit_price } => ("limit", Some(limit_price)),
            other => {
                return Err(BrokerError::Unsupported(format!(
                    "{} entry for {}",
                    other.name(),
                    spec.symbol()
                )))
            }
        };

        let take_profit = match spec.take_profit.order_type {
            OrderType::Limit { limit_price } => TakeProfitLeg { limit_price },
            other => {
                return Err(BrokerError::Unsupported(format!(
                    "{} take-profit for {}",
                    other.name(),
                    spec.symbol()
                )))
            }
        };

        // Alpaca brackets only accept a fixed stop leg
        let stop_loss = match spec.stop.order_type {
            OrderType::Stop { stop_price } => StopLossLeg { stop_price },
            other => {
                return Err(BrokerError::Unsupported(format!(
                    "{} stop leg in an Alpaca bracket for {}",
                    other.name(),
                    spec.symbol()
                )))
            }
        };

        Ok(Self {
            symbol: spec.symbol().to_string(),
            qty: spec.quantity().to_string(),
            side: side_str(spec.entry.side),
            order_type,
            time_in_force: tif_str(spec.entry.time_in_force),
            limit_price,
            order_class: "bracket",
            client_order_id: spec.parent_id().to_string(),
            take_profit,
            stop_loss,
        })
    }
}

/// POST /v2/orders response (fields used here only)
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    pub id: String,
    #[serde(default)]
    pub client_order_id: String,
    pub status: String,
}

pub fn side_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "buy",
        OrderSide::Sell => "sell",
    }
}

pub fn tif_str(tif: TimeInForce) -> &'static str {
    match tif {
        TimeInForce::Day => "day",
        TimeInForce::Gtc => "gtc",
    }
}

/// Alpaca timeframe parameter
pub fn timeframe_str(interval: BarInterval) -> &'static str {
    match interval {
        BarInterval::Minute => "1Min",
        BarInterval::FiveMinute => "5Min",
        BarInterval::Hour => "1Hour",
        BarInterval::Day => "1Day",
    }
}
