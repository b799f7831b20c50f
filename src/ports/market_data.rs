use async_trait::async_trait;
use chrono::Duration;
use thiserror::Error;

use crate::domain::Bar;

/// Market data error type
#[derive(Error, Debug, Clone)]
pub enum MarketDataError {
    #[error("REST API error: {0}")]
    RestError(String),

    #[error("Data parsing error: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),
}

/// Bar size requested from a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarInterval {
    Minute,
    FiveMinute,
    Hour,
    Day,
}

impl BarInterval {
    pub fn duration(&self) -> Duration {
        match self {
            BarInterval::Minute => Duration::minutes(1),
            BarInterval::FiveMinute => Duration::minutes(5),
            BarInterval::Hour => Duration::hours(1),
            BarInterval::Day => Duration::days(1),
        }
    }

    /// Parse the config spelling ("1m", "5m", "1h", "1d")
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" | "1min" => Some(BarInterval::Minute),
            "5m" | "5min" => Some(BarInterval::FiveMinute),
            "1h" | "60m" | "1hour" => Some(BarInterval::Hour),
            "1d" | "1day" => Some(BarInterval::Day),
            _ => None,
        }
    }
}

/// How far back to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookback {
    /// The most recent N bars
    Bars(usize),
    /// Everything inside a trailing wall-clock window
    Window(Duration),
}

/// Source of historical OHLCV bars.
///
/// Implementations return bars ordered oldest first. Empty or short
/// sequences are valid responses; callers check length themselves.
#[async_trait]
pub trait BarSource: Send + Sync {
    async fn get_bars(
        &self,
        ticker: &str,
        interval: BarInterval,
        lookback: Lookback,
    ) -> Result<Vec<Bar>, MarketDataError>;
}
