//! Bar - timestamped OHLCV sample
//!
//! Bars arrive from a [`BarSource`](crate::ports::BarSource) ordered oldest
//! first. A sequence is append-only within a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV sample at a fixed interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Typical price (H + L + C) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// Returns true if any price field is NaN or infinite
    pub fn is_void(&self) -> bool {
        !(self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.volume.is_finite())
    }

    /// Basic OHLC sanity: high bounds the body, low bounds the body, prices positive
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.close > 0.0
    }
}

/// True when timestamps are non-decreasing
pub fn is_ordered(bars: &[Bar]) -> bool {
    bars.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(close: f64) -> Bar {
        let ts = Utc.with_ymd_and_hms(2026, 1, 5, 14, 30, 0).unwrap();
        Bar::new(ts, close, close + 1.0, close - 1.0, close, 1000.0)
    }

    #[test]
    fn test_typical_price() {
        let b = bar(10.0);
        assert!((b.typical_price() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_void_bar() {
        let mut b = bar(10.0);
        assert!(!b.is_void());
        b.close = f64::NAN;
        assert!(b.is_void());
        assert!(!b.is_sane());
    }

    #[test]
    fn test_sanity() {
        let mut b = bar(10.0);
        assert!(b.is_sane());
        b.high = 5.0;
        assert!(!b.is_sane());
    }

    #[test]
    fn test_ordering() {
        let a = bar(10.0);
        let mut b = bar(11.0);
        b.timestamp = a.timestamp + chrono::Duration::minutes(1);
        assert!(is_ordered(&[a, b]));
        assert!(!is_ordered(&[b, a]));
    }
}
