//! Rolling Bands
//!
//! Bollinger-style envelope over a rolling window:
//!
//! Lower = SMA - Std * dev, Upper = SMA + Std * dev
//!
//! Std is the sample standard deviation (n - 1). A window that is not yet
//! full, or that contains a NaN, yields no band.

use statrs::statistics::Statistics;

use crate::strategy::params::ExitPolicy;

/// Default rolling window length
pub const DEFAULT_BAND_WINDOW: usize = 20;

/// Band values at one bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandPoint {
    /// Rolling mean (middle band)
    pub sma: f64,
    /// Rolling sample standard deviation
    pub std: f64,
    pub lower: f64,
    pub upper: f64,
}

impl BandPoint {
    pub fn new(sma: f64, std: f64, dev: f64) -> Self {
        Self {
            sma,
            std,
            lower: sma - std * dev,
            upper: sma + std * dev,
        }
    }

    /// Take-profit level for the given exit policy
    pub fn target(&self, exit: ExitPolicy) -> f64 {
        match exit {
            ExitPolicy::Median => self.sma,
            ExitPolicy::Upper => self.upper,
        }
    }

    /// True when `price` is at or below the lower band
    pub fn is_breached(&self, price: f64) -> bool {
        price <= self.lower
    }

    fn is_finite(&self) -> bool {
        self.sma.is_finite() && self.std.is_finite()
    }
}

/// Rolling mean; NaN where the window is incomplete or holds a NaN
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<f64> {
    rolling(values, window, |w| w.iter().mean())
}

/// Rolling sample standard deviation; NaN where the window is incomplete or holds a NaN
pub fn rolling_std(values: &[f64], window: usize) -> Vec<f64> {
    rolling(values, window, |w| w.iter().std_dev())
}

fn rolling<F>(values: &[f64], window: usize, f: F) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut out = vec![f64::NAN; values.len()];
    if window == 0 || values.len() < window {
        return out;
    }
    for i in (window - 1)..values.len() {
        out[i] = f(&values[i + 1 - window..=i]);
    }
    out
}

/// Rolling band calculator
#[derive(Debug, Clone, Copy)]
pub struct BollingerBand {
    window: usize,
    dev: f64,
}

impl BollingerBand {
    pub fn new(window: usize, dev: f64) -> Self {
        Self { window, dev }
    }

    /// Band with the default 20-bar window
    pub fn with_dev(dev: f64) -> Self {
        Self::new(DEFAULT_BAND_WINDOW, dev)
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn dev(&self) -> f64 {
        self.dev
    }

    /// Band for every input position; `None` before the window fills
    pub fn compute(&self, prices: &[f64]) -> Vec<Option<BandPoint>> {
        let sma = rolling_mean(prices, self.window);
        let std = rolling_std(prices, self.window);
        sma.into_iter()
            .zip(std)
            .map(|(m, s)| {
                let point = BandPoint::new(m, s, self.dev);
                point.is_finite().then_some(point)
            })
            .collect()
    }

    /// Band at the last price only
    pub fn latest(&self, prices: &[f64]) -> Option<BandPoint> {
        if self.window == 0 || prices.len() < self.window {
            return None;
        }
        let tail = &prices[prices.len() - self.window..];
        let point = BandPoint::new(tail.iter().mean(), tail.iter().std_dev(), self.dev);
        point.is_finite().then_some(point)
    }
}
