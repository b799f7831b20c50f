//! Feature Engine
//!
//! Turns an ordered bar sequence into one feature vector per bar:
//!
//! - `dist_lower` = (Close - Lower) / Close
//! - `volatility` = Std / Close
//! - `momentum`   = mean of the last 5 one-bar percent changes
//! - `vol_spike`  = Volume / rolling mean of Volume (20)
//!
//! Bars without a full window (or with any non-finite value) are dropped.
//! Pure transform, no side effects.

use thiserror::Error;

use crate::domain::Bar;
use crate::strategy::bands::{rolling_mean, BandPoint, BollingerBand, DEFAULT_BAND_WINDOW};

/// Fewer input bars than this means the asset is skipped
pub const MIN_INPUT_BARS: usize = 50;
/// Percent-change averaging window for momentum
pub const MOMENTUM_WINDOW: usize = 5;
/// Number of features per row
pub const FEATURE_COUNT: usize = 4;
/// Column names, in `FeatureVector::as_array` order
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = ["dist_lower", "volatility", "momentum", "vol_spike"];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FeatureError {
    #[error("Insufficient data: requires {required} bars, got {actual}")]
    InsufficientData { required: usize, actual: usize },
}

/// Fixed feature vector for one bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    pub dist_lower: f64,
    pub volatility: f64,
    pub momentum: f64,
    pub vol_spike: f64,
}

impl FeatureVector {
    pub fn as_array(&self) -> [f64; FEATURE_COUNT] {
        [self.dist_lower, self.volatility, self.momentum, self.vol_spike]
    }

    fn is_finite(&self) -> bool {
        self.as_array().iter().all(|v| v.is_finite())
    }
}

/// One retained bar with its bands and features
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureRow {
    /// Position of the bar in the input sequence
    pub bar_index: usize,
    pub bar: Bar,
    pub band: BandPoint,
    pub features: FeatureVector,
}

/// Feature calculator
#[derive(Debug, Clone, Copy)]
pub struct FeatureEngine {
    window: usize,
    min_bars: usize,
}

impl Default for FeatureEngine {
    fn default() -> Self {
        Self {
            window: DEFAULT_BAND_WINDOW,
            min_bars: MIN_INPUT_BARS,
        }
    }
}

impl FeatureEngine {
    pub fn new(window: usize, min_bars: usize) -> Self {
        Self { window, min_bars }
    }

    pub fn min_bars(&self) -> usize {
        self.min_bars
    }

    /// Compute feature rows, refusing inputs shorter than the minimum
    pub fn compute(&self, bars: &[Bar], dev: f64) -> Result<Vec<FeatureRow>, FeatureError> {
        if bars.len() < self.min_bars {
            return Err(FeatureError::InsufficientData {
                required: self.min_bars,
                actual: bars.len(),
            });
        }
        Ok(self.transform(bars, dev))
    }

    /// Compute feature rows without the minimum-length check.
    /// Returns an empty vector when no bar has a full window.
    pub fn transform(&self, bars: &[Bar], dev: f64) -> Vec<FeatureRow> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

        let bands = BollingerBand::new(self.window, dev).compute(&closes);
        let momentum = rolling_mean(&pct_change(&closes), MOMENTUM_WINDOW);
        let volume_mean = rolling_mean(&volumes, self.window);

        bars.iter()
            .enumerate()
            .filter_map(|(i, bar)| {
                let band = bands[i]?;
                let features = FeatureVector {
                    dist_lower: (bar.close - band.lower) / bar.close,
                    volatility: band.std / bar.close,
                    momentum: momentum[i],
                    vol_spike: bar.volume / volume_mean[i],
                };
                (features.is_finite() && !bar.is_void()).then_some(FeatureRow {
                    bar_index: i,
                    bar: *bar,
                    band,
                    features,
                })
            })
            .collect()
    }
}

/// One-bar percent change; the first element is NaN
fn pct_change(values: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    if values.is_empty() {
        return out;
    }
    out.push(f64::NAN);
    for w in values.windows(2) {
        out.push(w[1] / w[0] - 1.0);
    }
    out
}
