//! Strategy Layer - Band-touch mean reversion with a learned win-probability
//!
//! Pure computation, no I/O:
//! - Bollinger band math and per-bar features
//! - Triple-barrier labelling of historical band touches
//! - Gradient-boosted classifier trained fresh per asset
//! - Minute-to-5-minute bar resampling for the live check
//!
//! `WinProbabilityModel` chains features, labels and the classifier into one
//! scoring call used by the approval batch.

pub mod params;
pub mod bands;
pub mod features;
pub mod labeling;
pub mod classifier;
pub mod scoring;
pub mod resample;

pub use params::{StrategyConfig, ExitPolicy, EntryRule, ConfigError, DEFAULT_STOP_LOSS_PCT};
pub use bands::{BollingerBand, BandPoint, DEFAULT_BAND_WINDOW};
pub use features::{FeatureEngine, FeatureError, FeatureRow, FeatureVector, MIN_INPUT_BARS};
pub use labeling::{TripleBarrierLabeler, LabelOutcome, LabelSummary, LABEL_HORIZON};
pub use classifier::{BoostingParams, GradientBoostedClassifier, ModelError, MIN_TRAINING_SAMPLES};
pub use scoring::{WinProbabilityModel, ScoreReport, ScoreError};
pub use resample::BarResampler;
