//! Win-probability scoring
//!
//! Feature Engine -> Label Generator -> Classifier for one asset. A pure
//! function of its inputs: the model is trained from scratch, queried on
//! the most recent feature row, then dropped.

use thiserror::Error;

use crate::domain::{Bar, FailureKind};
use crate::ports::MarketDataError;
use crate::strategy::classifier::{
    BoostingParams, GradientBoostedClassifier, ModelError, Sample, MIN_TRAINING_SAMPLES,
};
use crate::strategy::features::{FeatureEngine, FeatureError};
use crate::strategy::labeling::{LabelSummary, TripleBarrierLabeler};
use crate::strategy::params::StrategyConfig;

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("Insufficient bars: requires {required}, got {actual}")]
    InsufficientBars { required: usize, actual: usize },

    #[error("Insufficient training samples: requires {required}, got {actual}")]
    InsufficientSamples { required: usize, actual: usize },

    #[error("Model fit failed: {0}")]
    ModelFit(#[from] ModelError),

    #[error("Bar source failed: {0}")]
    BarSource(#[from] MarketDataError),
}

impl ScoreError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ScoreError::InsufficientBars { .. } | ScoreError::InsufficientSamples { .. } => {
                FailureKind::DataInsufficient
            }
            ScoreError::ModelFit(_) => FailureKind::ModelFitFailure,
            ScoreError::BarSource(_) => FailureKind::BrokerCallFailure,
        }
    }
}

impl From<FeatureError> for ScoreError {
    fn from(e: FeatureError) -> Self {
        match e {
            FeatureError::InsufficientData { required, actual } => {
                ScoreError::InsufficientBars { required, actual }
            }
        }
    }
}

/// Result of scoring one asset
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreReport {
    /// Win-probability of the most recent bar
    pub probability: f64,
    /// Rows used for training
    pub samples: usize,
    pub labels: LabelSummary,
}

/// Scores assets with a fixed feature engine and boosting setup
#[derive(Debug, Clone, Default)]
pub struct WinProbabilityModel {
    engine: FeatureEngine,
    params: BoostingParams,
}

impl WinProbabilityModel {
    pub fn new(engine: FeatureEngine, params: BoostingParams) -> Self {
        Self { engine, params }
    }

    pub fn params(&self) -> &BoostingParams {
        &self.params
    }

    /// Train on the labelled history and return the win-probability of the latest bar
    pub fn score(&self, bars: &[Bar], config: &StrategyConfig) -> Result<ScoreReport, ScoreError> {
        let rows = self.engine.compute(bars, config.dev)?;

        let labeler = TripleBarrierLabeler::new(config);
        let outcomes = labeler.outcomes(&rows);
        let labels: Vec<u8> = outcomes.iter().map(|o| o.label()).collect();
        let x: Vec<Sample> = rows[..labels.len()]
            .iter()
            .map(|r| r.features.as_array())
            .collect();

        if x.len() < MIN_TRAINING_SAMPLES {
            return Err(ScoreError::InsufficientSamples {
                required: MIN_TRAINING_SAMPLES,
                actual: x.len(),
            });
        }

        let model = GradientBoostedClassifier::fit(&x, &labels, &self.params)?;
        // rows is non-empty here: it holds at least MIN_TRAINING_SAMPLES + horizon entries
        let latest = rows[rows.len() - 1].features.as_array();

        Ok(ScoreReport {
            probability: model.predict_proba(&latest),
            samples: x.len(),
            labels: LabelSummary::from_outcomes(&outcomes),
        })
    }
}
