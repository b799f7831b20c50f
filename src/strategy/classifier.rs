//! Gradient-Boosted Tree Classifier
//!
//! Binary log-loss boosting with second-order (Newton) leaf weights:
//!
//! - gradient `g = p - y`, hessian `h = p (1 - p)`
//! - leaf weight `w = -eta * G / (H + lambda)`
//! - split gain `0.5 * [GL^2/(HL+l) + GR^2/(HR+l) - G^2/(H+l)] - gamma`
//!
//! Splits are exact-greedy over every distinct feature value. The model is
//! stateless across evaluations: fit once, query, discard.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::strategy::features::FEATURE_COUNT;

/// Fewer usable samples than this and no model is fitted
pub const MIN_TRAINING_SAMPLES: usize = 10;

/// One feature row
pub type Sample = [f64; FEATURE_COUNT];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Training set is empty")]
    EmptyTrainingSet,

    #[error("Feature/label length mismatch: {features} rows vs {labels} labels")]
    LengthMismatch { features: usize, labels: usize },

    #[error("Non-finite feature at row {row}, column {column}")]
    NonFiniteFeature { row: usize, column: usize },

    #[error("Label must be 0 or 1, got {0}")]
    InvalidLabel(u8),

    #[error("Invalid hyper-parameter: {0}")]
    InvalidParams(String),
}

/// Boosting hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    /// Boosting rounds
    pub n_estimators: usize,
    /// Maximum tree depth
    pub max_depth: usize,
    /// Shrinkage applied to every leaf
    pub learning_rate: f64,
    /// L2 penalty on leaf weights
    pub lambda: f64,
    /// Minimum gain for a split
    pub gamma: f64,
    /// Minimum hessian sum per child
    pub min_child_weight: f64,
    /// Row sampling ratio per round
    pub subsample: f64,
    /// RNG seed used when subsampling
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 6,
            learning_rate: 0.3,
            lambda: 1.0,
            gamma: 0.0,
            min_child_weight: 1.0,
            subsample: 1.0,
            seed: 42,
        }
    }
}

impl BoostingParams {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.n_estimators == 0 {
            return Err(ModelError::InvalidParams("n_estimators must be > 0".into()));
        }
        if self.max_depth == 0 {
            return Err(ModelError::InvalidParams("max_depth must be > 0".into()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(ModelError::InvalidParams(format!(
                "learning_rate must be in (0, 1], got {}",
                self.learning_rate
            )));
        }
        if !(self.lambda >= 0.0) || !(self.gamma >= 0.0) || !(self.min_child_weight >= 0.0) {
            return Err(ModelError::InvalidParams(
                "lambda, gamma and min_child_weight must be >= 0".into(),
            ));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(ModelError::InvalidParams(format!(
                "subsample must be in (0, 1], got {}",
                self.subsample
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn predict(&self, sample: &Sample) -> f64 {
        match self {
            Node::Leaf(weight) => *weight,
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if sample[*feature] < *threshold {
                    left.predict(sample)
                } else {
                    right.predict(sample)
                }
            }
        }
    }

    fn depth(&self) -> usize {
        match self {
            Node::Leaf(_) => 0,
            Node::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

/// Fitted boosted-tree ensemble
#[derive(Debug, Clone)]
pub struct GradientBoostedClassifier {
    params: BoostingParams,
    base_margin: f64,
    trees: Vec<Node>,
}

impl GradientBoostedClassifier {
    /// Fit a fresh ensemble on `(x, y)`
    pub fn fit(x: &[Sample], y: &[u8], params: &BoostingParams) -> Result<Self, ModelError> {
        params.validate()?;
        if x.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }
        if x.len() != y.len() {
            return Err(ModelError::LengthMismatch {
                features: x.len(),
                labels: y.len(),
            });
        }
        for (row, sample) in x.iter().enumerate() {
            if let Some(column) = sample.iter().position(|v| !v.is_finite()) {
                return Err(ModelError::NonFiniteFeature { row, column });
            }
        }
        if let Some(&bad) = y.iter().find(|&&label| label > 1) {
            return Err(ModelError::InvalidLabel(bad));
        }

        let targets: Vec<f64> = y.iter().map(|&label| label as f64).collect();
        let mut model = Self {
            params: params.clone(),
            base_margin: 0.0,
            trees: Vec::with_capacity(params.n_estimators),
        };
        let mut margins = vec![model.base_margin; x.len()];
        let mut rng = StdRng::seed_from_u64(params.seed);

        for _ in 0..params.n_estimators {
            let (grad, hess): (Vec<f64>, Vec<f64>) = margins
                .iter()
                .zip(&targets)
                .map(|(&m, &t)| {
                    let p = sigmoid(m);
                    (p - t, (p * (1.0 - p)).max(1e-16))
                })
                .unzip();

            let rows = model.sample_rows(x.len(), &mut rng);
            let tree = model.build_node(x, &grad, &hess, rows, 0);
            for (margin, sample) in margins.iter_mut().zip(x) {
                *margin += tree.predict(sample);
            }
            model.trees.push(tree);
        }

        Ok(model)
    }

    /// Win-probability for a single sample, in [0, 1]
    pub fn predict_proba(&self, sample: &Sample) -> f64 {
        let margin = self.base_margin + self.trees.iter().map(|t| t.predict(sample)).sum::<f64>();
        sigmoid(margin)
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn max_tree_depth(&self) -> usize {
        self.trees.iter().map(Node::depth).max().unwrap_or(0)
    }

    fn sample_rows(&self, n: usize, rng: &mut StdRng) -> Vec<usize> {
        if self.params.subsample >= 1.0 {
            return (0..n).collect();
        }
        let rows: Vec<usize> = (0..n).filter(|_| rng.gen::<f64>() < self.params.subsample).collect();
        if rows.is_empty() {
            vec![rng.gen_range(0..n)]
        } else {
            rows
        }
    }

    fn leaf_weight(&self, g: f64, h: f64) -> f64 {
        -self.params.learning_rate * g / (h + self.params.lambda)
    }

    fn build_node(&self, x: &[Sample], grad: &[f64], hess: &[f64], rows: Vec<usize>, depth: usize) -> Node {
        let g: f64 = rows.iter().map(|&i| grad[i]).sum();
        let h: f64 = rows.iter().map(|&i| hess[i]).sum();

        if depth >= self.params.max_depth || rows.len() < 2 {
            return Node::Leaf(self.leaf_weight(g, h));
        }

        match self.best_split(x, grad, hess, &rows, g, h) {
            Some(split) => Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left: Box::new(self.build_node(x, grad, hess, split.left, depth + 1)),
                right: Box::new(self.build_node(x, grad, hess, split.right, depth + 1)),
            },
            None => Node::Leaf(self.leaf_weight(g, h)),
        }
    }

    fn best_split(
        &self,
        x: &[Sample],
        grad: &[f64],
        hess: &[f64],
        rows: &[usize],
        g: f64,
        h: f64,
    ) -> Option<SplitCandidate> {
        let lambda = self.params.lambda;
        let parent_score = g * g / (h + lambda);
        let mut best: Option<(usize, f64, f64)> = None;

        for feature in 0..FEATURE_COUNT {
            let mut sorted = rows.to_vec();
            sorted.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));

            let (mut gl, mut hl) = (0.0, 0.0);
            for k in 0..sorted.len() - 1 {
                let i = sorted[k];
                gl += grad[i];
                hl += hess[i];

                let value = x[i][feature];
                let next = x[sorted[k + 1]][feature];
                if value == next {
                    continue;
                }
                let (gr, hr) = (g - gl, h - hl);
                if hl < self.params.min_child_weight || hr < self.params.min_child_weight {
                    continue;
                }

                let gain = 0.5 * (gl * gl / (hl + lambda) + gr * gr / (hr + lambda) - parent_score)
                    - self.params.gamma;
                if gain > 1e-12 && best.map_or(true, |(_, _, best_gain)| gain > best_gain) {
                    best = Some((feature, (value + next) / 2.0, gain));
                }
            }
        }

        let (feature, threshold, _) = best?;
        let (left, right): (Vec<usize>, Vec<usize>) =
            rows.iter().partition(|&&i| x[i][feature] < threshold);
        Some(SplitCandidate {
            feature,
            threshold,
            left,
            right,
        })
    }
}

fn sigmoid(margin: f64) -> f64 {
    1.0 / (1.0 + (-margin).exp())
}
