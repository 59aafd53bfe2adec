use anyhow::{Result, anyhow};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::forest::{ForestConfig, RandomForest};
use crate::metrics::ClassProbs;
use crate::mlp::{MlpClassifier, MlpConfig};
use crate::records::OutcomeClass;

/// Common surface of every outcome model so the run loop can treat them alike.
pub trait Classifier: Send {
    fn name(&self) -> &str;

    fn fit(&mut self, features: &[Vec<f64>], labels: &[OutcomeClass]) -> Result<()>;

    fn predict_proba(&self, features: &[Vec<f64>]) -> Result<Vec<ClassProbs>>;

    fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<OutcomeClass>> {
        Ok(self
            .predict_proba(features)?
            .iter()
            .map(ClassProbs::argmax)
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Forest,
    DropoutNet,
    CompactNet,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [ModelKind::Forest, ModelKind::DropoutNet, ModelKind::CompactNet];

    pub fn name(self) -> &'static str {
        match self {
            ModelKind::Forest => "forest",
            ModelKind::DropoutNet => "dropout_net",
            ModelKind::CompactNet => "compact_net",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let needle = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|k| k.name() == needle)
    }

    /// Every model gets the same run seed; each derives its own stream from it.
    pub fn build(self, seed: u64) -> Box<dyn Classifier> {
        match self {
            ModelKind::Forest => Box::new(RandomForest::new(ForestConfig {
                seed,
                ..ForestConfig::default()
            })),
            ModelKind::DropoutNet => Box::new(MlpClassifier::new(MlpConfig::dropout_net(seed))),
            ModelKind::CompactNet => Box::new(MlpClassifier::new(MlpConfig::compact_net(seed))),
        }
    }
}

/// Deterministic generator for one stochastic component of a run.
pub fn seeded_rng(seed: u64, stream: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(stream);
    rng
}

/// `n / (k * count)` for the k classes present; absent classes weigh nothing.
pub fn balanced_class_weights(labels: &[OutcomeClass]) -> [f64; 3] {
    let mut counts = [0usize; 3];
    for l in labels {
        counts[l.index()] += 1;
    }
    let present = counts.iter().filter(|c| **c > 0).count();
    let mut out = [0.0; 3];
    if present == 0 {
        return out;
    }
    let n = labels.len() as f64;
    for (w, c) in out.iter_mut().zip(counts) {
        if c > 0 {
            *w = n / (present as f64 * c as f64);
        }
    }
    out
}

/// Shape checks shared by every `fit`. Returns the feature width.
pub fn check_training_input(features: &[Vec<f64>], labels: &[OutcomeClass]) -> Result<usize> {
    if features.is_empty() {
        return Err(anyhow!("no training rows"));
    }
    if features.len() != labels.len() {
        return Err(anyhow!(
            "{} feature rows but {} labels",
            features.len(),
            labels.len()
        ));
    }
    check_features(features, features[0].len())
}

pub fn check_features(features: &[Vec<f64>], width: usize) -> Result<usize> {
    if width == 0 {
        return Err(anyhow!("feature rows are empty"));
    }
    for (idx, row) in features.iter().enumerate() {
        if row.len() != width {
            return Err(anyhow!(
                "row {idx} has {} features, expected {width}",
                row.len()
            ));
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("row {idx} holds a non-finite feature"));
        }
    }
    Ok(width)
}
