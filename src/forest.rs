use std::cmp::Ordering;

use anyhow::{Result, anyhow};
use rand::Rng;
use rand::seq::index::sample;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::info;

use crate::classifier::{
    Classifier, balanced_class_weights, check_features, check_training_input, seeded_rng,
};
use crate::metrics::ClassProbs;
use crate::records::OutcomeClass;

const MIN_IMPURITY_DECREASE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxFeatures {
    Sqrt,
    All,
    Count(usize),
}

impl MaxFeatures {
    fn resolve(self, n_features: usize) -> usize {
        let n = match self {
            MaxFeatures::Sqrt => (n_features as f64).sqrt().floor() as usize,
            MaxFeatures::All => n_features,
            MaxFeatures::Count(k) => k,
        };
        n.clamp(1, n_features.max(1))
    }
}

#[derive(Debug, Clone)]
pub struct ForestConfig {
    pub n_estimators: usize,
    pub min_samples_split: usize,
    pub max_depth: Option<usize>,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    /// Weight samples by inverse class frequency.
    pub balanced: bool,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 50,
            min_samples_split: 10,
            max_depth: None,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            balanced: true,
            seed: 1,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf([f64; 3]),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict(&self, row: &[f64]) -> [f64; 3] {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf(p) => return *p,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

/// Bagged CART trees with Gini splits; probabilities are the mean of the leaf
/// class distributions.
#[derive(Debug, Clone)]
pub struct RandomForest {
    config: ForestConfig,
    trees: Vec<Tree>,
    n_features: Option<usize>,
}

impl RandomForest {
    pub fn new(config: ForestConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            n_features: None,
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }
}

impl Classifier for RandomForest {
    fn name(&self) -> &str {
        "forest"
    }

    fn fit(&mut self, features: &[Vec<f64>], labels: &[OutcomeClass]) -> Result<()> {
        let n_features = check_training_input(features, labels)?;
        if self.config.n_estimators == 0 {
            return Err(anyhow!("forest needs at least one tree"));
        }
        let y: Vec<usize> = labels.iter().map(|l| l.index()).collect();
        let class_w = if self.config.balanced {
            balanced_class_weights(labels)
        } else {
            [1.0; 3]
        };
        let mtry = self.config.max_features.resolve(n_features);
        let cfg = &self.config;

        let trees: Vec<Tree> = (0..cfg.n_estimators)
            .into_par_iter()
            .map(|t| {
                let mut rng = seeded_rng(cfg.seed, t as u64);
                grow_tree(features, &y, &class_w, cfg, mtry, &mut rng)
            })
            .collect();

        let nodes: usize = trees.iter().map(|t| t.nodes.len()).sum();
        info!(
            trees = trees.len(),
            avg_nodes = nodes as f64 / trees.len() as f64,
            max_features = mtry,
            "forest trained"
        );
        self.trees = trees;
        self.n_features = Some(n_features);
        Ok(())
    }

    fn predict_proba(&self, features: &[Vec<f64>]) -> Result<Vec<ClassProbs>> {
        let Some(width) = self.n_features else {
            return Err(anyhow!("forest used before fit"));
        };
        if features.is_empty() {
            return Ok(Vec::new());
        }
        check_features(features, width)?;

        let n_trees = self.trees.len() as f64;
        Ok(features
            .iter()
            .map(|row| {
                let mut acc = [0.0; 3];
                for tree in &self.trees {
                    let p = tree.predict(row);
                    for (a, v) in acc.iter_mut().zip(p) {
                        *a += v;
                    }
                }
                ClassProbs::from_slice(&acc.map(|v| v / n_trees))
            })
            .collect())
    }
}

fn grow_tree(
    x: &[Vec<f64>],
    y: &[usize],
    class_w: &[f64; 3],
    cfg: &ForestConfig,
    mtry: usize,
    rng: &mut ChaCha8Rng,
) -> Tree {
    let n = x.len();
    let mut counts = vec![0usize; n];
    if cfg.bootstrap {
        for _ in 0..n {
            counts[rng.gen_range(0..n)] += 1;
        }
    } else {
        counts.fill(1);
    }

    let weight: Vec<f64> = counts
        .iter()
        .zip(y)
        .map(|(c, label)| *c as f64 * class_w[*label])
        .collect();
    let samples: Vec<usize> = (0..n).filter(|&i| counts[i] > 0).collect();

    let mut builder = TreeBuilder {
        x,
        y,
        weight: &weight,
        mtry,
        min_samples_split: cfg.min_samples_split.max(2),
        max_depth: cfg.max_depth,
        nodes: Vec::new(),
    };
    builder.build(samples, 0, rng);
    Tree {
        nodes: builder.nodes,
    }
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [usize],
    weight: &'a [f64],
    mtry: usize,
    min_samples_split: usize,
    max_depth: Option<usize>,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn build(&mut self, samples: Vec<usize>, depth: usize, rng: &mut ChaCha8Rng) -> usize {
        let dist = self.class_totals(&samples);
        let total: f64 = dist.iter().sum();
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf(normalized(dist)));

        let pure = dist.iter().filter(|v| **v > 0.0).count() <= 1;
        let too_deep = self.max_depth.is_some_and(|d| depth >= d);
        if samples.len() < self.min_samples_split || pure || too_deep || total <= 0.0 {
            return idx;
        }

        let Some((feature, threshold)) = self.best_split(&samples, dist, total, rng) else {
            return idx;
        };
        let (left, right): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&i| self.x[i][feature] <= threshold);
        let left = self.build(left, depth + 1, rng);
        let right = self.build(right, depth + 1, rng);
        self.nodes[idx] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        idx
    }

    fn class_totals(&self, samples: &[usize]) -> [f64; 3] {
        let mut dist = [0.0; 3];
        for &i in samples {
            dist[self.y[i]] += self.weight[i];
        }
        dist
    }

    /// Visits features in random order and keeps looking past `mtry` until at
    /// least one valid split turns up.
    fn best_split(
        &self,
        samples: &[usize],
        dist: [f64; 3],
        total: f64,
        rng: &mut ChaCha8Rng,
    ) -> Option<(usize, f64)> {
        let n_features = self.x[samples[0]].len();
        let parent = gini(dist, total);
        let mut best: Option<(usize, f64)> = None;
        let mut best_gain = MIN_IMPURITY_DECREASE;
        let mut order = samples.to_vec();

        for (visited, feature) in sample(rng, n_features, n_features).into_iter().enumerate() {
            if visited >= self.mtry && best.is_some() {
                break;
            }
            order.sort_by(|&a, &b| {
                self.x[a][feature]
                    .partial_cmp(&self.x[b][feature])
                    .unwrap_or(Ordering::Equal)
            });

            let mut left = [0.0; 3];
            let mut left_total = 0.0;
            for k in 0..order.len() - 1 {
                let i = order[k];
                left[self.y[i]] += self.weight[i];
                left_total += self.weight[i];

                let v = self.x[i][feature];
                let next = self.x[order[k + 1]][feature];
                if next <= v {
                    continue;
                }
                let right_total = total - left_total;
                if left_total <= 0.0 || right_total <= 0.0 {
                    continue;
                }
                let right = [dist[0] - left[0], dist[1] - left[1], dist[2] - left[2]];
                let child = (left_total / total) * gini(left, left_total)
                    + (right_total / total) * gini(right, right_total);
                let gain = parent - child;
                if gain > best_gain {
                    best_gain = gain;
                    let mid = v / 2.0 + next / 2.0;
                    let threshold = if mid < next { mid } else { v };
                    best = Some((feature, threshold));
                }
            }
        }
        best
    }
}

fn gini(dist: [f64; 3], total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    1.0 - dist.iter().map(|v| (v / total).powi(2)).sum::<f64>()
}

fn normalized(dist: [f64; 3]) -> [f64; 3] {
    let total: f64 = dist.iter().sum();
    if total <= 0.0 {
        return [1.0 / 3.0; 3];
    }
    dist.map(|v| v / total)
}
