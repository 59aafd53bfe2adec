use anyhow::{Result, anyhow};
use rand::Rng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::classifier::{
    Classifier, balanced_class_weights, check_features, check_training_input, seeded_rng,
};
use crate::metrics::ClassProbs;
use crate::records::OutcomeClass;

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightInit {
    /// U(-sqrt(6 / (fan_in + fan_out)), ..), zero biases.
    GlorotUniform,
    /// U(-1 / sqrt(fan_in), ..) for weights and biases.
    FanInUniform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossNormalization {
    /// Weighted loss summed over the batch, divided by the batch length.
    BatchSize,
    /// Weighted loss summed over the batch, divided by the sum of the weights.
    WeightSum,
}

#[derive(Debug, Clone)]
pub struct MlpConfig {
    pub name: String,
    pub hidden: Vec<usize>,
    /// Dropout rate after each hidden layer; missing entries mean no dropout.
    pub dropout: Vec<f64>,
    pub init: WeightInit,
    pub learning_rate: f64,
    pub adam_eps: f64,
    pub epochs: usize,
    pub batch_size: usize,
    /// Trailing share of the training rows held out for validation logging.
    pub validation_fraction: f64,
    pub shuffle: bool,
    pub loss_norm: LossNormalization,
    pub balanced: bool,
    pub seed: u64,
    /// RNG stream base; init uses `stream`, batching and dropout use `stream + 1`.
    pub stream: u64,
}

impl MlpConfig {
    pub fn dropout_net(seed: u64) -> Self {
        Self {
            name: "dropout_net".to_string(),
            hidden: vec![128, 64],
            dropout: vec![0.3, 0.0],
            init: WeightInit::GlorotUniform,
            learning_rate: 1e-3,
            adam_eps: 1e-7,
            epochs: 30,
            batch_size: 16,
            validation_fraction: 0.2,
            shuffle: true,
            loss_norm: LossNormalization::BatchSize,
            balanced: true,
            seed,
            stream: 1_000,
        }
    }

    pub fn compact_net(seed: u64) -> Self {
        Self {
            name: "compact_net".to_string(),
            hidden: vec![64, 32],
            dropout: Vec::new(),
            init: WeightInit::FanInUniform,
            learning_rate: 1e-3,
            adam_eps: 1e-8,
            epochs: 30,
            batch_size: 16,
            validation_fraction: 0.0,
            shuffle: true,
            loss_norm: LossNormalization::WeightSum,
            balanced: true,
            seed,
            stream: 2_000,
        }
    }

    fn dropout_at(&self, layer: usize) -> f64 {
        self.dropout.get(layer).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
struct Dense {
    inputs: usize,
    outputs: usize,
    /// Row-major `[outputs][inputs]`.
    w: Vec<f64>,
    b: Vec<f64>,
}

impl Dense {
    fn new(inputs: usize, outputs: usize, init: WeightInit, rng: &mut ChaCha8Rng) -> Self {
        let (limit, bias_limit) = match init {
            WeightInit::GlorotUniform => ((6.0 / (inputs + outputs) as f64).sqrt(), 0.0),
            WeightInit::FanInUniform => {
                let l = 1.0 / (inputs as f64).sqrt();
                (l, l)
            }
        };
        let w = (0..inputs * outputs)
            .map(|_| rng.gen_range(-limit..limit))
            .collect();
        let b = (0..outputs)
            .map(|_| {
                if bias_limit > 0.0 {
                    rng.gen_range(-bias_limit..bias_limit)
                } else {
                    0.0
                }
            })
            .collect();
        Self {
            inputs,
            outputs,
            w,
            b,
        }
    }

    fn forward(&self, x: &[f64]) -> Vec<f64> {
        (0..self.outputs)
            .map(|o| {
                let row = &self.w[o * self.inputs..(o + 1) * self.inputs];
                self.b[o] + row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>()
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
struct LayerGrad {
    w: Vec<f64>,
    b: Vec<f64>,
}

impl LayerGrad {
    fn zeros_like(layer: &Dense) -> Self {
        Self {
            w: vec![0.0; layer.w.len()],
            b: vec![0.0; layer.b.len()],
        }
    }

    fn clear(&mut self) {
        self.w.fill(0.0);
        self.b.fill(0.0);
    }
}

#[derive(Debug, Clone)]
struct Network {
    layers: Vec<Dense>,
}

impl Network {
    fn new(width: usize, config: &MlpConfig, rng: &mut ChaCha8Rng) -> Self {
        let mut sizes = vec![width];
        sizes.extend(&config.hidden);
        sizes.push(OutcomeClass::ALL.len());
        let layers = sizes
            .windows(2)
            .map(|pair| Dense::new(pair[0], pair[1], config.init, rng))
            .collect();
        Self { layers }
    }

    fn output_layer(&self) -> usize {
        self.layers.len() - 1
    }

    fn predict(&self, x: &[f64]) -> [f64; 3] {
        let mut a = x.to_vec();
        for (l, layer) in self.layers.iter().enumerate() {
            a = layer.forward(&a);
            if l < self.output_layer() {
                relu(&mut a);
            }
        }
        softmax(&a)
    }

    /// One sample's forward and backward pass. Gradients of `scale * CE` are added
    /// to `grads`; the unscaled cross-entropy is returned.
    fn backprop(
        &self,
        x: &[f64],
        label: usize,
        scale: f64,
        config: &MlpConfig,
        grads: &mut [LayerGrad],
        rng: &mut ChaCha8Rng,
    ) -> f64 {
        let out = self.output_layer();
        let mut acts: Vec<Vec<f64>> = vec![x.to_vec()];
        let mut masks: Vec<Vec<f64>> = Vec::with_capacity(out);
        for (l, layer) in self.layers[..out].iter().enumerate() {
            let mut a = layer.forward(&acts[l]);
            relu(&mut a);
            let p = config.dropout_at(l);
            let mask: Vec<f64> = if p > 0.0 {
                a.iter()
                    .map(|_| if rng.r#gen::<f64>() < p { 0.0 } else { 1.0 / (1.0 - p) })
                    .collect()
            } else {
                vec![1.0; a.len()]
            };
            for (v, m) in a.iter_mut().zip(&mask) {
                *v *= m;
            }
            acts.push(a);
            masks.push(mask);
        }

        let probs = softmax(&self.layers[out].forward(&acts[out]));
        let loss = -probs[label].max(1e-15).ln();

        let mut delta: Vec<f64> = probs
            .iter()
            .enumerate()
            .map(|(k, p)| (p - if k == label { 1.0 } else { 0.0 }) * scale)
            .collect();
        for l in (0..self.layers.len()).rev() {
            let layer = &self.layers[l];
            let input = &acts[l];
            let grad = &mut grads[l];
            for (o, d) in delta.iter().enumerate() {
                grad.b[o] += d;
                let row = &mut grad.w[o * layer.inputs..(o + 1) * layer.inputs];
                for (g, v) in row.iter_mut().zip(input) {
                    *g += d * v;
                }
            }
            if l == 0 {
                break;
            }
            let mut prev = vec![0.0; layer.inputs];
            for (o, d) in delta.iter().enumerate() {
                let row = &layer.w[o * layer.inputs..(o + 1) * layer.inputs];
                for (p, w) in prev.iter_mut().zip(row) {
                    *p += w * d;
                }
            }
            for ((p, a), m) in prev.iter_mut().zip(input).zip(&masks[l - 1]) {
                *p *= if *a > 0.0 { *m } else { 0.0 };
            }
            delta = prev;
        }
        loss
    }
}

struct Adam {
    lr: f64,
    eps: f64,
    t: i32,
    m: Vec<LayerGrad>,
    v: Vec<LayerGrad>,
}

impl Adam {
    fn new(net: &Network, lr: f64, eps: f64) -> Self {
        let zeros: Vec<LayerGrad> = net.layers.iter().map(LayerGrad::zeros_like).collect();
        Self {
            lr,
            eps,
            t: 0,
            m: zeros.clone(),
            v: zeros,
        }
    }

    fn step(&mut self, net: &mut Network, grads: &[LayerGrad]) {
        self.t += 1;
        let bc1 = 1.0 - BETA1.powi(self.t);
        let bc2 = 1.0 - BETA2.powi(self.t);
        for (l, layer) in net.layers.iter_mut().enumerate() {
            let (m, v) = (&mut self.m[l], &mut self.v[l]);
            adam_update(&mut layer.w, &grads[l].w, &mut m.w, &mut v.w, self.lr, self.eps, bc1, bc2);
            adam_update(&mut layer.b, &grads[l].b, &mut m.b, &mut v.b, self.lr, self.eps, bc1, bc2);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn adam_update(
    params: &mut [f64],
    grads: &[f64],
    m: &mut [f64],
    v: &mut [f64],
    lr: f64,
    eps: f64,
    bc1: f64,
    bc2: f64,
) {
    for i in 0..params.len() {
        let g = grads[i];
        m[i] = BETA1 * m[i] + (1.0 - BETA1) * g;
        v[i] = BETA2 * v[i] + (1.0 - BETA2) * g * g;
        let m_hat = m[i] / bc1;
        let v_hat = v[i] / bc2;
        params[i] -= lr * m_hat / (v_hat.sqrt() + eps);
    }
}

fn relu(values: &mut [f64]) {
    for v in values {
        if *v < 0.0 {
            *v = 0.0;
        }
    }
}

fn softmax(logits: &[f64]) -> [f64; 3] {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut out = [0.0; 3];
    let mut sum = 0.0;
    for (o, z) in out.iter_mut().zip(logits) {
        *o = (z - max).exp();
        sum += *o;
    }
    for o in &mut out {
        *o /= sum;
    }
    out
}

/// Feed-forward ReLU network with a softmax head, trained with Adam on
/// class-weighted cross-entropy.
#[derive(Debug, Clone)]
pub struct MlpClassifier {
    config: MlpConfig,
    network: Option<Network>,
    width: usize,
}

impl MlpClassifier {
    pub fn new(config: MlpConfig) -> Self {
        Self {
            config,
            network: None,
            width: 0,
        }
    }

    pub fn config(&self) -> &MlpConfig {
        &self.config
    }

    /// Balanced weights come from every training label, validation tail included.
    fn class_weights(&self, labels: &[OutcomeClass]) -> [f64; 3] {
        if self.config.balanced {
            balanced_class_weights(labels)
        } else {
            [1.0; 3]
        }
    }

    fn validation_summary(net: &Network, x: &[Vec<f64>], y: &[usize]) -> (f64, f64) {
        let mut loss = 0.0;
        let mut hits = 0usize;
        for (row, &label) in x.iter().zip(y) {
            let p = net.predict(row);
            loss -= p[label].max(1e-15).ln();
            if ClassProbs::from_slice(&p).argmax().index() == label {
                hits += 1;
            }
        }
        let n = x.len() as f64;
        (loss / n, hits as f64 / n)
    }
}

impl Classifier for MlpClassifier {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn fit(&mut self, features: &[Vec<f64>], labels: &[OutcomeClass]) -> Result<()> {
        let width = check_training_input(features, labels)?;
        let cfg = &self.config;
        if cfg.epochs == 0 || cfg.batch_size == 0 {
            return Err(anyhow!("{}: epochs and batch size must be positive", cfg.name));
        }
        if !(0.0..1.0).contains(&cfg.validation_fraction) {
            return Err(anyhow!(
                "{}: validation fraction {} outside [0, 1)",
                cfg.name,
                cfg.validation_fraction
            ));
        }

        let n = features.len();
        let mut split_at = (n as f64 * (1.0 - cfg.validation_fraction)) as usize;
        if split_at == 0 {
            split_at = n;
        }
        let (train_x, val_x) = features.split_at(split_at);
        let y: Vec<usize> = labels.iter().map(|l| l.index()).collect();
        let (train_y, val_y) = y.split_at(split_at);

        let class_w = self.class_weights(labels);

        let mut init_rng = seeded_rng(cfg.seed, cfg.stream);
        let mut train_rng = seeded_rng(cfg.seed, cfg.stream + 1);
        let mut net = Network::new(width, cfg, &mut init_rng);
        let mut adam = Adam::new(&net, cfg.learning_rate, cfg.adam_eps);
        let mut grads: Vec<LayerGrad> = net.layers.iter().map(LayerGrad::zeros_like).collect();
        let mut order: Vec<usize> = (0..split_at).collect();

        let mut last_loss = f64::NAN;
        for epoch in 0..cfg.epochs {
            if cfg.shuffle {
                order.shuffle(&mut train_rng);
            }
            let mut epoch_loss = 0.0;
            let mut batches = 0usize;
            for batch in order.chunks(cfg.batch_size) {
                let weight_sum: f64 = batch.iter().map(|&i| class_w[train_y[i]]).sum();
                let norm = match cfg.loss_norm {
                    LossNormalization::BatchSize => batch.len() as f64,
                    LossNormalization::WeightSum => weight_sum,
                };
                if norm <= 0.0 {
                    continue;
                }
                for g in &mut grads {
                    g.clear();
                }
                let mut batch_loss = 0.0;
                for &i in batch {
                    let w = class_w[train_y[i]];
                    let ce = net.backprop(&train_x[i], train_y[i], w / norm, cfg, &mut grads, &mut train_rng);
                    batch_loss += w * ce;
                }
                adam.step(&mut net, &grads);
                epoch_loss += batch_loss / norm;
                batches += 1;
            }
            last_loss = epoch_loss / batches.max(1) as f64;

            if val_x.is_empty() {
                debug!(model = %cfg.name, epoch = epoch + 1, loss = last_loss, "epoch");
            } else {
                let (val_loss, val_acc) = Self::validation_summary(&net, val_x, val_y);
                debug!(
                    model = %cfg.name,
                    epoch = epoch + 1,
                    loss = last_loss,
                    val_loss,
                    val_acc,
                    "epoch"
                );
            }
        }

        info!(
            model = %cfg.name,
            train_rows = split_at,
            validation_rows = n - split_at,
            final_loss = last_loss,
            "network trained"
        );
        self.network = Some(net);
        self.width = width;
        Ok(())
    }

    fn predict_proba(&self, features: &[Vec<f64>]) -> Result<Vec<ClassProbs>> {
        let Some(net) = &self.network else {
            return Err(anyhow!("{} used before fit", self.config.name));
        };
        if features.is_empty() {
            return Ok(Vec::new());
        }
        check_features(features, self.width)?;
        Ok(features
            .iter()
            .map(|row| ClassProbs::from_slice(&net.predict(row)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn banded_data() -> (Vec<Vec<f64>>, Vec<OutcomeClass>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..90 {
            let x0 = -1.5 + 3.0 * (i as f64) / 89.0;
            let x1 = ((i * 5) % 11) as f64 / 11.0 - 0.5;
            let label = if x0 < -0.5 {
                OutcomeClass::Loss
            } else if x0 < 0.5 {
                OutcomeClass::Draw
            } else {
                OutcomeClass::Win
            };
            x.push(vec![x0, x1]);
            y.push(label);
        }
        (x, y)
    }

    #[test]
    fn learns_banded_classes() {
        let (x, y) = banded_data();
        let mut net = MlpClassifier::new(MlpConfig {
            hidden: vec![16],
            learning_rate: 0.01,
            epochs: 200,
            ..MlpConfig::compact_net(3)
        });
        net.fit(&x, &y).unwrap();
        let pred = net.predict(&x).unwrap();
        let hits = pred.iter().zip(&y).filter(|(p, t)| p == t).count();
        assert!(hits as f64 / y.len() as f64 >= 0.8, "train accuracy {hits}/90");
    }

    #[test]
    fn presets_give_normalised_reproducible_probs() {
        let (x, y) = banded_data();
        for make in [MlpConfig::dropout_net, MlpConfig::compact_net] {
            let mut a = MlpClassifier::new(MlpConfig { epochs: 3, ..make(42) });
            let mut b = MlpClassifier::new(MlpConfig { epochs: 3, ..make(42) });
            a.fit(&x, &y).unwrap();
            b.fit(&x, &y).unwrap();
            let pa = a.predict_proba(&x).unwrap();
            assert_eq!(pa, b.predict_proba(&x).unwrap());
            for p in &pa {
                assert!((p.loss + p.draw + p.win - 1.0).abs() < 1e-9);
                assert!(p.loss >= 0.0 && p.draw >= 0.0 && p.win >= 0.0);
            }
        }
    }

    #[test]
    fn seeds_change_the_model() {
        let (x, y) = banded_data();
        let mut a = MlpClassifier::new(MlpConfig { epochs: 1, ..MlpConfig::compact_net(1) });
        let mut b = MlpClassifier::new(MlpConfig { epochs: 1, ..MlpConfig::compact_net(2) });
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_ne!(a.predict_proba(&x).unwrap(), b.predict_proba(&x).unwrap());
    }

    #[test]
    fn rejects_bad_use() {
        let net = MlpClassifier::new(MlpConfig::compact_net(0));
        assert!(net.predict_proba(&[vec![1.0]]).is_err());

        let mut net = MlpClassifier::new(MlpConfig {
            validation_fraction: 1.0,
            ..MlpConfig::dropout_net(0)
        });
        assert!(net.fit(&[vec![1.0]], &[OutcomeClass::Win]).is_err());
    }

    #[test]
    fn class_weights_count_the_validation_tail() {
        use OutcomeClass::*;
        let net = MlpClassifier::new(MlpConfig::dropout_net(0));
        // The last fifth holds the only Draw; it still gets a weight.
        let labels = [Win, Loss, Win, Loss, Draw];
        assert_eq!(net.class_weights(&labels), balanced_class_weights(&labels));
        assert!(net.class_weights(&labels)[Draw.index()] > 0.0);

        let plain = MlpClassifier::new(MlpConfig {
            balanced: false,
            ..MlpConfig::compact_net(0)
        });
        assert_eq!(plain.class_weights(&labels), [1.0; 3]);
    }

    #[test]
    fn softmax_is_stable_for_large_logits() {
        let p = softmax(&[1000.0, 0.0, -1000.0]);
        assert!((p[0] - 1.0).abs() < 1e-12);
        assert!(p.iter().all(|v| v.is_finite()));
    }
}
