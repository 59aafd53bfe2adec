use std::fmt;

use crate::records::OutcomeClass;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassProbs {
    pub loss: f64,
    pub draw: f64,
    pub win: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

impl ClassProbs {
    pub fn uniform() -> Self {
        Self {
            loss: 1.0 / 3.0,
            draw: 1.0 / 3.0,
            win: 1.0 / 3.0,
        }
    }

    pub fn from_slice(p: &[f64]) -> Self {
        Self {
            loss: p.first().copied().unwrap_or(0.0),
            draw: p.get(1).copied().unwrap_or(0.0),
            win: p.get(2).copied().unwrap_or(0.0),
        }
    }

    pub fn get(&self, class: OutcomeClass) -> f64 {
        match class {
            OutcomeClass::Loss => self.loss,
            OutcomeClass::Draw => self.draw,
            OutcomeClass::Win => self.win,
        }
    }

    /// Ties resolve towards the lower class index.
    pub fn argmax(&self) -> OutcomeClass {
        if self.loss >= self.draw && self.loss >= self.win {
            OutcomeClass::Loss
        } else if self.draw >= self.win {
            OutcomeClass::Draw
        } else {
            OutcomeClass::Win
        }
    }

    /// Probability-weighted league points: 0 for a loss, 1 for a draw, 3 for a win.
    pub fn expected_points(&self) -> f64 {
        OutcomeClass::ALL
            .iter()
            .map(|c| self.get(*c) * c.points() as f64)
            .sum()
    }
}

pub fn empirical_class_probs(outcomes: &[OutcomeClass]) -> ClassProbs {
    if outcomes.is_empty() {
        return ClassProbs::uniform();
    }
    let mut counts = [0usize; 3];
    for o in outcomes {
        counts[o.index()] += 1;
    }
    let n = outcomes.len() as f64;
    ClassProbs {
        loss: counts[0] as f64 / n,
        draw: counts[1] as f64 / n,
        win: counts[2] as f64 / n,
    }
}

pub fn evaluate_probs(predictions: &[ClassProbs], outcomes: &[OutcomeClass]) -> Metrics {
    if predictions.is_empty() || outcomes.is_empty() || predictions.len() != outcomes.len() {
        return Metrics {
            samples: 0,
            brier: 0.0,
            log_loss: 0.0,
            accuracy: 0.0,
        };
    }

    let mut brier_sum = 0.0_f64;
    let mut log_loss_sum = 0.0_f64;
    let mut correct = 0usize;

    for (p, outcome) in predictions.iter().zip(outcomes) {
        for class in OutcomeClass::ALL {
            let y = if class == *outcome { 1.0 } else { 0.0 };
            brier_sum += (p.get(class) - y).powi(2);
        }
        log_loss_sum += -p.get(*outcome).clamp(1e-12, 1.0).ln();
        if p.argmax() == *outcome {
            correct += 1;
        }
    }

    let n = predictions.len() as f64;
    Metrics {
        samples: predictions.len(),
        brier: brier_sum / n,
        log_loss: log_loss_sum / n,
        accuracy: correct as f64 / n,
    }
}

pub fn accuracy(actual: &[OutcomeClass], predicted: &[OutcomeClass]) -> f64 {
    if actual.is_empty() || actual.len() != predicted.len() {
        return 0.0;
    }
    let correct = actual.iter().zip(predicted).filter(|(a, p)| a == p).count();
    correct as f64 / actual.len() as f64
}

/// Rows are actual classes, columns predicted, both in Loss/Draw/Win order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub counts: [[usize; 3]; 3],
}

impl ConfusionMatrix {
    pub fn build(actual: &[OutcomeClass], predicted: &[OutcomeClass]) -> Self {
        let mut counts = [[0usize; 3]; 3];
        for (a, p) in actual.iter().zip(predicted) {
            counts[a.index()][p.index()] += 1;
        }
        Self { counts }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn correct(&self) -> usize {
        (0..3).map(|i| self.counts[i][i]).sum()
    }

    fn actual_count(&self, class: usize) -> usize {
        self.counts[class].iter().sum()
    }

    fn predicted_count(&self, class: usize) -> usize {
        self.counts.iter().map(|row| row[class]).sum()
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>8} {:>6} {:>6} {:>6}", "", "L", "D", "W")?;
        for class in OutcomeClass::ALL {
            let row = self.counts[class.index()];
            writeln!(
                f,
                "{:>8} {:>6} {:>6} {:>6}",
                class.label(),
                row[0],
                row[1],
                row[2]
            )?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClassStats {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    pub per_class: [ClassStats; 3],
    pub accuracy: f64,
    pub macro_avg: ClassStats,
    pub weighted_avg: ClassStats,
}

impl ClassificationReport {
    /// Undefined precision/recall (no predictions or no support) count as 0.
    pub fn build(actual: &[OutcomeClass], predicted: &[OutcomeClass]) -> Self {
        let cm = ConfusionMatrix::build(actual, predicted);
        let total = cm.total();

        let mut per_class = [ClassStats::default(); 3];
        for (i, stats) in per_class.iter_mut().enumerate() {
            let tp = cm.counts[i][i] as f64;
            let support = cm.actual_count(i);
            let predicted_n = cm.predicted_count(i);
            let precision = ratio(tp, predicted_n as f64);
            let recall = ratio(tp, support as f64);
            let f1 = ratio(2.0 * precision * recall, precision + recall);
            *stats = ClassStats {
                precision,
                recall,
                f1,
                support,
            };
        }

        let mut macro_avg = ClassStats {
            support: total,
            ..Default::default()
        };
        let mut weighted_avg = macro_avg;
        for s in &per_class {
            macro_avg.precision += s.precision / 3.0;
            macro_avg.recall += s.recall / 3.0;
            macro_avg.f1 += s.f1 / 3.0;
            let w = ratio(s.support as f64, total as f64);
            weighted_avg.precision += w * s.precision;
            weighted_avg.recall += w * s.recall;
            weighted_avg.f1 += w * s.f1;
        }

        Self {
            per_class,
            accuracy: ratio(cm.correct() as f64, total as f64),
            macro_avg,
            weighted_avg,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>14} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        for class in OutcomeClass::ALL {
            let s = self.per_class[class.index()];
            writeln!(
                f,
                "{:>14} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                class.label(),
                s.precision,
                s.recall,
                s.f1,
                s.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>14} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        for (label, s) in [("macro avg", self.macro_avg), ("weighted avg", self.weighted_avg)] {
            writeln!(
                f,
                "{:>14} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                label, s.precision, s.recall, s.f1, s.support
            )?;
        }
        Ok(())
    }
}

/// Everything printed for one model on the test partition.
#[derive(Debug, Clone)]
pub struct ModelReport {
    pub model: String,
    pub accuracy: f64,
    pub probs: Metrics,
    pub confusion: ConfusionMatrix,
    pub report: ClassificationReport,
    pub predicted: Vec<OutcomeClass>,
}

impl ModelReport {
    pub fn build(model: &str, probs: &[ClassProbs], actual: &[OutcomeClass]) -> Self {
        let predicted: Vec<OutcomeClass> = probs.iter().map(ClassProbs::argmax).collect();
        Self {
            model: model.to_string(),
            accuracy: accuracy(actual, &predicted),
            probs: evaluate_probs(probs, actual),
            confusion: ConfusionMatrix::build(actual, &predicted),
            report: ClassificationReport::build(actual, &predicted),
            predicted,
        }
    }
}

pub fn calibration_bins(
    predictions: &[ClassProbs],
    outcomes: &[OutcomeClass],
    class: OutcomeClass,
    bins: usize,
) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let mut counts = vec![0usize; bins];
    let mut pred_sum = vec![0.0_f64; bins];
    let mut actual_sum = vec![0.0_f64; bins];

    for (p, outcome) in predictions.iter().zip(outcomes) {
        let class_prob = p.get(class).clamp(0.0, 1.0);
        let idx = ((class_prob * bins as f64).floor() as usize).min(bins - 1);
        counts[idx] += 1;
        pred_sum[idx] += class_prob;
        if *outcome == class {
            actual_sum[idx] += 1.0;
        }
    }

    let mut out = Vec::with_capacity(bins);
    for i in 0..bins {
        let count = counts[i];
        let (avg_pred, actual_rate) = if count > 0 {
            (pred_sum[i] / count as f64, actual_sum[i] / count as f64)
        } else {
            (0.0, 0.0)
        };
        out.push(CalibrationBin {
            bucket_start: i as f64 / bins as f64,
            bucket_end: (i + 1) as f64 / bins as f64,
            count,
            avg_pred,
            actual_rate,
        });
    }
    out
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 { num / den } else { 0.0 }
}
