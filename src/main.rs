use anyhow::{Context, Result};
use tracing::{info, warn};

use matchform::classifier::ModelKind;
use matchform::codes::{self, CategoryCodes};
use matchform::config::{self, RunConfig, USAGE};
use matchform::metrics::{
    self, ClassProbs, Metrics, ModelReport, empirical_class_probs, evaluate_probs,
};
use matchform::pipeline::{self, PipelineOutput};
use matchform::records::OutcomeClass;
use matchform::split::SplitPart;

const SAMPLE_FIXTURES: usize = 10;
const CALIBRATION_BINS: usize = 10;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if config::has_flag(&args, "--help") {
        print!("{USAGE}");
        return Ok(());
    }
    config::init_logging();
    let cfg = RunConfig::from_env_and_args()?;

    let mut codes = match &cfg.codes_path {
        Some(path) => codes::load_codes(path)?,
        None => CategoryCodes::default(),
    };
    let out = pipeline::prepare_from_file(&cfg.input, &mut codes, &cfg.pipeline)
        .with_context(|| format!("prepare fixtures from {}", cfg.input.display()))?;
    if cfg.save_codes
        && let Some(path) = &cfg.codes_path
    {
        codes::save_codes(path, &codes)?;
        info!(path = %path.display(), "category codes saved");
    }

    print_header(&cfg, &out);

    let test = &out.split.test;
    if test.is_empty() {
        warn!("test partition is empty; skipping model evaluation");
        return Ok(());
    }

    let uniform = vec![ClassProbs::uniform(); test.len()];
    let train_rate = vec![empirical_class_probs(&out.split.train.targets); test.len()];
    print_metrics("Uniform baseline", evaluate_probs(&uniform, &test.targets));
    print_metrics("Train class-rate baseline", evaluate_probs(&train_rate, &test.targets));

    for kind in &cfg.models {
        let mut model = kind.build(cfg.seed);
        model
            .fit(&out.split.train.features, &out.split.train.targets)
            .with_context(|| format!("train {}", kind.name()))?;
        let probs = model
            .predict_proba(&test.features)
            .with_context(|| format!("predict with {}", kind.name()))?;
        let report = ModelReport::build(model.name(), &probs, &test.targets);
        print_report(&report);

        if *kind == ModelKind::Forest {
            print_expected_points(test, &probs);
            print_calibration(&probs, &test.targets);
        }
    }

    Ok(())
}

fn print_header(cfg: &RunConfig, out: &PipelineOutput) {
    let d = &out.diagnostics;
    println!("Match outcome model comparison");
    println!("Input: {}", cfg.input.display());
    println!(
        "Rows: {}  fixtures: {}  canonical: {}  unpaired: {}  dropped (missing history): {}",
        d.rows_in,
        d.pairing.fixtures_seen,
        d.canonical_rows,
        d.pairing.unpaired_perspectives,
        d.pairing.dropped_missing
    );
    println!(
        "Cutoff: {}  train={} test={}  predictors={}  seed={}",
        cfg.pipeline.cutoff, d.train_rows, d.test_rows, d.predictors, cfg.seed
    );
    println!();
}

fn print_metrics(label: &str, m: Metrics) {
    println!("{label}:");
    println!(
        "  samples={} brier={:.4} log_loss={:.4} accuracy={:.3}",
        m.samples, m.brier, m.log_loss, m.accuracy
    );
}

fn print_report(report: &ModelReport) {
    println!();
    println!("== {} ==", report.model);
    println!("Accuracy: {:.4}", report.accuracy);
    println!(
        "Brier: {:.4}  log-loss: {:.4}",
        report.probs.brier, report.probs.log_loss
    );
    println!("Confusion matrix (rows actual, columns predicted):");
    print!("{}", report.confusion);
    println!("Classification report:");
    print!("{}", report.report);
}

fn print_expected_points(test: &SplitPart, probs: &[ClassProbs]) {
    let expected: Vec<f64> = probs.iter().map(ClassProbs::expected_points).collect();
    let n = expected.len().max(1) as f64;
    let mean_expected = expected.iter().sum::<f64>() / n;
    let mean_actual = test
        .fixtures
        .iter()
        .map(|f| f.points_team1 as f64)
        .sum::<f64>()
        / n;

    println!();
    println!(
        "Expected points for team1: mean={:.3} actual mean={:.3}",
        mean_expected, mean_actual
    );
    println!("First {SAMPLE_FIXTURES} test fixtures:");
    for ((meta, p), xp) in test.fixtures.iter().zip(probs).zip(&expected).take(SAMPLE_FIXTURES) {
        println!(
            "  {} {:<22} vs {:<22} L={:.3} D={:.3} W={:.3} xPts={:.2} actual={}",
            meta.date, meta.team1, meta.team2, p.loss, p.draw, p.win, xp, meta.points_team1
        );
    }
}

fn print_calibration(probs: &[ClassProbs], outcomes: &[OutcomeClass]) {
    println!();
    println!("Win calibration bins:");
    for bin in metrics::calibration_bins(probs, outcomes, OutcomeClass::Win, CALIBRATION_BINS) {
        if bin.count == 0 {
            continue;
        }
        println!(
            "  [{:.1},{:.1}) n={:<4} pred={:.3} actual={:.3}",
            bin.bucket_start, bin.bucket_end, bin.count, bin.avg_pred, bin.actual_rate
        );
    }
}
