use anyhow::{Context, Result, anyhow};
use tracing::info;

use matchform::codes::{self, CategoryCodes};
use matchform::config::{self, RunConfig, USAGE};
use matchform::pipeline::{self, PipelineOutput};
use matchform::records::MatchRecord;
use matchform::rolling::{RollingConfig, RollingRecord, team_timelines};

const SCALER_COLUMNS: usize = 8;

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

    print_counts(&cfg, &out);
    print_scaler(&out);

    let audit = audit_causality(&out.records, &cfg.pipeline.rolling);
    println!();
    println!(
        "Causality check: teams={} values={} defined={} mismatches={}",
        audit.teams, audit.checked, audit.defined, audit.mismatches.len()
    );
    for m in audit.mismatches.iter().take(10) {
        println!("  {m}");
    }
    if !audit.mismatches.is_empty() {
        return Err(anyhow!(
            "{} rolling values disagree with a recomputation from earlier matches",
            audit.mismatches.len()
        ));
    }
    info!("feature audit passed");
    Ok(())
}

fn print_counts(cfg: &RunConfig, out: &PipelineOutput) {
    let d = &out.diagnostics;
    let p = &d.pairing;
    println!("Feature audit: {}", cfg.input.display());
    println!("Input rows:            {}", d.rows_in);
    println!("Venue codes:           {}", d.venues);
    println!("Opponent codes:        {}", d.opponents);
    println!("Fixtures seen:         {}", p.fixtures_seen);
    println!("Unpaired perspectives: {}", p.unpaired_perspectives);
    println!("Mirrors discarded:     {}", p.mirrors_discarded);
    println!("Result mismatches:     {}", p.result_mismatches);
    println!("Dropped (missing):     {}", p.dropped_missing);
    println!("Canonical rows:        {}", d.canonical_rows);
    println!(
        "Split at {}:      train={} test={}",
        cfg.pipeline.cutoff, d.train_rows, d.test_rows
    );
    println!("Feature columns:       {}", out.table.schema.len());
    println!("Predictors:            {}", d.predictors);
    if p.residual_missing.is_empty() {
        println!("Residual missing:      none");
    } else {
        println!("Residual missing:");
        for (col, n) in &p.residual_missing {
            println!("  {col}: {n}");
        }
    }
}

fn print_scaler(out: &PipelineOutput) {
    let s = &out.split;
    println!();
    println!("Scaler (train only), first {SCALER_COLUMNS} predictors:");
    for ((name, mean), std) in s
        .feature_names
        .iter()
        .zip(&s.scaler.means)
        .zip(&s.scaler.stds)
        .take(SCALER_COLUMNS)
    {
        println!("  {name:<28} mean={mean:>10.4} std={std:>10.4}");
    }
}

struct CausalityAudit {
    teams: usize,
    checked: usize,
    defined: usize,
    mismatches: Vec<String>,
}

/// Recomputes every rolling value from the team's strictly earlier matches and
/// compares it with what the builder attached.
fn audit_causality(records: &[RollingRecord], cfg: &RollingConfig) -> CausalityAudit {
    let plain: Vec<MatchRecord> = records.iter().map(|r| r.record.clone()).collect();
    let timelines = team_timelines(&plain);
    let columns = cfg.columns();
    let mut audit = CausalityAudit {
        teams: timelines.len(),
        checked: 0,
        defined: 0,
        mismatches: Vec::new(),
    };

    for (team, timeline) in &timelines {
        for (k, &idx) in timeline.iter().enumerate() {
            let current = &records[idx];
            let earlier: Vec<&MatchRecord> = timeline[..k]
                .iter()
                .map(|&j| &plain[j])
                .filter(|r| r.date <= current.record.date)
                .collect();
            for (c, col) in columns.iter().enumerate() {
                let expected = if earlier.len() < col.window || k < col.window {
                    None
                } else {
                    let tail = &earlier[earlier.len() - col.window..];
                    let values: Option<Vec<f64>> = tail.iter().map(|r| r.stat(col.stat)).collect();
                    values.map(|v| v.iter().sum::<f64>() / v.len() as f64)
                };
                let got = current.rolling.values.get(c).copied().flatten();
                audit.checked += 1;
                if got.is_some() {
                    audit.defined += 1;
                }
                let agree = match (expected, got) {
                    (None, None) => true,
                    (Some(a), Some(b)) => (a - b).abs() <= 1e-9 * a.abs().max(1.0),
                    _ => false,
                };
                if !agree {
                    audit.mismatches.push(format!(
                        "{team} {} {}: expected {expected:?}, got {got:?}",
                        current.record.date,
                        col.name()
                    ));
                }
            }
        }
    }
    audit
}
