use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::codes::{CategoryCodes, CodeSpace};
use crate::fixtures::{FixtureTable, PairingDiagnostics, PredictorSelection, pair_fixtures};
use crate::loader::load_raw_rows;
use crate::records::{RawMatchRow, normalize_rows};
use crate::rolling::{RollingConfig, RollingRecord, apply_rolling_averages};
use crate::split::{DatasetSplit, split_dataset};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub rolling: RollingConfig,
    pub selection: PredictorSelection,
    pub cutoff: NaiveDate,
}

impl PipelineConfig {
    /// Every model window must be one of the computed rolling windows.
    pub fn new(
        rolling: RollingConfig,
        selection: PredictorSelection,
        cutoff: NaiveDate,
    ) -> Result<Self> {
        for w in &selection.model_windows {
            if !rolling.windows().contains(w) {
                return Err(anyhow!(
                    "model window {w} is not among the computed windows {:?}",
                    rolling.windows()
                ));
            }
        }
        Ok(Self {
            rolling,
            selection,
            cutoff,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineDiagnostics {
    pub rows_in: usize,
    pub venues: usize,
    pub opponents: usize,
    pub pairing: PairingDiagnostics,
    pub canonical_rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub predictors: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub records: Vec<RollingRecord>,
    pub table: FixtureTable,
    pub split: DatasetSplit,
    pub diagnostics: PipelineDiagnostics,
}

/// Raw rows → normalized records → rolling features → canonical fixtures → split.
pub fn run_pipeline(
    rows: &[RawMatchRow],
    codes: &mut CategoryCodes,
    cfg: &PipelineConfig,
) -> Result<PipelineOutput> {
    let records = normalize_rows(rows, codes).context("normalize match rows")?;
    let venues = codes.len(CodeSpace::Venue);
    let opponents = codes.len(CodeSpace::Opponent);
    info!(records = records.len(), venues, opponents, "normalized match rows");

    let records = apply_rolling_averages(records, &cfg.rolling);
    info!(
        stats = cfg.rolling.stats().len(),
        windows = ?cfg.rolling.windows(),
        "rolling averages computed"
    );

    let table = pair_fixtures(&records, &cfg.rolling, &cfg.selection)?;
    if table.is_empty() {
        return Err(anyhow!(
            "no fixture has both perspectives and full rolling history for windows {:?}",
            cfg.selection.model_windows
        ));
    }

    let split = split_dataset(&table, &cfg.selection, cfg.cutoff)
        .with_context(|| format!("split fixtures at {}", cfg.cutoff))?;
    info!(
        cutoff = %cfg.cutoff,
        train = split.train.len(),
        test = split.test.len(),
        predictors = split.feature_names.len(),
        "dataset split"
    );
    if split.test.is_empty() {
        warn!(cutoff = %cfg.cutoff, "no fixtures on or after the cutoff; test partition is empty");
    }

    let diagnostics = PipelineDiagnostics {
        rows_in: rows.len(),
        venues,
        opponents,
        pairing: table.diagnostics.clone(),
        canonical_rows: table.len(),
        train_rows: split.train.len(),
        test_rows: split.test.len(),
        predictors: split.feature_names.len(),
    };

    Ok(PipelineOutput {
        records,
        table,
        split,
        diagnostics,
    })
}

pub fn prepare_from_file(
    path: &Path,
    codes: &mut CategoryCodes,
    cfg: &PipelineConfig,
) -> Result<PipelineOutput> {
    let rows = load_raw_rows(path)?;
    info!(path = %path.display(), rows = rows.len(), "loaded match rows");
    run_pipeline(&rows, codes, cfg)
}
