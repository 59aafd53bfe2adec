use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::records::{InputError, MatchResult, OutcomeClass, Stat};
use crate::rolling::{DEFAULT_MODEL_WINDOWS, RollingColumn, RollingConfig, RollingRecord};

pub const CONTEXT_COLUMNS: [&str; 4] = ["venue_code", "opp_code", "hour", "day"];

/// Order-independent key for one fixture: both team names sorted, then the date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FixtureId(String);

impl FixtureId {
    pub fn new(team: &str, opponent: &str, date: NaiveDate) -> Self {
        let (a, b) = if team <= opponent {
            (team, opponent)
        } else {
            (opponent, team)
        };
        Self(format!("{a}_{b}_{}", date.format("%Y-%m-%d")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FixtureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Team1,
    Team2,
}

impl Side {
    pub fn prefix(self) -> &'static str {
        match self {
            Side::Team1 => "team1",
            Side::Team2 => "team2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Context,
    MatchStat(Stat),
    Rolling(RollingColumn),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureColumn {
    pub name: String,
    pub side: Side,
    pub kind: ColumnKind,
}

/// Column layout of a canonical fixture row: every Team1 column, then the same
/// columns for Team2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSchema {
    columns: Vec<FeatureColumn>,
}

impl FeatureSchema {
    pub fn new(rolling: &RollingConfig) -> Self {
        let mut columns = Vec::new();
        for side in [Side::Team1, Side::Team2] {
            let p = side.prefix();
            for name in CONTEXT_COLUMNS {
                columns.push(FeatureColumn {
                    name: format!("{p}_{name}"),
                    side,
                    kind: ColumnKind::Context,
                });
            }
            for stat in Stat::ALL {
                columns.push(FeatureColumn {
                    name: format!("{p}_{}", stat.name()),
                    side,
                    kind: ColumnKind::MatchStat(stat),
                });
            }
            for col in rolling.columns() {
                columns.push(FeatureColumn {
                    name: format!("{p}_{}", col.name()),
                    side,
                    kind: ColumnKind::Rolling(col),
                });
            }
        }
        Self { columns }
    }

    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn predictor_indices(&self, selection: &PredictorSelection) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| selection.accepts(c))
            .map(|(idx, _)| idx)
            .collect()
    }
}

/// Which schema columns are handed to models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictorSelection {
    pub model_windows: Vec<usize>,
    /// Same-match statistics are only known after the final whistle.
    pub include_match_stats: bool,
}

impl Default for PredictorSelection {
    fn default() -> Self {
        Self {
            model_windows: DEFAULT_MODEL_WINDOWS.to_vec(),
            include_match_stats: false,
        }
    }
}

impl PredictorSelection {
    pub fn accepts(&self, column: &FeatureColumn) -> bool {
        match column.kind {
            ColumnKind::Context => true,
            ColumnKind::MatchStat(_) => self.include_match_stats,
            ColumnKind::Rolling(r) => self.model_windows.contains(&r.window),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalFixtureRow {
    pub fixture_id: FixtureId,
    pub date: NaiveDate,
    pub team1: String,
    pub team2: String,
    pub result_team1: MatchResult,
    pub result_team2: MatchResult,
    pub points_team1: u8,
    pub points_team2: u8,
    pub target: OutcomeClass,
    /// Aligned with [`FeatureSchema::columns`].
    pub features: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairingDiagnostics {
    pub records_in: usize,
    pub fixtures_seen: usize,
    pub unpaired_perspectives: usize,
    pub mirrors_discarded: usize,
    pub dropped_missing: usize,
    pub result_mismatches: usize,
    pub residual_missing: BTreeMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct FixtureTable {
    pub schema: FeatureSchema,
    pub rows: Vec<CanonicalFixtureRow>,
    pub diagnostics: PairingDiagnostics,
}

impl FixtureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Joins the two perspectives of every fixture into one canonical row and drops
/// rows with a missing predictor. Rows come back ordered by date, then fixture id.
pub fn pair_fixtures(
    records: &[RollingRecord],
    rolling: &RollingConfig,
    selection: &PredictorSelection,
) -> Result<FixtureTable> {
    let schema = FeatureSchema::new(rolling);
    let predictors = schema.predictor_indices(selection);
    let mut diag = PairingDiagnostics {
        records_in: records.len(),
        ..Default::default()
    };

    let ids: Vec<FixtureId> = records
        .iter()
        .map(|r| FixtureId::new(&r.record.team, &r.record.opponent, r.record.date))
        .collect();

    // Second perspective table keyed by (fixture, subject team).
    let mut by_subject: HashMap<(&FixtureId, &str), usize> = HashMap::with_capacity(records.len());
    for (idx, (id, r)) in ids.iter().zip(records).enumerate() {
        if by_subject.insert((id, r.record.team.as_str()), idx).is_some() {
            return Err(InputError::DuplicatePerspective {
                fixture: id.to_string(),
                team: r.record.team.clone(),
            }
            .into());
        }
    }
    // Underscores in team names can make two id strings collide, so count teams.
    diag.fixtures_seen = records
        .iter()
        .map(|r| {
            let (team, opp) = (r.record.team.as_str(), r.record.opponent.as_str());
            (r.record.date, team.min(opp), team.max(opp))
        })
        .collect::<HashSet<_>>()
        .len();

    let mut rows = Vec::new();
    for (id, left) in ids.iter().zip(records) {
        let subject = &left.record;
        let partner = by_subject
            .get(&(id, subject.opponent.as_str()))
            .map(|&j| &records[j])
            .filter(|r| r.record.opponent == subject.team);
        let Some(right) = partner else {
            diag.unpaired_perspectives += 1;
            continue;
        };
        if subject.team >= subject.opponent {
            diag.mirrors_discarded += 1;
            continue;
        }
        if right.record.result != subject.result.mirror() {
            diag.result_mismatches += 1;
            warn!(
                fixture = %id,
                team1 = %subject.team,
                result_team1 = %subject.result.code(),
                result_team2 = %right.record.result.code(),
                "fixture results are not mirrored"
            );
        }

        let mut features = side_values(left);
        features.extend(side_values(right));

        rows.push(CanonicalFixtureRow {
            fixture_id: id.clone(),
            date: subject.date,
            team1: subject.team.clone(),
            team2: subject.opponent.clone(),
            result_team1: subject.result,
            result_team2: right.record.result,
            points_team1: subject.points,
            points_team2: right.record.points,
            target: subject.result.class(),
            features,
        });
    }

    let joined = rows.len();
    rows.retain(|row| predictors.iter().all(|&c| row.features[c].is_some()));
    diag.dropped_missing = joined - rows.len();
    diag.residual_missing = residual_missing(&schema, &predictors, &rows);
    if !diag.residual_missing.is_empty() {
        warn!(columns = ?diag.residual_missing, "predictor columns still hold missing values");
    }

    rows.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.fixture_id.cmp(&b.fixture_id)));

    info!(
        records = diag.records_in,
        fixtures = diag.fixtures_seen,
        canonical = rows.len(),
        unpaired = diag.unpaired_perspectives,
        dropped_missing = diag.dropped_missing,
        "paired fixtures"
    );
    if diag.unpaired_perspectives > 0 {
        warn!(
            count = diag.unpaired_perspectives,
            "match rows without the opponent's perspective were skipped"
        );
    }

    Ok(FixtureTable {
        schema,
        rows,
        diagnostics: diag,
    })
}

fn side_values(r: &RollingRecord) -> Vec<Option<f64>> {
    let rec = &r.record;
    let mut out = Vec::with_capacity(CONTEXT_COLUMNS.len() + Stat::ALL.len() + r.rolling.values.len());
    out.push(Some(rec.venue_code as f64));
    out.push(Some(rec.opponent_code as f64));
    out.push(Some(rec.hour as f64));
    out.push(Some(rec.day_of_week as f64));
    out.extend(Stat::ALL.iter().map(|s| rec.stat(*s)));
    out.extend(r.rolling.values.iter().copied());
    out
}

/// Missing-value count per predictor column; columns without gaps are omitted.
pub fn residual_missing(
    schema: &FeatureSchema,
    predictors: &[usize],
    rows: &[CanonicalFixtureRow],
) -> BTreeMap<String, usize> {
    let mut out = BTreeMap::new();
    for &c in predictors {
        let n = rows.iter().filter(|r| r.features[c].is_none()).count();
        if n > 0 {
            out.insert(schema.columns()[c].name.clone(), n);
        }
    }
    out
}
