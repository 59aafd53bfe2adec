use std::collections::HashSet;
use std::path::PathBuf;

use chrono::NaiveDate;

use matchform::codes::CategoryCodes;
use matchform::fixtures::PredictorSelection;
use matchform::loader::load_raw_rows;
use matchform::pipeline::{PipelineConfig, PipelineOutput, run_pipeline};
use matchform::records::{OutcomeClass, RawMatchRow, Stat};
use matchform::rolling::RollingConfig;

fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/matches_small.csv")
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn one_match_config() -> PipelineConfig {
    let rolling = RollingConfig::new(Stat::ALL.to_vec(), vec![1]).unwrap();
    let selection = PredictorSelection {
        model_windows: vec![1],
        include_match_stats: false,
    };
    PipelineConfig::new(rolling, selection, date("2025-01-01")).unwrap()
}

fn run(rows: &[RawMatchRow]) -> PipelineOutput {
    let mut codes = CategoryCodes::default();
    run_pipeline(rows, &mut codes, &one_match_config()).unwrap()
}

#[test]
fn small_season_produces_one_row_per_fixture() {
    let rows = load_raw_rows(&fixture_path()).unwrap();
    assert_eq!(rows.len(), 25);
    let out = run(&rows);

    let p = &out.diagnostics.pairing;
    assert_eq!(p.records_in, 25);
    assert_eq!(p.fixtures_seen, 13);
    assert_eq!(p.unpaired_perspectives, 1);
    assert_eq!(p.mirrors_discarded, 12);
    assert_eq!(p.dropped_missing, 2);
    assert_eq!(p.result_mismatches, 0);
    assert!(p.residual_missing.is_empty());

    assert_eq!(out.table.len(), 10);
    let ids: HashSet<&str> = out.table.rows.iter().map(|r| r.fixture_id.as_str()).collect();
    assert_eq!(ids.len(), 10);
    for row in &out.table.rows {
        assert!(row.team1 < row.team2);
        assert_ne!(row.team2, "Fulham");
    }

    assert_eq!(out.split.train.len(), 6);
    assert_eq!(out.split.test.len(), 4);
    assert!(out.split.train.fixtures.iter().all(|f| f.date < date("2025-01-01")));
    assert!(out.split.test.fixtures.iter().all(|f| f.date >= date("2025-01-01")));
}

#[test]
fn target_follows_team1_result() {
    let rows = load_raw_rows(&fixture_path()).unwrap();
    let out = run(&rows);
    let row = out
        .table
        .rows
        .iter()
        .find(|r| r.fixture_id.as_str() == "Arsenal_Brighton_2024-12-14")
        .unwrap();
    assert_eq!(row.team1, "Arsenal");
    assert_eq!(row.target, OutcomeClass::Win);
    assert_eq!(row.points_team1, 3);
    assert_eq!(row.points_team2, 0);

    let draw = out
        .table
        .rows
        .iter()
        .find(|r| r.fixture_id.as_str() == "Arsenal_Chelsea_2025-01-01")
        .unwrap();
    assert_eq!(draw.target, OutcomeClass::Draw);
}

#[test]
fn predictors_exclude_same_match_stats_by_default() {
    let rows = load_raw_rows(&fixture_path()).unwrap();
    let out = run(&rows);
    let names = &out.split.feature_names;
    // 4 context columns and 14 one-match averages per side.
    assert_eq!(names.len(), 36);
    assert!(names.contains(&"team1_xg_roll_1".to_string()));
    assert!(names.contains(&"team2_venue_code".to_string()));
    assert!(!names.contains(&"team1_xg".to_string()));
    assert!(!names.iter().any(|n| n.contains("result") || n.contains("points")));
}

#[test]
fn rolling_values_ignore_the_current_and_later_matches() {
    let rows = load_raw_rows(&fixture_path()).unwrap();
    let base = run(&rows);

    let mut changed = rows.clone();
    for row in &mut changed {
        if row.team == "Arsenal" && row.date == "2024-12-14" {
            row.xg = "9.9".to_string();
            row.gf = "7".to_string();
        }
    }
    let out = run(&changed);

    let cut = date("2024-12-14");
    for (a, b) in base.records.iter().zip(&out.records) {
        if a.record.team == "Arsenal" && a.record.date <= cut {
            assert_eq!(a.rolling, b.rolling, "{} changed", a.record.date);
        }
    }
    let next = out
        .records
        .iter()
        .find(|r| r.record.team == "Arsenal" && r.record.date == date("2025-01-01"))
        .unwrap();
    let xg_roll = next.rolling.get(&one_match_config().rolling, Stat::Xg, 1);
    assert_eq!(xg_roll, Some(9.9));
}

#[test]
fn scaler_is_fit_on_train_rows_only() {
    let rows = load_raw_rows(&fixture_path()).unwrap();
    let base = run(&rows);

    // Stats from the cutoff day only feed the rolling values of test fixtures.
    let mut changed = rows.clone();
    for row in &mut changed {
        if row.date == "2025-01-01" {
            row.xg = "4.2".to_string();
            row.poss = "80".to_string();
        }
    }
    let out = run(&changed);

    assert_eq!(base.split.scaler, out.split.scaler);
    assert_eq!(base.split.train.features, out.split.train.features);
    assert_ne!(base.split.test.features, out.split.test.features);

    let n = base.split.train.len() as f64;
    for c in 0..base.split.feature_names.len() {
        let mean: f64 = base.split.train.features.iter().map(|r| r[c]).sum::<f64>() / n;
        assert!(mean.abs() < 1e-9);
    }
}

#[test]
fn malformed_rows_abort_the_run() {
    let mut rows = load_raw_rows(&fixture_path()).unwrap();
    rows[3].result = "X".to_string();
    let mut codes = CategoryCodes::default();
    let err = run_pipeline(&rows, &mut codes, &one_match_config()).unwrap_err();
    assert!(format!("{err:#}").contains("unrecognized result code \"X\""));

    let mut rows = load_raw_rows(&fixture_path()).unwrap();
    rows[0].date = "yesterday".to_string();
    assert!(run_pipeline(&rows, &mut CategoryCodes::default(), &one_match_config()).is_err());
}

#[test]
fn default_windows_need_longer_history() {
    let rows = load_raw_rows(&fixture_path()).unwrap();
    let cfg = PipelineConfig::new(
        RollingConfig::default(),
        PredictorSelection::default(),
        date("2025-01-01"),
    )
    .unwrap();
    // Six matches per team never fill a ten-match window.
    assert!(run_pipeline(&rows, &mut CategoryCodes::default(), &cfg).is_err());
}
