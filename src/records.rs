use std::fmt;

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use thiserror::Error;

use crate::codes::{CategoryCodes, CodeSpace};

/// One input row as it appears in the match statistics file. Numeric cells are
/// kept as text so the normalizer decides what counts as missing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMatchRow {
    #[serde(rename = "Date", default)]
    pub date: String,
    #[serde(rename = "Time", default)]
    pub time: String,
    #[serde(rename = "Venue", default)]
    pub venue: String,
    #[serde(rename = "Result", default)]
    pub result: String,
    #[serde(rename = "Opponent", default)]
    pub opponent: String,
    #[serde(rename = "Team", default)]
    pub team: String,
    #[serde(rename = "GF", default)]
    pub gf: String,
    #[serde(rename = "GA", default)]
    pub ga: String,
    #[serde(rename = "Sh", default)]
    pub sh: String,
    #[serde(rename = "SoT", default)]
    pub sot: String,
    #[serde(rename = "Dist", default)]
    pub dist: String,
    #[serde(rename = "FK", default)]
    pub fk: String,
    #[serde(rename = "PK", default)]
    pub pk: String,
    #[serde(rename = "PKatt", default)]
    pub pkatt: String,
    #[serde(rename = "xG", default)]
    pub xg: String,
    #[serde(rename = "xGA", default)]
    pub xga: String,
    #[serde(rename = "Poss", default)]
    pub poss: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("row {row}: missing required field {field}")]
    MissingField { row: usize, field: &'static str },
    #[error("row {row}: unparseable date {raw:?}")]
    BadDate { row: usize, raw: String },
    #[error("row {row}: kickoff time {raw:?} does not start with an hour")]
    BadKickoff { row: usize, raw: String },
    #[error("row {row}: unrecognized result code {raw:?} (expected W, D or L)")]
    UnknownResult { row: usize, raw: String },
    #[error("row {row}: column {field} holds non-numeric value {raw:?}")]
    BadNumber {
        row: usize,
        field: &'static str,
        raw: String,
    },
    #[error("row {row}: team {team:?} is listed as its own opponent")]
    SelfFixture { row: usize, team: String },
    #[error("fixture {fixture}: more than one row from {team:?}'s perspective")]
    DuplicatePerspective { fixture: String, team: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchResult {
    Win,
    Draw,
    Loss,
}

impl MatchResult {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "W" => Some(Self::Win),
            "D" => Some(Self::Draw),
            "L" => Some(Self::Loss),
            _ => None,
        }
    }

    pub fn code(self) -> char {
        match self {
            Self::Win => 'W',
            Self::Draw => 'D',
            Self::Loss => 'L',
        }
    }

    pub fn points(self) -> u8 {
        match self {
            Self::Win => 3,
            Self::Draw => 1,
            Self::Loss => 0,
        }
    }

    pub fn class(self) -> OutcomeClass {
        match self {
            Self::Win => OutcomeClass::Win,
            Self::Draw => OutcomeClass::Draw,
            Self::Loss => OutcomeClass::Loss,
        }
    }

    /// The result the opponent should have recorded for the same fixture.
    pub fn mirror(self) -> Self {
        match self {
            Self::Win => Self::Loss,
            Self::Draw => Self::Draw,
            Self::Loss => Self::Win,
        }
    }
}

/// Classification target. The discriminant is the class index used by every model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutcomeClass {
    Loss = 0,
    Draw = 1,
    Win = 2,
}

impl OutcomeClass {
    pub const ALL: [OutcomeClass; 3] = [OutcomeClass::Loss, OutcomeClass::Draw, OutcomeClass::Win];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    pub fn from_points(points: u8) -> Option<Self> {
        match points {
            0 => Some(Self::Loss),
            1 => Some(Self::Draw),
            3 => Some(Self::Win),
            _ => None,
        }
    }

    pub fn points(self) -> u8 {
        match self {
            Self::Loss => 0,
            Self::Draw => 1,
            Self::Win => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Loss => "Loss",
            Self::Draw => "Draw",
            Self::Win => "Win",
        }
    }
}

impl fmt::Display for OutcomeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-match statistics that can be rolled. Raw ones come straight from the
/// input file, the last three are derived by the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stat {
    GoalsFor,
    GoalsAgainst,
    Shots,
    ShotsOnTarget,
    Distance,
    FreeKicks,
    Penalties,
    PenaltiesAttempted,
    Xg,
    XgAgainst,
    Possession,
    ShotEfficiency,
    PossessionXg,
    XgDifference,
}

impl Stat {
    pub const ALL: [Stat; 14] = [
        Stat::GoalsFor,
        Stat::GoalsAgainst,
        Stat::Shots,
        Stat::ShotsOnTarget,
        Stat::Distance,
        Stat::FreeKicks,
        Stat::Penalties,
        Stat::PenaltiesAttempted,
        Stat::Xg,
        Stat::XgAgainst,
        Stat::Possession,
        Stat::ShotEfficiency,
        Stat::PossessionXg,
        Stat::XgDifference,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stat::GoalsFor => "gf",
            Stat::GoalsAgainst => "ga",
            Stat::Shots => "sh",
            Stat::ShotsOnTarget => "sot",
            Stat::Distance => "dist",
            Stat::FreeKicks => "fk",
            Stat::Penalties => "pk",
            Stat::PenaltiesAttempted => "pkatt",
            Stat::Xg => "xg",
            Stat::XgAgainst => "xga",
            Stat::Possession => "poss",
            Stat::ShotEfficiency => "shot_ef",
            Stat::PossessionXg => "poss_xg",
            Stat::XgDifference => "xg_dif",
        }
    }

    pub fn from_name(raw: &str) -> Option<Self> {
        let needle = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|s| s.name() == needle)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawStats {
    pub gf: Option<f64>,
    pub ga: Option<f64>,
    pub sh: Option<f64>,
    pub sot: Option<f64>,
    pub dist: Option<f64>,
    pub fk: Option<f64>,
    pub pk: Option<f64>,
    pub pkatt: Option<f64>,
    pub xg: Option<f64>,
    pub xga: Option<f64>,
    pub poss: Option<f64>,
}

/// One team's participation in one fixture, after parsing and encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRecord {
    /// 1-based position of the source row, used in diagnostics.
    pub row: usize,
    pub team: String,
    pub opponent: String,
    pub venue: String,
    pub date: NaiveDate,
    pub venue_code: u32,
    pub opponent_code: u32,
    pub hour: u32,
    /// 0 = Monday .. 6 = Sunday.
    pub day_of_week: u32,
    pub stats: RawStats,
    pub poss_xg: Option<f64>,
    pub shot_ef: Option<f64>,
    pub xg_dif: Option<f64>,
    pub result: MatchResult,
    pub points: u8,
}

impl MatchRecord {
    pub fn stat(&self, stat: Stat) -> Option<f64> {
        match stat {
            Stat::GoalsFor => self.stats.gf,
            Stat::GoalsAgainst => self.stats.ga,
            Stat::Shots => self.stats.sh,
            Stat::ShotsOnTarget => self.stats.sot,
            Stat::Distance => self.stats.dist,
            Stat::FreeKicks => self.stats.fk,
            Stat::Penalties => self.stats.pk,
            Stat::PenaltiesAttempted => self.stats.pkatt,
            Stat::Xg => self.stats.xg,
            Stat::XgAgainst => self.stats.xga,
            Stat::Possession => self.stats.poss,
            Stat::ShotEfficiency => self.shot_ef,
            Stat::PossessionXg => self.poss_xg,
            Stat::XgDifference => self.xg_dif,
        }
    }

    pub fn target(&self) -> OutcomeClass {
        self.result.class()
    }
}

struct ParsedRow {
    row: usize,
    team: String,
    opponent: String,
    venue: String,
    date: NaiveDate,
    hour: u32,
    stats: RawStats,
    result: MatchResult,
}

/// Parses every raw row and assigns categorical codes from `codes`, registering
/// venues and opponents it has not seen yet. Any malformed row aborts the batch.
pub fn normalize_rows(rows: &[RawMatchRow], codes: &mut CategoryCodes) -> Result<Vec<MatchRecord>> {
    let mut parsed = Vec::with_capacity(rows.len());
    for (idx, raw) in rows.iter().enumerate() {
        parsed.push(parse_row(idx + 1, raw)?);
    }

    codes.register(CodeSpace::Venue, parsed.iter().map(|p| p.venue.as_str()));
    codes.register(CodeSpace::Opponent, parsed.iter().map(|p| p.opponent.as_str()));

    let mut out = Vec::with_capacity(parsed.len());
    for p in parsed {
        let venue_code = codes
            .code(CodeSpace::Venue, &p.venue)
            .with_context(|| format!("row {}: venue {:?} has no code", p.row, p.venue))?;
        let opponent_code = codes
            .code(CodeSpace::Opponent, &p.opponent)
            .with_context(|| format!("row {}: opponent {:?} has no code", p.row, p.opponent))?;

        let stats = p.stats;
        out.push(MatchRecord {
            row: p.row,
            day_of_week: p.date.weekday().num_days_from_monday(),
            poss_xg: product(stats.poss, stats.xg),
            shot_ef: shot_efficiency(stats.sot, stats.sh),
            xg_dif: difference(stats.xg, stats.xga),
            points: p.result.points(),
            team: p.team,
            opponent: p.opponent,
            venue: p.venue,
            date: p.date,
            venue_code,
            opponent_code,
            hour: p.hour,
            stats,
            result: p.result,
        });
    }
    Ok(out)
}

fn parse_row(row: usize, raw: &RawMatchRow) -> Result<ParsedRow, InputError> {
    let team = required(row, "Team", &raw.team)?;
    let opponent = required(row, "Opponent", &raw.opponent)?;
    if team == opponent {
        return Err(InputError::SelfFixture { row, team });
    }
    let venue = required(row, "Venue", &raw.venue)?;

    let date_raw = required(row, "Date", &raw.date)?;
    let date = parse_match_date(&date_raw).ok_or(InputError::BadDate { row, raw: date_raw })?;

    let time_raw = required(row, "Time", &raw.time)?;
    let hour = parse_kickoff_hour(&time_raw).ok_or(InputError::BadKickoff { row, raw: time_raw })?;

    let result_raw = required(row, "Result", &raw.result)?;
    let result =
        MatchResult::parse(&result_raw).ok_or(InputError::UnknownResult { row, raw: result_raw })?;

    let stats = RawStats {
        gf: number(row, "GF", &raw.gf)?,
        ga: number(row, "GA", &raw.ga)?,
        sh: number(row, "Sh", &raw.sh)?,
        sot: number(row, "SoT", &raw.sot)?,
        dist: number(row, "Dist", &raw.dist)?,
        fk: number(row, "FK", &raw.fk)?,
        pk: number(row, "PK", &raw.pk)?,
        pkatt: number(row, "PKatt", &raw.pkatt)?,
        xg: number(row, "xG", &raw.xg)?,
        xga: number(row, "xGA", &raw.xga)?,
        poss: number(row, "Poss", &raw.poss)?,
    };

    Ok(ParsedRow {
        row,
        team,
        opponent,
        venue,
        date,
        hour,
        stats,
        result,
    })
}

fn required(row: usize, field: &'static str, raw: &str) -> Result<String, InputError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(InputError::MissingField { row, field });
    }
    Ok(trimmed.to_string())
}

fn number(row: usize, field: &'static str, raw: &str) -> Result<Option<f64>, InputError> {
    parse_cell(raw).map_err(|_| InputError::BadNumber {
        row,
        field,
        raw: raw.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CellError {
    #[error(transparent)]
    NotNumeric(#[from] std::num::ParseFloatError),
    #[error("value is not finite")]
    NonFinite,
}

/// Empty and NA-style cells are missing; anything else must parse as a finite
/// number. `inf` or an overflowing literal is an error, not a missing value.
pub fn parse_cell(raw: &str) -> Result<Option<f64>, CellError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || matches!(trimmed, "NA" | "N/A" | "NaN" | "nan" | "null") {
        return Ok(None);
    }
    let v = trimmed.parse::<f64>()?;
    if !v.is_finite() {
        return Err(CellError::NonFinite);
    }
    Ok(Some(v))
}

/// Slash dates without a leading year are month-first (`05/01/2024` is 1 May).
pub fn parse_match_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    let day_part = trimmed
        .split(|c: char| c == 'T' || c == ' ')
        .next()
        .unwrap_or(trimmed);
    ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(day_part, fmt).ok())
}

/// "20:00 (21:00)" -> 20. The text before the first colon must be an hour.
pub fn parse_kickoff_hour(raw: &str) -> Option<u32> {
    let head = raw.split(':').next()?.trim();
    if head.is_empty() || !head.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    head.parse::<u32>().ok().filter(|h| *h < 24)
}

pub fn shot_efficiency(on_target: Option<f64>, shots: Option<f64>) -> Option<f64> {
    let (sot, sh) = (on_target?, shots?);
    if sh == 0.0 {
        return None;
    }
    let v = sot / sh;
    v.is_finite().then_some(v)
}

fn product(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some(a? * b?)
}

fn difference(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some(a? - b?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn raw_row(team: &str, opponent: &str, date: &str, result: &str) -> RawMatchRow {
        RawMatchRow {
            date: date.to_string(),
            time: "15:00".to_string(),
            venue: "Home".to_string(),
            result: result.to_string(),
            opponent: opponent.to_string(),
            team: team.to_string(),
            gf: "2".to_string(),
            ga: "1".to_string(),
            sh: "12".to_string(),
            sot: "4".to_string(),
            dist: "17.5".to_string(),
            fk: "1".to_string(),
            pk: "0".to_string(),
            pkatt: "0".to_string(),
            xg: "1.6".to_string(),
            xga: "0.9".to_string(),
            poss: "55".to_string(),
        }
    }

    #[test]
    fn points_then_class_matches_direct_class() {
        for code in ["W", "D", "L"] {
            let result = MatchResult::parse(code).unwrap();
            assert_eq!(OutcomeClass::from_points(result.points()), Some(result.class()));
        }
        assert_eq!(MatchResult::Win.class().index(), 2);
        assert_eq!(MatchResult::Draw.class().index(), 1);
        assert_eq!(MatchResult::Loss.class().index(), 0);
        assert_eq!(OutcomeClass::from_points(2), None);
    }

    #[test]
    fn kickoff_hour_takes_prefix_before_colon() {
        assert_eq!(parse_kickoff_hour("20:00"), Some(20));
        assert_eq!(parse_kickoff_hour("12:30 (13:30)"), Some(12));
        assert_eq!(parse_kickoff_hour("7:45"), Some(7));
        assert_eq!(parse_kickoff_hour("xx:00"), None);
        assert_eq!(parse_kickoff_hour(""), None);
        assert_eq!(parse_kickoff_hour("25:00"), None);
    }

    #[test]
    fn dates_accept_common_layouts() {
        let want = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(parse_match_date("2024-05-01"), Some(want));
        assert_eq!(parse_match_date("2024/05/01"), Some(want));
        assert_eq!(parse_match_date("05/01/2024"), Some(want));
        assert_eq!(parse_match_date("13/05/2024"), None);
        assert_eq!(parse_match_date("2024-05-01 00:00:00"), Some(want));
        assert_eq!(parse_match_date("May 1st"), None);
    }

    #[test]
    fn derived_stats_and_day_of_week() {
        let mut codes = CategoryCodes::default();
        // 2024-05-01 was a Wednesday.
        let rows = vec![raw_row("Arsenal", "Chelsea", "2024-05-01", "W")];
        let recs = normalize_rows(&rows, &mut codes).unwrap();
        let r = &recs[0];
        assert_eq!(r.day_of_week, 2);
        assert_eq!(r.hour, 15);
        assert_eq!(r.points, 3);
        assert!((r.poss_xg.unwrap() - 88.0).abs() < 1e-9);
        assert!((r.shot_ef.unwrap() - 4.0 / 12.0).abs() < 1e-12);
        assert!((r.xg_dif.unwrap() - 0.7).abs() < 1e-12);
        assert_eq!(r.stat(Stat::XgDifference), r.xg_dif);
    }

    #[test]
    fn zero_shots_gives_missing_efficiency() {
        let mut codes = CategoryCodes::default();
        let mut row = raw_row("Arsenal", "Chelsea", "2024-05-01", "D");
        row.sh = "0".to_string();
        row.sot = "0".to_string();
        let recs = normalize_rows(&[row], &mut codes).unwrap();
        assert_eq!(recs[0].shot_ef, None);
        assert_eq!(recs[0].stats.sh, Some(0.0));
    }

    #[test]
    fn missing_cells_propagate_to_derived_stats() {
        let mut codes = CategoryCodes::default();
        let mut row = raw_row("Arsenal", "Chelsea", "2024-05-01", "L");
        row.xga = "".to_string();
        let recs = normalize_rows(&[row], &mut codes).unwrap();
        assert_eq!(recs[0].stats.xga, None);
        assert_eq!(recs[0].xg_dif, None);
        assert!(recs[0].poss_xg.is_some());
    }

    #[test]
    fn unknown_result_aborts() {
        let mut codes = CategoryCodes::default();
        let rows = vec![
            raw_row("Arsenal", "Chelsea", "2024-05-01", "W"),
            raw_row("Chelsea", "Arsenal", "2024-05-01", "X"),
        ];
        let err = normalize_rows(&rows, &mut codes).unwrap_err();
        let input = err.downcast_ref::<InputError>().unwrap();
        assert_eq!(
            *input,
            InputError::UnknownResult {
                row: 2,
                raw: "X".to_string()
            }
        );
    }

    #[test]
    fn malformed_kickoff_and_numbers_abort() {
        let mut codes = CategoryCodes::default();
        let mut row = raw_row("Arsenal", "Chelsea", "2024-05-01", "W");
        row.time = "TBC".to_string();
        let err = normalize_rows(&[row], &mut codes).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InputError>(),
            Some(InputError::BadKickoff { row: 1, .. })
        ));

        let mut row = raw_row("Arsenal", "Chelsea", "2024-05-01", "W");
        row.sh = "twelve".to_string();
        let err = normalize_rows(&[row], &mut codes).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InputError>(),
            Some(InputError::BadNumber { field: "Sh", .. })
        ));
    }

    #[test]
    fn na_tokens_are_missing_but_infinities_abort() {
        for token in ["NA", "NaN", "null", " "] {
            assert_eq!(parse_cell(token), Ok(None), "{token:?}");
        }
        assert_eq!(parse_cell("2.0"), Ok(Some(2.0)));
        assert_eq!(parse_cell("inf"), Err(CellError::NonFinite));
        assert_eq!(parse_cell("-inf"), Err(CellError::NonFinite));
        assert_eq!(parse_cell("1e999"), Err(CellError::NonFinite));

        let mut codes = CategoryCodes::default();
        let mut row = raw_row("Arsenal", "Chelsea", "2024-05-01", "W");
        row.xg = "NaN".to_string();
        row.poss = "null".to_string();
        let recs = normalize_rows(&[row], &mut codes).unwrap();
        assert_eq!(recs[0].stats.xg, None);
        assert_eq!(recs[0].stats.poss, None);
        assert_eq!(recs[0].poss_xg, None);

        let mut row = raw_row("Arsenal", "Chelsea", "2024-05-01", "W");
        row.sh = "inf".to_string();
        let err = normalize_rows(&[row], &mut codes).unwrap_err();
        assert_eq!(
            err.downcast_ref::<InputError>(),
            Some(&InputError::BadNumber {
                row: 1,
                field: "Sh",
                raw: "inf".to_string()
            })
        );
    }

    #[test]
    fn empty_identity_fields_abort() {
        let mut codes = CategoryCodes::default();
        let mut row = raw_row("Arsenal", "Chelsea", "2024-05-01", "W");
        row.team = "  ".to_string();
        let err = normalize_rows(&[row], &mut codes).unwrap_err();
        assert_eq!(
            err.downcast_ref::<InputError>(),
            Some(&InputError::MissingField { row: 1, field: "Team" })
        );

        let rows = vec![
            raw_row("Arsenal", "Chelsea", "2024-05-01", "W"),
            raw_row("Chelsea", "Arsenal", "", "L"),
        ];
        let err = normalize_rows(&rows, &mut codes).unwrap_err();
        assert_eq!(
            err.downcast_ref::<InputError>(),
            Some(&InputError::MissingField { row: 2, field: "Date" })
        );
    }

    #[test]
    fn team_listed_as_own_opponent_aborts() {
        let mut codes = CategoryCodes::default();
        let row = raw_row("Arsenal", " Arsenal ", "2024-05-01", "D");
        let err = normalize_rows(&[row], &mut codes).unwrap_err();
        assert_eq!(
            err.downcast_ref::<InputError>(),
            Some(&InputError::SelfFixture {
                row: 1,
                team: "Arsenal".to_string()
            })
        );
        assert!(codes.is_empty());
    }

    #[test]
    fn codes_follow_sorted_categories() {
        let mut codes = CategoryCodes::default();
        let mut away = raw_row("Chelsea", "Arsenal", "2024-05-01", "L");
        away.venue = "Away".to_string();
        let rows = vec![raw_row("Arsenal", "Chelsea", "2024-05-01", "W"), away];
        let recs = normalize_rows(&rows, &mut codes).unwrap();
        assert_eq!(recs[0].venue_code, 1);
        assert_eq!(recs[1].venue_code, 0);
        assert_eq!(recs[0].opponent_code, 1);
        assert_eq!(recs[1].opponent_code, 0);
    }

    #[test]
    fn stat_names_round_trip() {
        for stat in Stat::ALL {
            assert_eq!(Stat::from_name(stat.name()), Some(stat));
        }
        assert_eq!(Stat::from_name("XG_DIF"), Some(Stat::XgDifference));
        assert_eq!(Stat::from_name("npxg"), None);
    }
}
