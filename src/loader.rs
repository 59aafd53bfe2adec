use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;

use crate::records::RawMatchRow;

/// Reads the match statistics file. `.parquet` goes through the parquet row
/// reader, everything else is treated as CSV with a header row.
pub fn load_raw_rows(path: &Path) -> Result<Vec<RawMatchRow>> {
    let is_parquet = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("parquet"));
    if is_parquet {
        read_parquet(path)
    } else {
        let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
        read_csv(file).with_context(|| format!("read csv {}", path.display()))
    }
}

pub fn read_csv<R: Read>(reader: R) -> Result<Vec<RawMatchRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut out = Vec::new();
    for (idx, row) in rdr.deserialize::<RawMatchRow>().enumerate() {
        let row = row.with_context(|| format!("decode csv row {}", idx + 1))?;
        out.push(row);
    }
    if out.is_empty() {
        return Err(anyhow!("input has no data rows"));
    }
    Ok(out)
}

fn read_parquet(path: &Path) -> Result<Vec<RawMatchRow>> {
    let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = SerializedFileReader::new(file).context("open parquet reader")?;
    let iter = reader.get_row_iter(None).context("iterate parquet rows")?;

    let mut out = Vec::new();
    for (idx, row) in iter.enumerate() {
        let row = row.with_context(|| format!("decode parquet row {}", idx + 1))?;
        let cells: HashMap<&str, String> = row
            .get_column_iter()
            .filter_map(|(name, field)| field_text(field).map(|v| (name.as_str(), v)))
            .collect();
        out.push(raw_row_from_cells(&cells));
    }
    if out.is_empty() {
        return Err(anyhow!("input has no data rows"));
    }
    Ok(out)
}

fn field_text(field: &Field) -> Option<String> {
    match field {
        Field::Null => None,
        Field::Str(s) => Some(s.clone()),
        Field::Double(v) => Some(v.to_string()),
        Field::Float(v) => Some(v.to_string()),
        Field::Long(v) => Some(v.to_string()),
        Field::Int(v) => Some(v.to_string()),
        Field::Short(v) => Some(v.to_string()),
        other => Some(other.to_string()),
    }
}

fn raw_row_from_cells(cells: &HashMap<&str, String>) -> RawMatchRow {
    let get = |name: &str| cells.get(name).cloned().unwrap_or_default();
    RawMatchRow {
        date: get("Date"),
        time: get("Time"),
        venue: get("Venue"),
        result: get("Result"),
        opponent: get("Opponent"),
        team: get("Team"),
        gf: get("GF"),
        ga: get("GA"),
        sh: get("Sh"),
        sot: get("SoT"),
        dist: get("Dist"),
        fk: get("FK"),
        pk: get("PK"),
        pkatt: get("PKatt"),
        xg: get("xG"),
        xga: get("xGA"),
        poss: get("Poss"),
    }
}
