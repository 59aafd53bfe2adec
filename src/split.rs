use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::fixtures::{FixtureId, FixtureTable, PredictorSelection};
use crate::records::OutcomeClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Train,
    Test,
}

/// Rows strictly before the cutoff train; the cutoff day itself is test data.
pub fn partition_for(date: NaiveDate, cutoff: NaiveDate) -> Partition {
    if date < cutoff {
        Partition::Train
    } else {
        Partition::Test
    }
}

/// Per-column z-scoring. Population standard deviation; constant columns keep scale 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl Standardizer {
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self> {
        let Some(first) = rows.first() else {
            return Err(anyhow!("cannot fit a standardizer without training rows"));
        };
        let width = first.len();
        if rows.iter().any(|r| r.len() != width) {
            return Err(anyhow!("training rows have inconsistent widths"));
        }

        let n = rows.len() as f64;
        let mut means = vec![0.0; width];
        for row in rows {
            for (m, x) in means.iter_mut().zip(row) {
                *m += x;
            }
        }
        for m in &mut means {
            *m /= n;
        }

        let mut stds = vec![0.0; width];
        for row in rows {
            for ((s, x), m) in stds.iter_mut().zip(row).zip(&means) {
                *s += (x - m).powi(2);
            }
        }
        for s in &mut stds {
            let sd = (*s / n).sqrt();
            *s = if sd > 1e-12 && sd.is_finite() { sd } else { 1.0 };
        }

        Ok(Self { means, stds })
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(x, (m, s))| (x - m) / s)
            .collect()
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter().map(|r| self.transform_row(r)).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FixtureMeta {
    pub fixture_id: FixtureId,
    pub date: NaiveDate,
    pub team1: String,
    pub team2: String,
    pub points_team1: u8,
}

/// Parallel feature rows, targets and fixture identities for one partition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitPart {
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<OutcomeClass>,
    pub fixtures: Vec<FixtureMeta>,
}

impl SplitPart {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn target_indices(&self) -> Vec<usize> {
        self.targets.iter().map(|t| t.index()).collect()
    }

    fn push(&mut self, features: Vec<f64>, target: OutcomeClass, meta: FixtureMeta) {
        self.features.push(features);
        self.targets.push(target);
        self.fixtures.push(meta);
    }
}

#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub cutoff: NaiveDate,
    pub feature_names: Vec<String>,
    pub scaler: Standardizer,
    pub train: SplitPart,
    pub test: SplitPart,
}

/// Selects predictor columns, splits by date and standardizes both partitions with
/// parameters estimated from the train partition alone.
pub fn split_dataset(
    table: &FixtureTable,
    selection: &PredictorSelection,
    cutoff: NaiveDate,
) -> Result<DatasetSplit> {
    let predictors = table.schema.predictor_indices(selection);
    if predictors.is_empty() {
        return Err(anyhow!("predictor selection is empty"));
    }
    let feature_names = predictors
        .iter()
        .map(|&c| table.schema.columns()[c].name.clone())
        .collect();

    let mut train = SplitPart::default();
    let mut test = SplitPart::default();
    for row in &table.rows {
        let mut values = Vec::with_capacity(predictors.len());
        for &c in &predictors {
            let v = row.features[c].ok_or_else(|| {
                anyhow!(
                    "fixture {} reached the splitter with missing {}",
                    row.fixture_id,
                    table.schema.columns()[c].name
                )
            })?;
            values.push(v);
        }
        let meta = FixtureMeta {
            fixture_id: row.fixture_id.clone(),
            date: row.date,
            team1: row.team1.clone(),
            team2: row.team2.clone(),
            points_team1: row.points_team1,
        };
        match partition_for(row.date, cutoff) {
            Partition::Train => train.push(values, row.target, meta),
            Partition::Test => test.push(values, row.target, meta),
        }
    }

    let scaler = Standardizer::fit(&train.features)?;
    train.features = scaler.transform(&train.features);
    test.features = scaler.transform(&test.features);

    Ok(DatasetSplit {
        cutoff,
        feature_names,
        scaler,
        train,
        test,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn cutoff_day_belongs_to_test() {
        let cutoff = d("2025-01-01");
        assert_eq!(partition_for(d("2024-12-31"), cutoff), Partition::Train);
        assert_eq!(partition_for(d("2025-01-01"), cutoff), Partition::Test);
        assert_eq!(partition_for(d("2025-01-02"), cutoff), Partition::Test);
    }

    #[test]
    fn standardizer_centers_and_scales() {
        let rows = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let s = Standardizer::fit(&rows).unwrap();
        assert_eq!(s.means, vec![2.0, 5.0]);
        assert_eq!(s.stds, vec![1.0, 1.0]);
        assert_eq!(s.transform_row(&[3.0, 7.0]), vec![1.0, 2.0]);

        let rows = vec![vec![0.0], vec![4.0]];
        let s = Standardizer::fit(&rows).unwrap();
        assert_eq!(s.stds, vec![2.0]);
    }

    #[test]
    fn standardizer_refuses_empty_train() {
        assert!(Standardizer::fit(&[]).is_err());
        assert!(Standardizer::fit(&[vec![1.0], vec![1.0, 2.0]]).is_err());
    }
}
