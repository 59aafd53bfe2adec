use std::collections::BTreeMap;

use anyhow::{Result, anyhow};

use crate::records::{MatchRecord, Stat};

pub const DEFAULT_WINDOWS: [usize; 5] = [1, 3, 5, 7, 10];
pub const DEFAULT_MODEL_WINDOWS: [usize; 3] = [3, 5, 10];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RollingColumn {
    pub stat: Stat,
    pub window: usize,
}

impl RollingColumn {
    pub fn name(&self) -> String {
        format!("{}_roll_{}", self.stat.name(), self.window)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollingConfig {
    stats: Vec<Stat>,
    windows: Vec<usize>,
}

impl Default for RollingConfig {
    fn default() -> Self {
        Self {
            stats: Stat::ALL.to_vec(),
            windows: DEFAULT_WINDOWS.to_vec(),
        }
    }
}

impl RollingConfig {
    /// Windows are deduplicated and sorted; stats keep their given order.
    pub fn new(stats: Vec<Stat>, windows: Vec<usize>) -> Result<Self> {
        if stats.is_empty() {
            return Err(anyhow!("rolling config needs at least one statistic"));
        }
        let mut windows = windows;
        windows.sort_unstable();
        windows.dedup();
        if windows.is_empty() {
            return Err(anyhow!("rolling config needs at least one window"));
        }
        if windows[0] == 0 {
            return Err(anyhow!("rolling window sizes must be positive"));
        }
        let mut seen = Vec::with_capacity(stats.len());
        for stat in stats {
            if !seen.contains(&stat) {
                seen.push(stat);
            }
        }
        Ok(Self {
            stats: seen,
            windows,
        })
    }

    pub fn stats(&self) -> &[Stat] {
        &self.stats
    }

    pub fn windows(&self) -> &[usize] {
        &self.windows
    }

    /// Column order is stat-major: every window of the first stat, then the next stat.
    pub fn columns(&self) -> Vec<RollingColumn> {
        self.stats
            .iter()
            .flat_map(|stat| {
                self.windows.iter().map(move |w| RollingColumn {
                    stat: *stat,
                    window: *w,
                })
            })
            .collect()
    }

    pub fn column_index(&self, stat: Stat, window: usize) -> Option<usize> {
        let s = self.stats.iter().position(|x| *x == stat)?;
        let w = self.windows.iter().position(|x| *x == window)?;
        Some(s * self.windows.len() + w)
    }
}

/// One averaged value per configured (stat, window), aligned with
/// [`RollingConfig::columns`]. `None` means not enough clean history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollingFeatureSet {
    pub values: Vec<Option<f64>>,
}

impl RollingFeatureSet {
    pub fn get(&self, cfg: &RollingConfig, stat: Stat, window: usize) -> Option<f64> {
        cfg.column_index(stat, window)
            .and_then(|idx| self.values.get(idx).copied().flatten())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RollingRecord {
    pub record: MatchRecord,
    pub rolling: RollingFeatureSet,
}

/// Attaches backward-looking averages to every record. Output order matches input
/// order. For a team's k-th match (chronological) a window of `w` covers matches
/// k-w..k-1 only, so nothing from the match itself or later leaks in.
pub fn apply_rolling_averages(records: Vec<MatchRecord>, cfg: &RollingConfig) -> Vec<RollingRecord> {
    let columns = cfg.columns();
    let mut features: Vec<Vec<Option<f64>>> = vec![vec![None; columns.len()]; records.len()];

    for indices in team_timelines(&records).into_values() {
        for (s_idx, stat) in cfg.stats.iter().enumerate() {
            let series: Vec<Option<f64>> = indices.iter().map(|&i| records[i].stat(*stat)).collect();
            for (w_idx, window) in cfg.windows.iter().enumerate() {
                let col = s_idx * cfg.windows.len() + w_idx;
                for (pos, mean) in closed_left_means(&series, *window).into_iter().enumerate() {
                    features[indices[pos]][col] = mean;
                }
            }
        }
    }

    records
        .into_iter()
        .zip(features)
        .map(|(record, values)| RollingRecord {
            record,
            rolling: RollingFeatureSet { values },
        })
        .collect()
}

/// Record indices grouped by team, each group in chronological order.
/// Same-day entries are ordered by opponent, then by source row.
pub fn team_timelines(records: &[MatchRecord]) -> BTreeMap<&str, Vec<usize>> {
    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (idx, rec) in records.iter().enumerate() {
        groups.entry(rec.team.as_str()).or_default().push(idx);
    }
    for indices in groups.values_mut() {
        indices.sort_by(|&a, &b| {
            let (ra, rb) = (&records[a], &records[b]);
            ra.date
                .cmp(&rb.date)
                .then_with(|| ra.opponent.cmp(&rb.opponent))
                .then(ra.row.cmp(&rb.row))
        });
    }
    groups
}

/// Mean of the `window` values strictly before each position. Undefined for the
/// first `window` positions and whenever the window holds a missing value.
pub fn closed_left_means(series: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; series.len()];
    if window == 0 {
        return out;
    }

    let mut sum = 0.0_f64;
    let mut missing = 0usize;
    for k in 0..series.len() {
        if k >= window {
            if missing == 0 {
                out[k] = Some(sum / window as f64);
            }
            match series[k - window] {
                Some(v) => sum -= v,
                None => missing -= 1,
            }
        }
        match series[k] {
            Some(v) => sum += v,
            None => missing += 1,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::CategoryCodes;
    use crate::records::normalize_rows;
    use crate::records::tests::raw_row;

    fn approx(a: Option<f64>, b: f64) -> bool {
        a.is_some_and(|v| (v - b).abs() < 1e-9)
    }

    #[test]
    fn window_excludes_current_match() {
        let series = vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(5.0)];
        let m = closed_left_means(&series, 3);
        assert_eq!(m[0], None);
        assert_eq!(m[1], None);
        assert_eq!(m[2], None);
        assert!(approx(m[3], 2.0));
        assert!(approx(m[4], 3.0));

        let m1 = closed_left_means(&series, 1);
        assert_eq!(m1[0], None);
        assert!(approx(m1[1], 1.0));
        assert!(approx(m1[4], 4.0));
    }

    #[test]
    fn missing_value_poisons_only_windows_that_cover_it() {
        let series = vec![Some(1.0), None, Some(3.0), Some(5.0), Some(7.0)];
        let m = closed_left_means(&series, 2);
        assert_eq!(m[2], None);
        assert_eq!(m[3], None);
        assert!(approx(m[4], 4.0));
    }

    #[test]
    fn later_matches_never_change_earlier_features() {
        let base = vec![Some(1.0), Some(4.0), Some(2.0), Some(8.0), Some(3.0), Some(6.0)];
        let before = closed_left_means(&base, 2);
        for cut in 0..base.len() {
            let mut altered = base.clone();
            for v in altered.iter_mut().skip(cut) {
                *v = Some(1000.0);
            }
            let after = closed_left_means(&altered, 2);
            assert_eq!(before[..=cut], after[..=cut], "position {cut} saw the future");
        }
    }

    #[test]
    fn groups_by_team_and_sorts_by_date() {
        let mut codes = CategoryCodes::default();
        let mut rows = vec![
            raw_row("Arsenal", "Chelsea", "2024-03-10", "W"),
            raw_row("Arsenal", "Everton", "2024-03-01", "W"),
            raw_row("Chelsea", "Arsenal", "2024-03-10", "L"),
            raw_row("Arsenal", "Fulham", "2024-03-20", "D"),
        ];
        rows[0].gf = "3".to_string();
        rows[1].gf = "1".to_string();
        rows[3].gf = "0".to_string();
        let records = normalize_rows(&rows, &mut codes).unwrap();
        let cfg = RollingConfig::new(vec![Stat::GoalsFor], vec![1, 2]).unwrap();
        let out = apply_rolling_averages(records, &cfg);

        // Input order is preserved.
        assert_eq!(out[1].record.opponent, "Everton");
        assert_eq!(out[1].rolling.values, vec![None, None]);
        assert!(approx(out[0].rolling.get(&cfg, Stat::GoalsFor, 1), 1.0));
        assert_eq!(out[0].rolling.get(&cfg, Stat::GoalsFor, 2), None);
        assert!(approx(out[3].rolling.get(&cfg, Stat::GoalsFor, 1), 3.0));
        assert!(approx(out[3].rolling.get(&cfg, Stat::GoalsFor, 2), 2.0));
        // Chelsea's history is independent of Arsenal's.
        assert_eq!(out[2].rolling.values, vec![None, None]);
    }

    #[test]
    fn config_normalizes_windows_and_names_columns() {
        let cfg = RollingConfig::new(vec![Stat::Xg, Stat::ShotEfficiency], vec![10, 3, 3]).unwrap();
        assert_eq!(cfg.windows(), &[3, 10]);
        let names: Vec<String> = cfg.columns().iter().map(|c| c.name()).collect();
        assert_eq!(
            names,
            vec!["xg_roll_3", "xg_roll_10", "shot_ef_roll_3", "shot_ef_roll_10"]
        );
        assert_eq!(cfg.column_index(Stat::ShotEfficiency, 10), Some(3));
        assert!(RollingConfig::new(vec![Stat::Xg], vec![0, 3]).is_err());
        assert!(RollingConfig::new(vec![], vec![3]).is_err());
    }
}
