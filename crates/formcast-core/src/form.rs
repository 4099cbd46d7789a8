// Form engine: leakage-free rolling statistics per (season, team).
//
// A row dated T only ever sees rows of the same team and season dated
// strictly before T. Where no such row exists the value is imputed from
// `FallbackMeans`, a snapshot built once per run.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregate::{Stat, TeamMatchRow};

// ---------------------------------------------------------------------------
// Form columns
// ---------------------------------------------------------------------------

/// What a rolling window averages over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormSource {
    Stat(Stat),
    /// Win = 1, draw = 0.5, loss = 0. Rows without a result are skipped.
    Result,
}

impl FormSource {
    pub fn value(self, row: &TeamMatchRow) -> Option<f64> {
        match self {
            FormSource::Stat(stat) => Some(row.stat(stat)),
            FormSource::Result => row.result.map(|r| r.score()),
        }
    }

    fn base_name(self) -> &'static str {
        match self {
            FormSource::Stat(stat) => stat.column(),
            FormSource::Result => "win_rate",
        }
    }
}

impl fmt::Display for FormSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.base_name())
    }
}

/// One rolling column: its source and how many prior matches it spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormSpec {
    pub source: FormSource,
    pub window: usize,
}

impl FormSpec {
    /// e.g. `shots_rolling3`, `win_rate_rolling5`.
    pub fn column(&self) -> String {
        format!("{}_rolling{}", self.source.base_name(), self.window)
    }

    /// Name of the opponent-relative variant, e.g. `shots_form_diff`.
    pub fn diff_column(&self) -> String {
        match self.source {
            FormSource::Result => "win_rate_diff".to_string(),
            FormSource::Stat(stat) => format!("{}_form_diff", stat.column()),
        }
    }
}

// ---------------------------------------------------------------------------
// Fallback snapshot
// ---------------------------------------------------------------------------

/// Per-team running sums, ordered by date, for one team across all seasons.
#[derive(Debug, Clone, Default)]
struct TeamHistory {
    dates: Vec<NaiveDate>,
    /// `prefix[s][k]` = (sum, count) of source `s` over the first `k` dates.
    prefix: Vec<Vec<(f64, usize)>>,
}

/// Immutable imputation snapshot: each team's own history and the
/// dataset-wide mean of every form source.
#[derive(Debug, Clone)]
pub struct FallbackMeans {
    sources: Vec<FormSource>,
    teams: HashMap<String, TeamHistory>,
    global: Vec<Option<f64>>,
}

impl FallbackMeans {
    pub fn build(rows: &[TeamMatchRow], specs: &[FormSpec]) -> Self {
        let sources: Vec<FormSource> = specs.iter().map(|s| s.source).collect();

        let mut by_team: BTreeMap<&str, Vec<&TeamMatchRow>> = BTreeMap::new();
        for row in rows {
            by_team.entry(row.team.as_str()).or_default().push(row);
        }

        let mut teams = HashMap::with_capacity(by_team.len());
        for (team, mut team_rows) in by_team {
            team_rows.sort_by_key(|r| r.date);
            let mut prefix = vec![vec![(0.0, 0usize)]; sources.len()];
            for row in &team_rows {
                for (s, source) in sources.iter().enumerate() {
                    let (sum, count) = *prefix[s].last().unwrap_or(&(0.0, 0));
                    let next = match source.value(row) {
                        Some(v) => (sum + v, count + 1),
                        None => (sum, count),
                    };
                    prefix[s].push(next);
                }
            }
            teams.insert(
                team.to_string(),
                TeamHistory {
                    dates: team_rows.iter().map(|r| r.date).collect(),
                    prefix,
                },
            );
        }

        let global = sources
            .iter()
            .map(|source| {
                let values: Vec<f64> = rows.iter().filter_map(|r| source.value(r)).collect();
                if values.is_empty() {
                    None
                } else {
                    Some(values.iter().sum::<f64>() / values.len() as f64)
                }
            })
            .collect();

        FallbackMeans {
            sources,
            teams,
            global,
        }
    }

    fn source_index(&self, source: FormSource) -> Option<usize> {
        self.sources.iter().position(|s| *s == source)
    }

    /// Mean of `source` over the team's rows dated strictly before `date`.
    pub fn team_mean_before(&self, team: &str, source: FormSource, date: NaiveDate) -> Option<f64> {
        let s = self.source_index(source)?;
        let history = self.teams.get(team)?;
        let k = history.dates.partition_point(|d| *d < date);
        let (sum, count) = history.prefix[s][k];
        (count > 0).then(|| sum / count as f64)
    }

    /// Dataset-wide mean of `source`.
    pub fn global_mean(&self, source: FormSource) -> Option<f64> {
        self.source_index(source).and_then(|s| self.global[s])
    }
}

// ---------------------------------------------------------------------------
// Form table
// ---------------------------------------------------------------------------

/// A team-match row with its rolling values, aligned to `FormTable::columns`.
#[derive(Debug, Clone, PartialEq)]
pub struct FormFeatureRow {
    pub row: TeamMatchRow,
    pub form: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormTable {
    pub columns: Vec<String>,
    pub rows: Vec<FormFeatureRow>,
}

impl FormTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Numeric lookup across both the base row and the form columns.
    pub fn value(&self, row: &FormFeatureRow, name: &str) -> Option<f64> {
        match self.column_index(name) {
            Some(i) => row.form.get(i).copied(),
            None => row.row.column(name),
        }
    }
}

/// How the form values were obtained, for the run summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormReport {
    pub rows: usize,
    pub from_window: usize,
    pub from_team_history: usize,
    pub from_global_mean: usize,
    pub zero_filled: usize,
}

// ---------------------------------------------------------------------------
// Rolling computation
// ---------------------------------------------------------------------------

fn window_mean(prior: &[usize], rows: &[TeamMatchRow], spec: &FormSpec) -> Option<f64> {
    let start = prior.len().saturating_sub(spec.window);
    let values: Vec<f64> = prior[start..]
        .iter()
        .filter_map(|&j| spec.source.value(&rows[j]))
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Attach rolling form columns to every team-match row.
///
/// Output rows keep the input order. Within a (season, team) partition rows
/// are ordered by date, ties kept in input order.
pub fn compute_form(
    rows: &[TeamMatchRow],
    specs: &[FormSpec],
    fallback: &FallbackMeans,
) -> (FormTable, FormReport) {
    let mut partitions: BTreeMap<(&str, &str), Vec<usize>> = BTreeMap::new();
    for (i, row) in rows.iter().enumerate() {
        partitions
            .entry((row.season.as_str(), row.team.as_str()))
            .or_default()
            .push(i);
    }

    let mut rolled: Vec<Vec<Option<f64>>> = vec![Vec::new(); rows.len()];
    for ((season, team), mut idx) in partitions {
        idx.sort_by_key(|&i| rows[i].date);
        debug!("{} {}: {} matches", season, team, idx.len());
        for (pos, &i) in idx.iter().enumerate() {
            let date = rows[i].date;
            let cutoff = idx[..pos].partition_point(|&j| rows[j].date < date);
            let prior = &idx[..cutoff];
            rolled[i] = specs.iter().map(|spec| window_mean(prior, rows, spec)).collect();
        }
    }

    let mut report = FormReport {
        rows: rows.len(),
        ..FormReport::default()
    };
    let mut out = Vec::with_capacity(rows.len());
    for (row, values) in rows.iter().zip(rolled) {
        let form = specs
            .iter()
            .zip(values)
            .map(|(spec, value)| {
                if let Some(v) = value {
                    report.from_window += 1;
                    return v;
                }
                if let Some(v) = fallback.team_mean_before(&row.team, spec.source, row.date) {
                    report.from_team_history += 1;
                    return v;
                }
                if let Some(v) = fallback.global_mean(spec.source) {
                    report.from_global_mean += 1;
                    return v;
                }
                report.zero_filled += 1;
                0.0
            })
            .collect();
        out.push(FormFeatureRow {
            row: row.clone(),
            form,
        });
    }

    if report.zero_filled > 0 {
        warn!(
            "{} form values had no history anywhere and were set to 0.0",
            report.zero_filled
        );
    }
    info!(
        "form features for {} rows: {} from window, {} from team history, {} from global mean",
        report.rows, report.from_window, report.from_team_history, report.from_global_mean
    );

    (
        FormTable {
            columns: specs.iter().map(FormSpec::column).collect(),
            rows: out,
        },
        report,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::MatchResult;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 9, d).unwrap()
    }

    fn row(season: &str, team: &str, match_id: &str, date: NaiveDate, shots: f64, result: Option<MatchResult>) -> TeamMatchRow {
        TeamMatchRow {
            match_id: match_id.into(),
            season: season.into(),
            date,
            team: team.into(),
            opponent: "other".into(),
            is_home: 1,
            result,
            goals: 0.0,
            shots,
            sog: 0.0,
            assists: 0.0,
            player_count: 11,
            avg_player_year: 2.0,
            goals_mean: 0.0,
            shots_mean: 0.0,
            sog_mean: 0.0,
            assists_mean: 0.0,
            goals_max: 0.0,
            gk: 0.0,
            def: 0.0,
            mid: 0.0,
            fwd: 0.0,
            unk: 1.0,
        }
    }

    fn specs() -> Vec<FormSpec> {
        vec![
            FormSpec {
                source: FormSource::Stat(Stat::Shots),
                window: 3,
            },
            FormSpec {
                source: FormSource::Result,
                window: 5,
            },
        ]
    }

    fn run(rows: &[TeamMatchRow]) -> FormTable {
        let specs = specs();
        let fallback = FallbackMeans::build(rows, &specs);
        compute_form(rows, &specs, &fallback).0
    }

    #[test]
    fn column_names() {
        let s = specs();
        assert_eq!(s[0].column(), "shots_rolling3");
        assert_eq!(s[1].column(), "win_rate_rolling5");
        assert_eq!(s[0].diff_column(), "shots_form_diff");
        assert_eq!(s[1].diff_column(), "win_rate_diff");
    }

    #[test]
    fn fourth_match_averages_three_prior_matches() {
        let rows = vec![
            row("2023", "ubc", "m1", day(1), 10.0, Some(MatchResult::Win)),
            row("2023", "ubc", "m2", day(8), 14.0, Some(MatchResult::Loss)),
            row("2023", "ubc", "m3", day(15), 8.0, Some(MatchResult::Draw)),
            row("2023", "ubc", "m4", day(22), 99.0, None),
        ];
        let table = run(&rows);
        let shots = table.column_index("shots_rolling3").unwrap();
        let win = table.column_index("win_rate_rolling5").unwrap();
        assert!((table.rows[3].form[shots] - 32.0 / 3.0).abs() < 1e-9);
        assert!((table.rows[3].form[win] - 0.5).abs() < 1e-9);
        assert!((table.rows[1].form[shots] - 10.0).abs() < 1e-9);
        assert!((table.rows[2].form[shots] - 12.0).abs() < 1e-9);
    }

    #[test]
    fn window_slides_past_three() {
        let rows: Vec<TeamMatchRow> = [2.0, 4.0, 6.0, 8.0, 100.0]
            .iter()
            .enumerate()
            .map(|(i, &s)| row("2023", "ubc", &format!("m{i}"), day(1 + i as u32), s, None))
            .collect();
        let table = run(&rows);
        assert!((table.rows[4].form[0] - 6.0).abs() < 1e-9);
    }

    #[test]
    fn input_order_does_not_change_values() {
        let rows = vec![
            row("2023", "ubc", "m3", day(15), 8.0, None),
            row("2023", "ubc", "m1", day(1), 10.0, None),
            row("2023", "ubc", "m2", day(8), 14.0, None),
        ];
        let table = run(&rows);
        assert_eq!(table.rows[0].row.match_id, "m3");
        assert!((table.rows[0].form[0] - 12.0).abs() < 1e-9);
        assert!((table.rows[2].form[0] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn same_day_rows_do_not_see_each_other() {
        let rows = vec![
            row("2023", "ubc", "m1", day(1), 10.0, None),
            row("2023", "ubc", "m2", day(8), 20.0, None),
            row("2023", "ubc", "m3", day(8), 40.0, None),
        ];
        let table = run(&rows);
        assert!((table.rows[1].form[0] - 10.0).abs() < 1e-9);
        assert!((table.rows[2].form[0] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn future_rows_do_not_leak() {
        let base = vec![
            row("2023", "ubc", "m1", day(1), 10.0, Some(MatchResult::Win)),
            row("2023", "ubc", "m2", day(8), 14.0, Some(MatchResult::Win)),
            row("2023", "ubc", "m3", day(15), 8.0, Some(MatchResult::Loss)),
        ];
        let mut perturbed = base.clone();
        perturbed[2].shots = 500.0;
        perturbed[2].result = Some(MatchResult::Draw);
        perturbed[1].shots = 0.0;

        let a = run(&base);
        let b = run(&perturbed);
        // Row m2 depends only on m1.
        assert_eq!(a.rows[1].form, b.rows[1].form);
    }

    #[test]
    fn season_opener_uses_prior_season_team_mean() {
        let rows = vec![
            row("2022", "ubc", "a1", NaiveDate::from_ymd_opt(2022, 9, 1).unwrap(), 6.0, None),
            row("2022", "ubc", "a2", NaiveDate::from_ymd_opt(2022, 9, 8).unwrap(), 10.0, None),
            row("2023", "ubc", "b1", day(1), 50.0, None),
        ];
        let table = run(&rows);
        assert!((table.rows[2].form[0] - 8.0).abs() < 1e-9);
    }

    #[test]
    fn debut_team_gets_global_mean() {
        let rows = vec![
            row("2023", "ubc", "m1", day(1), 10.0, Some(MatchResult::Win)),
            row("2023", "ubc", "m2", day(8), 20.0, Some(MatchResult::Loss)),
            row("2023", "newco", "m3", day(8), 30.0, Some(MatchResult::Win)),
        ];
        let (table, report) = {
            let specs = specs();
            let fallback = FallbackMeans::build(&rows, &specs);
            compute_form(&rows, &specs, &fallback)
        };
        assert!((table.rows[2].form[0] - 20.0).abs() < 1e-9);
        assert!((table.rows[2].form[1] - 2.0 / 3.0).abs() < 1e-9);
        assert!(report.from_global_mean >= 2);
    }

    #[test]
    fn no_values_anywhere_fills_zero() {
        let rows = vec![row("2023", "ubc", "m1", day(1), 10.0, None)];
        let (_, report) = {
            let specs = specs();
            let fallback = FallbackMeans::build(&rows, &specs);
            compute_form(&rows, &specs, &fallback)
        };
        assert_eq!(report.zero_filled, 1);
    }

    #[test]
    fn unplayed_results_are_skipped_in_win_rate() {
        let rows = vec![
            row("2023", "ubc", "m1", day(1), 0.0, Some(MatchResult::Win)),
            row("2023", "ubc", "m2", day(8), 0.0, None),
            row("2023", "ubc", "m3", day(15), 0.0, None),
        ];
        let table = run(&rows);
        assert!((table.rows[2].form[1] - 1.0).abs() < 1e-9);
    }
}
