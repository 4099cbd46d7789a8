// Opponent differencing: pair each team-match row with the other side of the
// same match and emit signed own-minus-opponent columns.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate::Stat;
use crate::form::{FormFeatureRow, FormTable};

#[derive(Debug, thiserror::Error)]
pub enum OpponentError {
    #[error("diff column `{name}` refers to unknown source column `{source_column}`")]
    UnknownColumn { name: String, source_column: String },
}

/// One opponent-relative column: `name = own[source] - opponent[source]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSpec {
    #[serde(alias = "stat")]
    pub source: String,
    pub name: String,
}

/// A form row plus its opponent-relative columns, aligned to
/// `DiffTable::diff_columns`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpponentDiffRow {
    pub form: FormFeatureRow,
    pub diffs: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiffTable {
    pub form_columns: Vec<String>,
    pub diff_columns: Vec<String>,
    pub rows: Vec<OpponentDiffRow>,
}

impl DiffTable {
    pub fn value(&self, row: &OpponentDiffRow, name: &str) -> Option<f64> {
        if let Some(i) = self.diff_columns.iter().position(|c| c == name) {
            return row.diffs.get(i).copied();
        }
        if let Some(i) = self.form_columns.iter().position(|c| c == name) {
            return row.form.form.get(i).copied();
        }
        row.form.row.column(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffReport {
    pub paired_rows: usize,
    pub excluded_matches: usize,
}

/// Index of the partner row for every row whose match has exactly two rows
/// for two different teams.
fn pair_rows(table: &FormTable) -> (Vec<Option<usize>>, usize) {
    let mut by_match: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, row) in table.rows.iter().enumerate() {
        by_match.entry(row.row.match_id.as_str()).or_default().push(i);
    }

    let mut partner = vec![None; table.rows.len()];
    let mut excluded: Vec<&str> = Vec::new();
    for (match_id, members) in &by_match {
        let &[a, b] = members.as_slice() else {
            excluded.push(*match_id);
            continue;
        };
        if table.rows[a].row.team == table.rows[b].row.team {
            excluded.push(*match_id);
            continue;
        }
        partner[a] = Some(b);
        partner[b] = Some(a);
    }

    excluded.sort_unstable();
    for match_id in &excluded {
        warn!(
            "excluding match '{}' from opponent features: needs exactly two distinct teams",
            match_id
        );
    }
    (partner, excluded.len())
}

/// Every diff source must name a form column or a numeric team-match column.
fn resolve_sources(table: &FormTable, specs: &[DiffSpec]) -> Result<(), OpponentError> {
    for spec in specs {
        let known =
            table.column_index(&spec.source).is_some() || spec.source.parse::<Stat>().is_ok();
        if !known {
            return Err(OpponentError::UnknownColumn {
                name: spec.name.clone(),
                source_column: spec.source.clone(),
            });
        }
    }
    Ok(())
}

/// Build the opponent-relative table.
///
/// Both perspectives of a match are kept as separate rows, so for any stat
/// `A.x_diff == -B.x_diff`. Matches without exactly two distinct teams are
/// left out here but remain in the upstream tables.
pub fn compute_diffs(
    table: &FormTable,
    specs: &[DiffSpec],
) -> Result<(DiffTable, DiffReport), OpponentError> {
    resolve_sources(table, specs)?;
    let (partner, excluded_matches) = pair_rows(table);

    let mut rows = Vec::new();
    for (i, own) in table.rows.iter().enumerate() {
        let Some(j) = partner[i] else {
            continue;
        };
        let opp = &table.rows[j];
        let diffs = specs
            .iter()
            .map(|spec| {
                let a = table.value(own, &spec.source).unwrap_or(0.0);
                let b = table.value(opp, &spec.source).unwrap_or(0.0);
                a - b
            })
            .collect();
        rows.push(OpponentDiffRow {
            form: own.clone(),
            diffs,
        });
    }

    let report = DiffReport {
        paired_rows: rows.len(),
        excluded_matches,
    };
    info!(
        "opponent features for {} rows ({} matches excluded)",
        report.paired_rows, report.excluded_matches
    );

    Ok((
        DiffTable {
            form_columns: table.columns.clone(),
            diff_columns: specs.iter().map(|s| s.name.clone()).collect(),
            rows,
        },
        report,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
