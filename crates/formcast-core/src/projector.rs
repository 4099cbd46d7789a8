// Schema projection: reorder any stage table into the exact column list a
// downstream model expects.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate::Stat;
use crate::form::FormTable;
use crate::opponent::DiffTable;
use crate::table::Frame;

// ---------------------------------------------------------------------------
// Feature contracts
// ---------------------------------------------------------------------------

/// Which stage table a contract is projected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractSource {
    #[default]
    Diff,
    Form,
}

/// Ordered list of columns a trained model consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureContract {
    pub name: String,
    #[serde(default)]
    pub source: ContractSource,
    pub columns: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("failed to read contract {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid contract JSON in {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },

    #[error("contract {name} is invalid: {message}")]
    Invalid { name: String, message: String },
}

/// A model's published input list: a bare array, or an object carrying
/// `columns` (or scikit-learn style `feature_names`).
#[derive(Deserialize)]
#[serde(untagged)]
enum RawContract {
    List(Vec<String>),
    Object {
        #[serde(alias = "feature_names", alias = "feature_names_in_")]
        columns: Vec<String>,
        #[serde(default)]
        source: Option<ContractSource>,
    },
}

impl FeatureContract {
    /// Reject empty and duplicated column lists.
    pub fn validate(&self) -> Result<(), ContractError> {
        let invalid = |message: String| ContractError::Invalid {
            name: self.name.clone(),
            message,
        };
        if self.columns.is_empty() {
            return Err(invalid("column list is empty".into()));
        }
        for (i, column) in self.columns.iter().enumerate() {
            if column.trim().is_empty() {
                return Err(invalid(format!("column {} has an empty name", i + 1)));
            }
            if self.columns[..i].contains(column) {
                return Err(invalid(format!("column '{}' appears more than once", column)));
            }
        }
        Ok(())
    }
}

pub(crate) fn parse_contract_json(
    text: &str,
    name: &str,
    label: &str,
) -> Result<FeatureContract, ContractError> {
    let raw: RawContract = serde_json::from_str(text).map_err(|e| ContractError::Json {
        path: label.to_string(),
        source: e,
    })?;
    let (columns, source) = match raw {
        RawContract::List(columns) => (columns, None),
        RawContract::Object { columns, source } => (columns, source),
    };
    let contract = FeatureContract {
        name: name.to_string(),
        source: source.unwrap_or_default(),
        columns,
    };
    contract.validate()?;
    Ok(contract)
}

/// Load a contract from the JSON file a model was exported with.
pub fn load_contract_json(path: &Path, name: &str) -> Result<FeatureContract, ContractError> {
    let text = fs::read_to_string(path).map_err(|e| ContractError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_contract_json(&text, name, &path.display().to_string())
}

// ---------------------------------------------------------------------------
// Projection sources
// ---------------------------------------------------------------------------

/// A table whose rows can be addressed by column name.
pub trait FeatureSource {
    fn row_count(&self) -> usize;

    /// Whether the table has `name` at all, independent of any row.
    fn has_column(&self, name: &str) -> bool;

    /// (match_id, team) of row `i`.
    fn key(&self, i: usize) -> (&str, &str);

    /// Training label of row `i`, when the match has been played.
    fn label(&self, i: usize) -> Option<&str>;

    fn value(&self, i: usize, name: &str) -> Option<f64>;
}

impl FeatureSource for FormTable {
    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some() || name.parse::<Stat>().is_ok()
    }

    fn key(&self, i: usize) -> (&str, &str) {
        let row = &self.rows[i].row;
        (&row.match_id, &row.team)
    }

    fn label(&self, i: usize) -> Option<&str> {
        self.rows[i].row.result.map(|r| r.label())
    }

    fn value(&self, i: usize, name: &str) -> Option<f64> {
        FormTable::value(self, &self.rows[i], name)
    }
}

impl FeatureSource for DiffTable {
    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn has_column(&self, name: &str) -> bool {
        self.diff_columns.iter().any(|c| c == name)
            || self.form_columns.iter().any(|c| c == name)
            || name.parse::<Stat>().is_ok()
    }

    fn key(&self, i: usize) -> (&str, &str) {
        let row = &self.rows[i].form.row;
        (&row.match_id, &row.team)
    }

    fn label(&self, i: usize) -> Option<&str> {
        self.rows[i].form.row.result.map(|r| r.label())
    }

    fn value(&self, i: usize, name: &str) -> Option<f64> {
        DiffTable::value(self, &self.rows[i], name)
    }
}

impl FeatureSource for Frame {
    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    fn key(&self, i: usize) -> (&str, &str) {
        (
            self.cell(i, "match_id").unwrap_or_default(),
            self.cell(i, "team").unwrap_or_default(),
        )
    }

    fn label(&self, i: usize) -> Option<&str> {
        self.cell(i, "result").filter(|r| !r.trim().is_empty())
    }

    fn value(&self, i: usize, name: &str) -> Option<f64> {
        self.number(i, name)
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Numeric matrix in contract column order, one row per source row.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub columns: Vec<String>,
    pub keys: Vec<(String, String)>,
    pub labels: Vec<Option<String>>,
    pub values: Vec<Vec<f64>>,
    /// Contract columns the source did not have; zero-filled.
    pub missing: Vec<String>,
}

/// Project `source` onto `contract`. Missing columns are zero-filled with one
/// warning each; this never fails.
pub fn project<S: FeatureSource + ?Sized>(source: &S, contract: &FeatureContract) -> FeatureMatrix {
    let n = source.row_count();
    let missing: Vec<String> = contract
        .columns
        .iter()
        .filter(|c| !source.has_column(c))
        .cloned()
        .collect();
    for column in &missing {
        warn!(
            "contract '{}': column '{}' not produced by the pipeline, filled with 0.0 for {} rows",
            contract.name, column, n
        );
    }

    let mut keys = Vec::with_capacity(n);
    let mut labels = Vec::with_capacity(n);
    let mut values = Vec::with_capacity(n);
    for i in 0..n {
        let (match_id, team) = source.key(i);
        keys.push((match_id.to_string(), team.to_string()));
        labels.push(source.label(i).map(str::to_string));
        values.push(
            contract
                .columns
                .iter()
                .map(|c| source.value(i, c).unwrap_or(0.0))
                .collect(),
        );
    }

    info!(
        "projected {} rows onto contract '{}' ({} columns, {} missing)",
        n,
        contract.name,
        contract.columns.len(),
        missing.len()
    );
    FeatureMatrix {
        columns: contract.columns.clone(),
        keys,
        labels,
        values,
        missing,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{MatchResult, TeamMatchRow};
    use crate::form::FormFeatureRow;
    use crate::table::read_frame_from_reader;
    use chrono::NaiveDate;

    fn form_table() -> FormTable {
        let row = TeamMatchRow {
            match_id: "m1".into(),
            season: "2023".into(),
            date: NaiveDate::from_ymd_opt(2023, 9, 1).unwrap(),
            team: "ubc".into(),
            opponent: "uvic".into(),
            is_home: 1,
            result: Some(MatchResult::Win),
            goals: 2.0,
            shots: 12.0,
            sog: 6.0,
            assists: 1.0,
            player_count: 11,
            avg_player_year: 2.5,
            goals_mean: 0.0,
            shots_mean: 0.0,
            sog_mean: 0.0,
            assists_mean: 0.0,
            goals_max: 1.0,
            gk: 0.1,
            def: 0.3,
            mid: 0.4,
            fwd: 0.2,
            unk: 0.0,
        };
        FormTable {
            columns: vec!["shots_rolling3".into()],
            rows: vec![FormFeatureRow {
                row,
                form: vec![10.5],
            }],
        }
    }

    fn contract(columns: &[&str]) -> FeatureContract {
        FeatureContract {
            name: "test".into(),
            source: ContractSource::Form,
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn output_follows_contract_order() {
        let m = project(&form_table(), &contract(&["is_home", "shots_rolling3", "for", "shots"]));
        assert_eq!(m.columns, vec!["is_home", "shots_rolling3", "for", "shots"]);
        assert_eq!(m.values[0], vec![1.0, 10.5, 0.2, 12.0]);
        assert_eq!(m.keys[0], ("m1".to_string(), "ubc".to_string()));
        assert_eq!(m.labels[0].as_deref(), Some("win"));
        assert!(m.missing.is_empty());
    }

    #[test]
    fn missing_columns_are_zero_filled() {
        let m = project(&form_table(), &contract(&["xg_rolling3", "shots"]));
        assert_eq!(m.values[0], vec![0.0, 12.0]);
        assert_eq!(m.missing, vec!["xg_rolling3"]);
    }

    #[test]
    fn frame_projection_matches_typed_projection() {
        let frame = read_frame_from_reader(
            "match_id,team,result,shots,shots_rolling3\nm1,ubc,win,12,10.5\nm2,ubc,,3,4\n".as_bytes(),
        )
        .unwrap();
        let m = project(&frame, &contract(&["shots_rolling3", "shots", "nope"]));
        assert_eq!(m.values, vec![vec![10.5, 12.0, 0.0], vec![4.0, 3.0, 0.0]]);
        assert_eq!(m.labels, vec![Some("win".to_string()), None]);
        assert_eq!(m.missing, vec!["nope"]);
    }

    #[test]
    fn typed_and_frame_sources_agree_on_column_case() {
        let frame =
            read_frame_from_reader("match_id,team,result,shots\nm1,ubc,win,12\n".as_bytes())
                .unwrap();
        let c = contract(&["Shots", "shots"]);
        let typed = project(&form_table(), &c);
        let generic = project(&frame, &c);
        assert_eq!(typed.values, vec![vec![0.0, 12.0]]);
        assert_eq!(typed.values, generic.values);
        assert_eq!(typed.missing, generic.missing);
    }

    #[test]
    fn contract_json_accepts_array_and_object_forms() {
        let a = parse_contract_json(r#"["shots", "shot_diff"]"#, "a", "mem").unwrap();
        assert_eq!(a.columns, vec!["shots", "shot_diff"]);
        assert_eq!(a.source, ContractSource::Diff);

        let b = parse_contract_json(
            r#"{"feature_names": ["shots_rolling3"], "source": "form"}"#,
            "b",
            "mem",
        )
        .unwrap();
        assert_eq!(b.columns, vec!["shots_rolling3"]);
        assert_eq!(b.source, ContractSource::Form);

        let c = parse_contract_json(r#"{"columns": ["x"]}"#, "c", "mem").unwrap();
        assert_eq!(c.columns, vec!["x"]);
    }

    #[test]
    fn contract_json_rejects_duplicates_and_garbage() {
        let dup = parse_contract_json(r#"["x", "x"]"#, "d", "mem").unwrap_err();
        assert!(matches!(dup, ContractError::Invalid { .. }));
        let empty = parse_contract_json("[]", "e", "mem").unwrap_err();
        assert!(matches!(empty, ContractError::Invalid { .. }));
        let bad = parse_contract_json("{\"nope\": 1}", "f", "mem").unwrap_err();
        assert!(matches!(bad, ContractError::Json { .. }));
    }
}
