// Stage-boundary tables: CSV writers and readers for every persisted artifact,
// plus a generic named-column frame for reading any of them back.
//
// Floats are written with `Display`, the shortest text that round-trips, so
// identical inputs always produce identical bytes.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use csv::StringRecord;

use crate::aggregate::{TeamMatchRow, TEAM_MATCH_COLUMNS};
use crate::form::{FormFeatureRow, FormTable};
use crate::normalize::CanonicalPlayerRecord;
use crate::opponent::DiffTable;
use crate::projector::FeatureMatrix;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("unexpected layout in {path}: {message}")]
    Layout { path: String, message: String },
}

// ---------------------------------------------------------------------------
// Generic frame
// ---------------------------------------------------------------------------

/// Any stage CSV as named string columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub columns: Vec<String>,
    pub rows: Vec<StringRecord>,
}

impl Frame {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn cell(&self, row: usize, name: &str) -> Option<&str> {
        let i = self.column_index(name)?;
        self.rows.get(row)?.get(i)
    }

    /// Numeric value of a cell. A present column with a blank or
    /// non-numeric cell reads as 0.0.
    pub fn number(&self, row: usize, name: &str) -> Option<f64> {
        self.cell(row, name).map(|raw| {
            raw.trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .unwrap_or(0.0)
        })
    }
}

pub(crate) fn read_frame_from_reader<R: Read>(rdr: R) -> Result<Frame, csv::Error> {
    let mut reader = csv::Reader::from_reader(rdr);
    let columns = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let rows = reader.records().collect::<Result<Vec<_>, _>>()?;
    Ok(Frame { columns, rows })
}

pub fn read_frame(path: &Path) -> Result<Frame, TableError> {
    read_frame_from_reader(open(path)?).map_err(|e| csv_error(path, e))
}

// ---------------------------------------------------------------------------
// Record layout
// ---------------------------------------------------------------------------

fn num(v: f64) -> String {
    v.to_string()
}

fn team_match_record(row: &TeamMatchRow) -> Vec<String> {
    vec![
        row.match_id.clone(),
        row.season.clone(),
        row.date.format("%Y-%m-%d").to_string(),
        row.team.clone(),
        row.opponent.clone(),
        row.is_home.to_string(),
        row.result.map(|r| r.label().to_string()).unwrap_or_default(),
        num(row.goals),
        num(row.shots),
        num(row.sog),
        num(row.assists),
        row.player_count.to_string(),
        num(row.avg_player_year),
        num(row.goals_mean),
        num(row.shots_mean),
        num(row.sog_mean),
        num(row.assists_mean),
        num(row.goals_max),
        num(row.gk),
        num(row.def),
        num(row.mid),
        num(row.fwd),
        num(row.unk),
    ]
}

fn form_record(row: &FormFeatureRow) -> Vec<String> {
    let mut record = team_match_record(&row.row);
    record.extend(row.form.iter().copied().map(num));
    record
}

// ---------------------------------------------------------------------------
// Writers
// ---------------------------------------------------------------------------

pub(crate) fn write_players_to<W: Write>(
    wtr: &mut csv::Writer<W>,
    rows: &[CanonicalPlayerRecord],
) -> Result<(), csv::Error> {
    for row in rows {
        wtr.serialize(row)?;
    }
    Ok(())
}

pub(crate) fn write_team_matches_to<W: Write>(
    wtr: &mut csv::Writer<W>,
    rows: &[TeamMatchRow],
) -> Result<(), csv::Error> {
    wtr.write_record(TEAM_MATCH_COLUMNS)?;
    for row in rows {
        wtr.write_record(team_match_record(row))?;
    }
    Ok(())
}

pub(crate) fn write_form_table_to<W: Write>(
    wtr: &mut csv::Writer<W>,
    table: &FormTable,
) -> Result<(), csv::Error> {
    let header = TEAM_MATCH_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(table.columns.iter().cloned());
    wtr.write_record(header)?;
    for row in &table.rows {
        wtr.write_record(form_record(row))?;
    }
    Ok(())
}

pub(crate) fn write_diff_table_to<W: Write>(
    wtr: &mut csv::Writer<W>,
    table: &DiffTable,
) -> Result<(), csv::Error> {
    let header = TEAM_MATCH_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(table.form_columns.iter().cloned())
        .chain(table.diff_columns.iter().cloned());
    wtr.write_record(header)?;
    for row in &table.rows {
        let mut record = form_record(&row.form);
        record.extend(row.diffs.iter().copied().map(num));
        wtr.write_record(record)?;
    }
    Ok(())
}

pub(crate) fn write_feature_matrix_to<W: Write>(
    wtr: &mut csv::Writer<W>,
    matrix: &FeatureMatrix,
    with_label: bool,
) -> Result<(), csv::Error> {
    let mut header = vec!["match_id".to_string(), "team".to_string()];
    if with_label {
        header.push("result".to_string());
    }
    header.extend(matrix.columns.iter().cloned());
    wtr.write_record(&header)?;

    for (i, (match_id, team)) in matrix.keys.iter().enumerate() {
        let mut record = vec![match_id.clone(), team.clone()];
        if with_label {
            record.push(matrix.labels[i].clone().unwrap_or_default());
        }
        record.extend(matrix.values[i].iter().copied().map(num));
        wtr.write_record(&record)?;
    }
    Ok(())
}

fn save<F>(path: &Path, write: F) -> Result<(), TableError>
where
    F: FnOnce(&mut csv::Writer<File>) -> Result<(), csv::Error>,
{
    let file = File::create(path).map_err(|e| io_error(path, e))?;
    let mut wtr = csv::Writer::from_writer(file);
    write(&mut wtr).map_err(|e| csv_error(path, e))?;
    wtr.flush().map_err(|e| io_error(path, e))
}

pub fn save_players(path: &Path, rows: &[CanonicalPlayerRecord]) -> Result<(), TableError> {
    save(path, |w| write_players_to(w, rows))
}

pub fn save_team_matches(path: &Path, rows: &[TeamMatchRow]) -> Result<(), TableError> {
    save(path, |w| write_team_matches_to(w, rows))
}

pub fn save_form_table(path: &Path, table: &FormTable) -> Result<(), TableError> {
    save(path, |w| write_form_table_to(w, table))
}

pub fn save_diff_table(path: &Path, table: &DiffTable) -> Result<(), TableError> {
    save(path, |w| write_diff_table_to(w, table))
}

pub fn save_feature_matrix(
    path: &Path,
    matrix: &FeatureMatrix,
    with_label: bool,
) -> Result<(), TableError> {
    save(path, |w| write_feature_matrix_to(w, matrix, with_label))
}

// ---------------------------------------------------------------------------
// Readers
// ---------------------------------------------------------------------------

fn open(path: &Path) -> Result<File, TableError> {
    File::open(path).map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, source: std::io::Error) -> TableError {
    TableError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn csv_error(path: &Path, source: csv::Error) -> TableError {
    TableError::Csv {
        path: path.display().to_string(),
        source,
    }
}

pub(crate) fn read_players_from_reader<R: Read>(
    rdr: R,
) -> Result<Vec<CanonicalPlayerRecord>, csv::Error> {
    csv::Reader::from_reader(rdr).deserialize().collect()
}

pub(crate) fn read_team_matches_from_reader<R: Read>(
    rdr: R,
) -> Result<Vec<TeamMatchRow>, csv::Error> {
    csv::Reader::from_reader(rdr).deserialize().collect()
}

pub(crate) fn read_form_table_from_reader<R: Read>(
    rdr: R,
    label: &str,
) -> Result<FormTable, TableError> {
    let csv_err = |source| TableError::Csv {
        path: label.to_string(),
        source,
    };
    let layout = |message: String| TableError::Layout {
        path: label.to_string(),
        message,
    };

    let frame = read_frame_from_reader(rdr).map_err(csv_err)?;
    let n = TEAM_MATCH_COLUMNS.len();
    if frame.columns.len() < n
        || frame.columns[..n]
            .iter()
            .zip(TEAM_MATCH_COLUMNS)
            .any(|(a, b)| a != b)
    {
        return Err(layout(format!(
            "expected the first {} columns to be the team-match columns",
            n
        )));
    }

    let base_headers = StringRecord::from(TEAM_MATCH_COLUMNS.to_vec());
    let columns = frame.columns[n..].to_vec();
    let mut rows = Vec::with_capacity(frame.rows.len());
    for (line, record) in frame.rows.iter().enumerate() {
        let base = StringRecord::from(record.iter().take(n).collect::<Vec<_>>());
        let row: TeamMatchRow = base.deserialize(Some(&base_headers)).map_err(csv_err)?;
        let form = record
            .iter()
            .skip(n)
            .map(|cell| {
                cell.trim().parse::<f64>().map_err(|_| {
                    layout(format!("row {}: '{}' is not a number", line + 2, cell))
                })
            })
            .collect::<Result<Vec<f64>, TableError>>()?;
        rows.push(FormFeatureRow { row, form });
    }
    Ok(FormTable { columns, rows })
}

pub fn load_players(path: &Path) -> Result<Vec<CanonicalPlayerRecord>, TableError> {
    read_players_from_reader(open(path)?).map_err(|e| csv_error(path, e))
}

pub fn load_team_matches(path: &Path) -> Result<Vec<TeamMatchRow>, TableError> {
    read_team_matches_from_reader(open(path)?).map_err(|e| csv_error(path, e))
}

pub fn load_form_table(path: &Path) -> Result<FormTable, TableError> {
    read_form_table_from_reader(open(path)?, &path.display().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
