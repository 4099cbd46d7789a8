// Raw table loading: player event rows, fixtures, and the optional roster table.
//
// Headers are matched case-insensitively after trimming. A structurally
// required column that is absent aborts the load; individual rows that
// cannot be decoded are skipped with a warning.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// One player's line for one match, exactly as the upstream scraper wrote it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEventRecord {
    pub season: String,
    pub match_id: String,
    pub date: String,
    pub team: String,
    pub player: String,
    pub position: String,
    pub academic_year: String,
    pub goals: f64,
    pub shots: f64,
    pub shots_on_goal: f64,
    pub assists: f64,
}

/// Match-level record: who was home, who was away, and the final score.
///
/// Scores are `None` for fixtures that have not been played yet.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureRecord {
    pub match_id: String,
    pub season: String,
    pub date: NaiveDate,
    pub home_team: String,
    pub away_team: String,
    pub home_goals: Option<u32>,
    pub away_goals: Option<u32>,
}

/// Season roster line carrying a player's listed position and academic year.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterRecord {
    pub season: String,
    pub team: String,
    pub player: String,
    pub position: String,
    pub academic_year: String,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("{path} is missing required column(s): {}", columns.join(", "))]
    MissingColumns { path: String, columns: Vec<String> },
}

// ---------------------------------------------------------------------------
// Raw CSV serde structs (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawEventRow {
    #[serde(default)]
    season: String,
    #[serde(default)]
    match_id: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    team: String,
    #[serde(default)]
    player: String,
    #[serde(default, alias = "pos")]
    position: String,
    #[serde(default, alias = "academic_year", alias = "yr")]
    year: String,
    #[serde(default, alias = "g", deserialize_with = "lenient_f64")]
    goals: f64,
    #[serde(default, alias = "sh", deserialize_with = "lenient_f64")]
    shots: f64,
    #[serde(default, alias = "shots_on_goal", deserialize_with = "lenient_f64")]
    sog: f64,
    #[serde(default, alias = "a", deserialize_with = "lenient_f64")]
    assists: f64,
}

#[derive(Debug, Deserialize)]
struct RawFixtureRow {
    #[serde(default)]
    match_id: String,
    #[serde(default)]
    season: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    home_team: String,
    #[serde(default)]
    away_team: String,
    #[serde(default, deserialize_with = "lenient_goals")]
    home_goals: Option<u32>,
    #[serde(default, deserialize_with = "lenient_goals")]
    away_goals: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawRosterRow {
    #[serde(default)]
    season: String,
    #[serde(default)]
    team: String,
    #[serde(default)]
    player: String,
    #[serde(default, alias = "pos")]
    position: String,
    #[serde(default, alias = "academic_year", alias = "yr")]
    year: String,
}

/// Required columns per table. Each entry lists accepted spellings.
const EVENT_COLUMNS: &[&[&str]] = &[
    &["season"],
    &["match_id"],
    &["date"],
    &["team"],
    &["player"],
    &["goals", "g"],
    &["shots", "sh"],
    &["sog", "shots_on_goal"],
    &["assists", "a"],
];

const FIXTURE_COLUMNS: &[&[&str]] = &[
    &["match_id"],
    &["season"],
    &["date"],
    &["home_team"],
    &["away_team"],
    &["home_goals"],
    &["away_goals"],
];

const ROSTER_COLUMNS: &[&[&str]] = &[&["season"], &["team"], &["player"]];

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Blank, non-numeric, or non-finite cells become 0.0.
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0))
}

/// Blank or unparseable scores mean "not played".
fn lenient_goals<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.round() as u32))
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y%m%d",
    "%m/%d/%Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%a, %b %d, %Y",
];

/// Parse a fixture date in any of the formats the scrapers have produced.
pub fn parse_match_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(date);
        }
    }
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.date_naive())
}

/// Trim and lowercase the header row, then verify every required column is
/// present under one of its accepted spellings.
fn prepare_headers<R: Read>(
    reader: &mut csv::Reader<R>,
    required: &[&[&str]],
    path: &str,
) -> Result<(), IngestError> {
    let headers = reader.headers().map_err(|e| IngestError::Csv {
        path: path.to_string(),
        source: e,
    })?;
    let normalized: csv::StringRecord = headers
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').to_lowercase())
        .collect();

    let missing: Vec<String> = required
        .iter()
        .filter(|spellings| !spellings.iter().any(|s| normalized.iter().any(|h| h == *s)))
        .map(|spellings| spellings[0].to_string())
        .collect();
    if !missing.is_empty() {
        return Err(IngestError::MissingColumns {
            path: path.to_string(),
            columns: missing,
        });
    }

    reader.set_headers(normalized);
    Ok(())
}

fn open_file(path: &Path) -> Result<std::fs::File, IngestError> {
    std::fs::File::open(path).map_err(|e| IngestError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// Reader-based loaders
// ---------------------------------------------------------------------------

pub(crate) fn load_events_from_reader<R: Read>(
    rdr: R,
    label: &str,
) -> Result<Vec<RawEventRecord>, IngestError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
    prepare_headers(&mut reader, EVENT_COLUMNS, label)?;

    let mut events = Vec::new();
    for (line, result) in reader.deserialize::<RawEventRow>().enumerate() {
        match result {
            Ok(raw) => events.push(RawEventRecord {
                season: raw.season,
                match_id: raw.match_id,
                date: raw.date,
                team: raw.team,
                player: raw.player,
                position: raw.position,
                academic_year: raw.year,
                goals: raw.goals,
                shots: raw.shots,
                shots_on_goal: raw.sog,
                assists: raw.assists,
            }),
            Err(e) => {
                warn!("{}: skipping malformed event row {}: {}", label, line + 2, e);
            }
        }
    }
    debug!("{}: loaded {} event rows", label, events.len());
    Ok(events)
}

pub(crate) fn load_fixtures_from_reader<R: Read>(
    rdr: R,
    label: &str,
) -> Result<Vec<FixtureRecord>, IngestError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
    prepare_headers(&mut reader, FIXTURE_COLUMNS, label)?;

    let mut fixtures = Vec::new();
    for (line, result) in reader.deserialize::<RawFixtureRow>().enumerate() {
        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                warn!("{}: skipping malformed fixture row {}: {}", label, line + 2, e);
                continue;
            }
        };
        if raw.match_id.is_empty() || raw.home_team.is_empty() || raw.away_team.is_empty() {
            warn!(
                "{}: dropping fixture row {}: blank match id or team",
                label,
                line + 2
            );
            continue;
        }
        let Some(date) = parse_match_date(&raw.date) else {
            warn!(
                "{}: dropping fixture '{}': unparseable date '{}'",
                label, raw.match_id, raw.date
            );
            continue;
        };
        fixtures.push(FixtureRecord {
            match_id: raw.match_id,
            season: raw.season,
            date,
            home_team: raw.home_team,
            away_team: raw.away_team,
            home_goals: raw.home_goals,
            away_goals: raw.away_goals,
        });
    }
    debug!("{}: loaded {} fixtures", label, fixtures.len());
    Ok(fixtures)
}

pub(crate) fn load_rosters_from_reader<R: Read>(
    rdr: R,
    label: &str,
) -> Result<Vec<RosterRecord>, IngestError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
    prepare_headers(&mut reader, ROSTER_COLUMNS, label)?;

    let mut rosters = Vec::new();
    for (line, result) in reader.deserialize::<RawRosterRow>().enumerate() {
        match result {
            Ok(raw) => rosters.push(RosterRecord {
                season: raw.season,
                team: raw.team,
                player: raw.player,
                position: raw.position,
                academic_year: raw.year,
            }),
            Err(e) => {
                warn!("{}: skipping malformed roster row {}: {}", label, line + 2, e);
            }
        }
    }
    Ok(rosters)
}

// ---------------------------------------------------------------------------
// Public path-based loaders
// ---------------------------------------------------------------------------

/// Load player event rows from a single CSV file.
pub fn load_events(path: &Path) -> Result<Vec<RawEventRecord>, IngestError> {
    let file = open_file(path)?;
    load_events_from_reader(file, &path.display().to_string())
}

/// Load and concatenate several event files in the order given.
pub fn load_event_files<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<RawEventRecord>, IngestError> {
    let mut all = Vec::new();
    for path in paths {
        all.extend(load_events(path.as_ref())?);
    }
    Ok(all)
}

/// Load the fixture table.
pub fn load_fixtures(path: &Path) -> Result<Vec<FixtureRecord>, IngestError> {
    let file = open_file(path)?;
    load_fixtures_from_reader(file, &path.display().to_string())
}

/// Load the roster table.
pub fn load_rosters(path: &Path) -> Result<Vec<RosterRecord>, IngestError> {
    let file = open_file(path)?;
    load_rosters_from_reader(file, &path.display().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_csv_with_aliases_and_mixed_case_headers() {
        let csv_data = "\
Season,Match_ID,Date,Team,Player,POS,Year,G,SH,SOG,A
2023,m1,2023-09-01,UBC,Jane Doe,CB,Jr.,1,3,2,0";

        let events = load_events_from_reader(csv_data.as_bytes(), "test").unwrap();
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.team, "UBC");
        assert_eq!(e.position, "CB");
        assert_eq!(e.academic_year, "Jr.");
        assert_eq!(e.goals, 1.0);
        assert_eq!(e.shots, 3.0);
        assert_eq!(e.shots_on_goal, 2.0);
        assert_eq!(e.assists, 0.0);
    }

    #[test]
    fn non_numeric_stats_coerce_to_zero() {
        let csv_data = "\
season,match_id,date,team,player,goals,shots,sog,assists
2023,m1,2023-09-01,UBC,Jane Doe,-,,abc,NaN";

        let events = load_events_from_reader(csv_data.as_bytes(), "test").unwrap();
        assert_eq!(events[0].goals, 0.0);
        assert_eq!(events[0].shots, 0.0);
        assert_eq!(events[0].shots_on_goal, 0.0);
        assert_eq!(events[0].assists, 0.0);
    }

    #[test]
    fn position_and_year_columns_are_optional() {
        let csv_data = "\
season,match_id,date,team,player,goals,shots,sog,assists
2023,m1,2023-09-01,UBC,Jane Doe,1,2,1,0";

        let events = load_events_from_reader(csv_data.as_bytes(), "test").unwrap();
        assert_eq!(events[0].position, "");
        assert_eq!(events[0].academic_year, "");
    }

    #[test]
    fn missing_required_event_column_is_fatal() {
        let csv_data = "\
season,match_id,date,team,player,goals,sog,assists
2023,m1,2023-09-01,UBC,Jane Doe,1,1,0";

        let err = load_events_from_reader(csv_data.as_bytes(), "events.csv").unwrap_err();
        match err {
            IngestError::MissingColumns { columns, .. } => {
                assert_eq!(columns, vec!["shots".to_string()]);
            }
            other => panic!("expected MissingColumns, got: {other}"),
        }
    }

    #[test]
    fn malformed_event_row_is_skipped() {
        let csv_data = "\
season,match_id,date,team,player,goals,shots,sog,assists
2023,m1,2023-09-01,UBC,Jane Doe,1,2,1,0
2023,m1,2023-09-01,UBC
2023,m1,2023-09-01,UBC,Ann Roe,0,1,0,1";

        let events = load_events_from_reader(csv_data.as_bytes(), "test").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].player, "Ann Roe");
    }

    #[test]
    fn fixtures_with_blank_scores_are_kept_unplayed() {
        let csv_data = "\
match_id,season,date,home_team,away_team,home_goals,away_goals
m1,2023,2023-09-01,UBC,UVic,2,1
m2,2023,2023-09-08,UVic,UBC,,";

        let fixtures = load_fixtures_from_reader(csv_data.as_bytes(), "test").unwrap();
        assert_eq!(fixtures.len(), 2);
        assert_eq!(fixtures[0].home_goals, Some(2));
        assert_eq!(fixtures[0].away_goals, Some(1));
        assert_eq!(fixtures[1].home_goals, None);
        assert_eq!(fixtures[1].away_goals, None);
    }

    #[test]
    fn fixtures_with_bad_dates_are_dropped() {
        let csv_data = "\
match_id,season,date,home_team,away_team,home_goals,away_goals
m1,2023,Unknown,UBC,UVic,2,1
m2,2023,\"Sep 8, 2023\",UVic,UBC,0,0";

        let fixtures = load_fixtures_from_reader(csv_data.as_bytes(), "test").unwrap();
        assert_eq!(fixtures.len(), 1);
        assert_eq!(fixtures[0].match_id, "m2");
        assert_eq!(fixtures[0].date, NaiveDate::from_ymd_opt(2023, 9, 8).unwrap());
    }

    #[test]
    fn parse_match_date_accepts_scraped_formats() {
        let expected = NaiveDate::from_ymd_opt(2023, 9, 8).unwrap();
        assert_eq!(parse_match_date("2023-09-08"), Some(expected));
        assert_eq!(parse_match_date("2023/09/08"), Some(expected));
        assert_eq!(parse_match_date("20230908"), Some(expected));
        assert_eq!(parse_match_date("09/08/2023"), Some(expected));
        assert_eq!(parse_match_date("Sep 8, 2023"), Some(expected));
        assert_eq!(parse_match_date("September 8, 2023"), Some(expected));
        assert_eq!(parse_match_date("Fri, Sep 8, 2023"), Some(expected));
        assert_eq!(parse_match_date("2023-09-08T19:00:00Z"), Some(expected));
        assert_eq!(parse_match_date("Unknown"), None);
        assert_eq!(parse_match_date(""), None);
    }

    #[test]
    fn roster_rows_load_with_optional_columns() {
        let csv_data = "\
Season,Team,Player,Position,Academic_Year
2023,UBC,Jane Doe,CDM/CB,Fr.";

        let rosters = load_rosters_from_reader(csv_data.as_bytes(), "test").unwrap();
        assert_eq!(rosters.len(), 1);
        assert_eq!(rosters[0].position, "CDM/CB");
        assert_eq!(rosters[0].academic_year, "Fr.");
    }
}
