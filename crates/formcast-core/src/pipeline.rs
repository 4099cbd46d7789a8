// Pipeline driver: runs the stages in order and persists every stage table.
//
// Each stage can also run alone, reading the previous stage's artifact from
// the output directory, so any table can be regenerated and inspected on its
// own.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate::{aggregate, AggregateReport, TeamMatchRow};
use crate::config::{Config, ConfigError};
use crate::form::{compute_form, FallbackMeans, FormReport, FormTable};
use crate::ingest::{self, IngestError, RosterRecord};
use crate::normalize::{normalize_events, normalize_fixtures, CanonicalPlayerRecord};
use crate::opponent::{compute_diffs, DiffReport, DiffTable, OpponentError};
use crate::projector::{project, ContractError, ContractSource, FeatureContract, FeatureSource};
use crate::table::{self, TableError};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Opponent(#[from] OpponentError),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to encode run summary: {0}")]
    Summary(#[from] serde_json::Error),

    #[error("no contract named '{0}' in the configuration")]
    UnknownContract(String),
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

pub const PLAYERS_FILE: &str = "players_normalized.csv";
pub const TEAM_MATCHES_FILE: &str = "team_matches.csv";
pub const FORM_FILE: &str = "form_features.csv";
pub const DIFF_FILE: &str = "opponent_diff.csv";
pub const SUMMARY_FILE: &str = "run_summary.json";

/// Locations of the stage tables inside the output directory.
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub dir: PathBuf,
}

impl Artifacts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Artifacts { dir: dir.into() }
    }

    pub fn players(&self) -> PathBuf {
        self.dir.join(PLAYERS_FILE)
    }

    pub fn team_matches(&self) -> PathBuf {
        self.dir.join(TEAM_MATCHES_FILE)
    }

    pub fn form(&self) -> PathBuf {
        self.dir.join(FORM_FILE)
    }

    pub fn diff(&self) -> PathBuf {
        self.dir.join(DIFF_FILE)
    }

    pub fn features(&self, contract: &str) -> PathBuf {
        self.dir.join(format!("features_{contract}.csv"))
    }

    pub fn summary(&self) -> PathBuf {
        self.dir.join(SUMMARY_FILE)
    }

    fn ensure_dir(&self) -> Result<(), PipelineError> {
        fs::create_dir_all(&self.dir).map_err(|e| PipelineError::Io {
            path: self.dir.display().to_string(),
            source: e,
        })
    }
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeReport {
    pub event_rows: usize,
    pub roster_rows: usize,
    pub player_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectionReport {
    pub contract: String,
    pub rows: usize,
    pub columns: usize,
    pub missing_columns: Vec<String>,
}

/// Counts for every stage that ran. Contains nothing run-specific, so the
/// same inputs always serialize to the same bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalize: Option<NormalizeReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form: Option<FormReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<ProjectionReport>,
}

impl PipelineSummary {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

fn load_rosters(config: &Config) -> Result<Vec<RosterRecord>, IngestError> {
    let Some(rel) = &config.inputs.rosters else {
        return Ok(Vec::new());
    };
    let path = config.resolve(rel);
    if !path.exists() {
        warn!(
            "roster file {} not found, positions and years come from event rows only",
            path.display()
        );
        return Ok(Vec::new());
    }
    ingest::load_rosters(&path)
}

fn normalize_stage(
    config: &Config,
    summary: &mut PipelineSummary,
) -> Result<Vec<CanonicalPlayerRecord>, PipelineError> {
    let paths: Vec<PathBuf> = config
        .inputs
        .player_events
        .iter()
        .map(|p| config.resolve(p))
        .collect();
    let events = ingest::load_event_files(&paths)?;
    let rosters = load_rosters(config)?;
    let players = normalize_events(&events, &rosters);

    summary.normalize = Some(NormalizeReport {
        event_rows: events.len(),
        roster_rows: rosters.len(),
        player_rows: players.len(),
    });
    Ok(players)
}

fn aggregate_stage(
    config: &Config,
    players: &[CanonicalPlayerRecord],
    summary: &mut PipelineSummary,
) -> Result<Vec<TeamMatchRow>, PipelineError> {
    let fixtures = ingest::load_fixtures(&config.resolve(&config.inputs.fixtures))?;
    let fixtures = normalize_fixtures(&fixtures);
    let (rows, report) = aggregate(players, &fixtures);
    summary.aggregate = Some(report);
    Ok(rows)
}

fn form_stage(config: &Config, rows: &[TeamMatchRow], summary: &mut PipelineSummary) -> FormTable {
    let specs = config.form.specs();
    let fallback = FallbackMeans::build(rows, &specs);
    let (table, report) = compute_form(rows, &specs, &fallback);
    summary.form = Some(report);
    table
}

fn diff_stage(
    config: &Config,
    form: &FormTable,
    summary: &mut PipelineSummary,
) -> Result<DiffTable, PipelineError> {
    let specs = config.diff.specs(&config.form.specs());
    let (table, report) = compute_diffs(form, &specs)?;
    summary.diff = Some(report);
    Ok(table)
}

fn project_stage<S: FeatureSource + ?Sized>(
    source: &S,
    contract: &FeatureContract,
    out: &Path,
    with_label: bool,
    summary: &mut PipelineSummary,
) -> Result<(), PipelineError> {
    let matrix = project(source, contract);
    table::save_feature_matrix(out, &matrix, with_label)?;
    summary.features.push(ProjectionReport {
        contract: contract.name.clone(),
        rows: matrix.keys.len(),
        columns: matrix.columns.len(),
        missing_columns: matrix.missing,
    });
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Run every stage, project every configured contract (with the `result`
/// label) and write `run_summary.json`.
pub fn run(config: &Config) -> Result<PipelineSummary, PipelineError> {
    let artifacts = Artifacts::new(config.output_dir());
    artifacts.ensure_dir()?;
    let mut summary = PipelineSummary::default();

    let players = normalize_stage(config, &mut summary)?;
    table::save_players(&artifacts.players(), &players)?;

    let rows = aggregate_stage(config, &players, &mut summary)?;
    table::save_team_matches(&artifacts.team_matches(), &rows)?;

    let form = form_stage(config, &rows, &mut summary);
    table::save_form_table(&artifacts.form(), &form)?;

    let diff = diff_stage(config, &form, &mut summary)?;
    table::save_diff_table(&artifacts.diff(), &diff)?;

    for contract in &config.contracts {
        let out = artifacts.features(&contract.name);
        match contract.source {
            ContractSource::Diff => project_stage(&diff, contract, &out, true, &mut summary)?,
            ContractSource::Form => project_stage(&form, contract, &out, true, &mut summary)?,
        }
    }

    let json = summary.to_json()?;
    let summary_path = artifacts.summary();
    fs::write(&summary_path, json + "\n").map_err(|e| PipelineError::Io {
        path: summary_path.display().to_string(),
        source: e,
    })?;

    info!("pipeline complete, artifacts in {}", artifacts.dir.display());
    Ok(summary)
}

/// Raw inputs -> `players_normalized.csv`.
pub fn run_normalize(config: &Config) -> Result<PipelineSummary, PipelineError> {
    let artifacts = Artifacts::new(config.output_dir());
    artifacts.ensure_dir()?;
    let mut summary = PipelineSummary::default();
    let players = normalize_stage(config, &mut summary)?;
    table::save_players(&artifacts.players(), &players)?;
    Ok(summary)
}

/// `players_normalized.csv` + fixtures -> `team_matches.csv`.
pub fn run_aggregate(config: &Config) -> Result<PipelineSummary, PipelineError> {
    let artifacts = Artifacts::new(config.output_dir());
    let mut summary = PipelineSummary::default();
    let players = table::load_players(&artifacts.players())?;
    let rows = aggregate_stage(config, &players, &mut summary)?;
    table::save_team_matches(&artifacts.team_matches(), &rows)?;
    Ok(summary)
}

/// `team_matches.csv` -> `form_features.csv`.
pub fn run_form(config: &Config) -> Result<PipelineSummary, PipelineError> {
    let artifacts = Artifacts::new(config.output_dir());
    let mut summary = PipelineSummary::default();
    let rows = table::load_team_matches(&artifacts.team_matches())?;
    let form = form_stage(config, &rows, &mut summary);
    table::save_form_table(&artifacts.form(), &form)?;
    Ok(summary)
}

/// `form_features.csv` -> `opponent_diff.csv`.
pub fn run_diff(config: &Config) -> Result<PipelineSummary, PipelineError> {
    let artifacts = Artifacts::new(config.output_dir());
    let mut summary = PipelineSummary::default();
    let form = table::load_form_table(&artifacts.form())?;
    let diff = diff_stage(config, &form, &mut summary)?;
    table::save_diff_table(&artifacts.diff(), &diff)?;
    Ok(summary)
}

/// Project a persisted stage table onto `contract`, writing
/// `features_<name>.csv`.
pub fn run_project(
    config: &Config,
    contract: &FeatureContract,
    with_label: bool,
) -> Result<PipelineSummary, PipelineError> {
    contract.validate()?;
    let artifacts = Artifacts::new(config.output_dir());
    let mut summary = PipelineSummary::default();
    let input = match contract.source {
        ContractSource::Diff => artifacts.diff(),
        ContractSource::Form => artifacts.form(),
    };
    let frame = table::read_frame(&input)?;
    project_stage(
        &frame,
        contract,
        &artifacts.features(&contract.name),
        with_label,
        &mut summary,
    )?;
    Ok(summary)
}

/// Look up a configured contract by name.
pub fn configured_contract<'a>(
    config: &'a Config,
    name: &str,
) -> Result<&'a FeatureContract, PipelineError> {
    config
        .contract(name)
        .ok_or_else(|| PipelineError::UnknownContract(name.to_string()))
}
