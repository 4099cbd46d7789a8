// Configuration loading and validation (config/formcast.toml).

use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::aggregate::Stat;
use crate::form::{FormSource, FormSpec};
use crate::opponent::DiffSpec;
use crate::projector::FeatureContract;

pub const CONFIG_FILE: &str = "formcast.toml";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub inputs: InputPaths,
    pub outputs: OutputPaths,
    pub form: FormConfig,
    pub diff: DiffConfig,
    pub contracts: Vec<FeatureContract>,
    /// Directory relative paths are resolved against.
    pub base_dir: PathBuf,
}

/// Raw deserialization target for formcast.toml.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    inputs: InputPaths,
    outputs: OutputPaths,
    form: FormConfig,
    #[serde(default)]
    diff: DiffConfig,
    #[serde(default)]
    contracts: Vec<FeatureContract>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputPaths {
    pub player_events: Vec<String>,
    pub fixtures: String,
    #[serde(default)]
    pub rosters: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputPaths {
    pub dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormConfig {
    pub stat_window: usize,
    pub result_window: usize,
    pub stats: Vec<Stat>,
}

impl FormConfig {
    /// One rolling column per configured stat, then the win rate.
    pub fn specs(&self) -> Vec<FormSpec> {
        self.stats
            .iter()
            .map(|&stat| FormSpec {
                source: FormSource::Stat(stat),
                window: self.stat_window,
            })
            .chain(std::iter::once(FormSpec {
                source: FormSource::Result,
                window: self.result_window,
            }))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiffConfig {
    #[serde(default = "default_true")]
    pub form: bool,
    #[serde(default)]
    pub raw: Vec<DiffSpec>,
}

impl Default for DiffConfig {
    fn default() -> Self {
        DiffConfig {
            form: true,
            raw: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

impl DiffConfig {
    /// Raw diffs in configured order, then one diff per form column.
    pub fn specs(&self, form: &[FormSpec]) -> Vec<DiffSpec> {
        let mut specs = self.raw.clone();
        if self.form {
            specs.extend(form.iter().map(|spec| DiffSpec {
                source: spec.column(),
                name: spec.diff_column(),
            }));
        }
        specs
    }
}

impl Config {
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.base_dir.join(path)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve(&self.outputs.dir)
    }

    pub fn contract(&self, name: &str) -> Option<&FeatureContract> {
        self.contracts.iter().find(|c| c.name == name)
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/formcast.toml` relative to `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()` which handles default initialization automatically.
pub(crate) fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    load_config_file(&path, base_dir)
}

/// Load and validate an explicit config file. Relative data paths inside it
/// resolve against `base_dir`.
pub fn load_config_file(path: &Path, base_dir: &Path) -> Result<Config, ConfigError> {
    let text = read_config_text(path)?;
    let file: ConfigFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config = Config {
        inputs: file.inputs,
        outputs: file.outputs,
        form: file.form,
        diff: file.diff,
        contracts: file.contracts,
        base_dir: base_dir.to_path_buf(),
    };

    validate(&config)?;

    Ok(config)
}

/// Seed `config/` from `defaults/`, never overwriting a file the user
/// already has. Returns the files written, in name order. `.example`
/// templates stay in `defaults/`.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    match (defaults_dir.is_dir(), config_dir.is_dir()) {
        (false, true) => return Ok(Vec::new()),
        (false, false) => {
            return Err(copy_error(format!(
                "no defaults/ or config/ under {}; run formcast from the project root",
                base_dir.display()
            )))
        }
        _ => {}
    }

    fs::create_dir_all(&config_dir)
        .map_err(|e| copy_error(format!("cannot create {}: {e}", config_dir.display())))?;

    let mut written = Vec::new();
    for source in default_files(&defaults_dir)? {
        let Some(name) = source.file_name() else {
            continue;
        };
        let target = config_dir.join(name);
        if seed_file(&source, &target)? {
            written.push(target);
        }
    }
    Ok(written)
}

/// Shipped config files in `dir`, sorted, without `.example` templates.
fn default_files(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let listing =
        fs::read_dir(dir).map_err(|e| copy_error(format!("cannot list {}: {e}", dir.display())))?;

    let mut files = Vec::new();
    for entry in listing {
        let path = entry
            .map_err(|e| copy_error(format!("cannot list {}: {e}", dir.display())))?
            .path();
        let template = path.extension().is_some_and(|ext| ext == "example");
        if path.is_file() && !template {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Copy `source` to `target` unless `target` already exists.
fn seed_file(source: &Path, target: &Path) -> Result<bool, ConfigError> {
    let mut dest = match fs::OpenOptions::new().write(true).create_new(true).open(target) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(copy_error(format!("cannot create {}: {e}", target.display()))),
    };
    let mut src = fs::File::open(source)
        .map_err(|e| copy_error(format!("cannot read {}: {e}", source.display())))?;
    io::copy(&mut src, &mut dest)
        .map_err(|e| copy_error(format!("cannot write {}: {e}", target.display())))?;
    Ok(true)
}

/// Seed `config/` under the working directory, then load it.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_config_text(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn copy_error(message: String) -> ConfigError {
    ConfigError::DefaultsCopyError { message }
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.inputs.player_events.is_empty() {
        return Err(invalid("inputs.player_events", "must list at least one file"));
    }
    if config.inputs.fixtures.trim().is_empty() {
        return Err(invalid("inputs.fixtures", "must not be empty"));
    }

    let windows: &[(&str, usize)] = &[
        ("form.stat_window", config.form.stat_window),
        ("form.result_window", config.form.result_window),
    ];
    for (name, val) in windows {
        if *val == 0 {
            return Err(invalid(*name, "must be > 0"));
        }
    }

    if config.form.stats.is_empty() {
        return Err(invalid("form.stats", "must list at least one stat"));
    }
    let mut seen = HashSet::new();
    for stat in &config.form.stats {
        if !seen.insert(stat) {
            return Err(invalid("form.stats", format!("'{stat}' is listed twice")));
        }
    }

    let mut names = HashSet::new();
    for spec in config.diff.specs(&config.form.specs()) {
        if !spec.name.ends_with("_diff") {
            return Err(invalid(
                "diff.raw",
                format!("output name '{}' must end in _diff", spec.name),
            ));
        }
        if !names.insert(spec.name.clone()) {
            return Err(invalid(
                "diff.raw",
                format!("output name '{}' is produced twice", spec.name),
            ));
        }
    }

    let mut contract_names = HashSet::new();
    for contract in &config.contracts {
        if !contract_names.insert(contract.name.as_str()) {
            return Err(invalid(
                "contracts",
                format!("contract '{}' is defined twice", contract.name),
            ));
        }
        contract
            .validate()
            .map_err(|e| invalid(format!("contracts.{}", contract.name), e.to_string()))?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projector::ContractSource;
    use std::fs;
    use std::path::PathBuf;

    /// Helper: returns the workspace root holding `defaults/`
    /// (works whether `cargo test` runs from the crate dir or the workspace).
    fn project_root() -> PathBuf {
        let cwd = std::env::current_dir().unwrap();
        cwd.ancestors()
            .find(|dir| dir.join("defaults").join(CONFIG_FILE).exists())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| panic!("Cannot locate defaults/ directory from CWD {:?}", cwd))
    }

    fn default_text() -> String {
        fs::read_to_string(project_root().join("defaults").join(CONFIG_FILE)).unwrap()
    }

    /// Write `text` as config/formcast.toml under a fresh temp dir and load it.
    fn load_text(dir_name: &str, text: &str) -> Result<Config, ConfigError> {
        let tmp = std::env::temp_dir().join(dir_name);
        let config_dir = tmp.join("config");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join(CONFIG_FILE), text).unwrap();
        let result = load_config_from(&tmp);
        let _ = fs::remove_dir_all(&tmp);
        result
    }

    fn expect_field(result: Result<Config, ConfigError>, expected: &str) {
        match result {
            Err(ConfigError::ValidationError { field, .. }) => assert_eq!(field, expected),
            Err(other) => panic!("expected ValidationError, got: {other}"),
            Ok(_) => panic!("expected ValidationError for {expected}, got Ok"),
        }
    }

    #[test]
    fn load_valid_config_from_default_file() {
        let config = load_text("config_test_defaults", &default_text())
            .expect("should load valid config");

        assert_eq!(config.inputs.player_events, vec!["data/raw/player_events.csv"]);
        assert_eq!(config.inputs.fixtures, "data/raw/fixtures.csv");
        assert_eq!(config.inputs.rosters.as_deref(), Some("data/raw/rosters.csv"));
        assert_eq!(config.outputs.dir, "data/features");
        assert_eq!(config.form.stat_window, 3);
        assert_eq!(config.form.result_window, 5);
        assert_eq!(
            config.form.stats,
            vec![
                Stat::Shots,
                Stat::ShotsOnGoal,
                Stat::Assists,
                Stat::PlayerCount,
                Stat::AvgPlayerYear
            ]
        );
        assert!(config.diff.form);
        assert_eq!(config.diff.raw[1].source, "shots");
        assert_eq!(config.diff.raw[1].name, "shot_diff");

        let opponent = config.contract("opponent").unwrap();
        assert_eq!(opponent.source, ContractSource::Diff);
        assert_eq!(opponent.columns.len(), 19);
        let predictive = config.contract("predictive").unwrap();
        assert_eq!(predictive.columns[5], "win_rate_rolling5");
        assert_eq!(predictive.columns.last().map(String::as_str), Some("win_rate_diff"));
    }

    #[test]
    fn form_and_diff_specs_follow_config_order() {
        let config = load_text("config_test_specs", &default_text()).unwrap();
        let form = config.form.specs();
        let columns: Vec<String> = form.iter().map(FormSpec::column).collect();
        assert_eq!(
            columns,
            vec![
                "shots_rolling3",
                "sog_rolling3",
                "assists_rolling3",
                "player_count_rolling3",
                "avg_player_year_rolling3",
                "win_rate_rolling5"
            ]
        );

        let diffs = config.diff.specs(&form);
        assert_eq!(diffs.len(), 8 + 6);
        assert_eq!(diffs[8].source, "shots_rolling3");
        assert_eq!(diffs[8].name, "shots_form_diff");
        assert_eq!(diffs[13].name, "win_rate_diff");
    }

    #[test]
    fn every_predictive_column_is_produced() {
        let config = load_text("config_test_predictive", &default_text()).unwrap();
        let form = config.form.specs();
        let mut produced: Vec<String> = form.iter().map(FormSpec::column).collect();
        produced.extend(config.diff.specs(&form).into_iter().map(|d| d.name));
        produced.extend(Stat::ALL.iter().map(|s| s.column().to_string()));
        for contract in &config.contracts {
            for column in &contract.columns {
                assert!(produced.contains(column), "{} not produced", column);
            }
        }
    }

    #[test]
    fn optional_sections_default() {
        let text = r#"
[inputs]
player_events = ["events.csv"]
fixtures = "fixtures.csv"

[outputs]
dir = "out"

[form]
stat_window = 3
result_window = 5
stats = ["shots"]
"#;
        let config = load_text("config_test_minimal", text).unwrap();
        assert!(config.inputs.rosters.is_none());
        assert!(config.diff.form);
        assert!(config.diff.raw.is_empty());
        assert!(config.contracts.is_empty());
    }

    #[test]
    fn rejects_zero_windows() {
        let text = default_text().replace("stat_window = 3", "stat_window = 0");
        expect_field(load_text("config_test_zero_stat_window", &text), "form.stat_window");

        let text = default_text().replace("result_window = 5", "result_window = 0");
        expect_field(load_text("config_test_zero_result_window", &text), "form.result_window");
    }

    #[test]
    fn rejects_empty_and_repeated_stats() {
        let text = default_text().replace(
            r#"stats = ["shots", "sog", "assists", "player_count", "avg_player_year"]"#,
            "stats = []",
        );
        expect_field(load_text("config_test_empty_stats", &text), "form.stats");

        let text = default_text().replace(
            r#"stats = ["shots", "sog", "assists", "player_count", "avg_player_year"]"#,
            r#"stats = ["shots", "SHOTS"]"#,
        );
        expect_field(load_text("config_test_repeated_stats", &text), "form.stats");
    }

    #[test]
    fn rejects_bad_diff_names() {
        let text = default_text().replace(r#"name = "goal_diff""#, r#"name = "goal_delta""#);
        expect_field(load_text("config_test_diff_suffix", &text), "diff.raw");

        let text = default_text().replace(r#"name = "goal_diff""#, r#"name = "shot_diff""#);
        expect_field(load_text("config_test_diff_repeat", &text), "diff.raw");
    }

    #[test]
    fn rejects_duplicate_contracts_and_columns() {
        let text = default_text().replace(r#"name = "predictive""#, r#"name = "opponent""#);
        expect_field(load_text("config_test_contract_repeat", &text), "contracts");

        let text = default_text().replace(
            r#""shot_diff", "sog_diff", "assist_diff","#,
            r#""shot_diff", "shot_diff", "assist_diff","#,
        );
        expect_field(
            load_text("config_test_contract_columns", &text),
            "contracts.opponent",
        );
    }

    #[test]
    fn rejects_empty_event_list() {
        let text = default_text().replace(
            r#"player_events = ["data/raw/player_events.csv"]"#,
            "player_events = []",
        );
        expect_field(load_text("config_test_no_events", &text), "inputs.player_events");
    }

    #[test]
    fn unknown_stat_is_a_parse_error() {
        let text = default_text().replace(r#""player_count", "avg_player_year"]"#, r#""xg"]"#);
        match load_text("config_test_unknown_stat", &text).unwrap_err() {
            ConfigError::ParseError { path, .. } => assert!(path.ends_with(CONFIG_FILE)),
            other => panic!("expected ParseError, got: {other}"),
        }
    }

    #[test]
    fn file_not_found_for_missing_config() {
        let tmp = std::env::temp_dir().join("config_test_missing_file");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();

        let err = load_config_from(&tmp).unwrap_err();
        match &err {
            ConfigError::FileNotFound { path } => {
                assert!(path.ends_with(CONFIG_FILE));
            }
            other => panic!("expected FileNotFound, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parse_error_for_invalid_toml() {
        match load_text("config_test_invalid_toml", "this is not valid [[[ toml").unwrap_err() {
            ConfigError::ParseError { path, .. } => assert!(path.ends_with(CONFIG_FILE)),
            other => panic!("expected ParseError, got: {other}"),
        }
    }

    #[test]
    fn paths_resolve_against_base_dir() {
        let config = load_text("config_test_resolve", &default_text()).unwrap();
        let base = std::env::temp_dir().join("config_test_resolve");
        assert_eq!(config.output_dir(), base.join("data/features"));
    }

    #[test]
    fn ensure_config_files_seeds_only_what_is_missing() {
        struct Case {
            dir: &'static str,
            defaults: &'static [(&'static str, &'static str)],
            existing: Option<&'static str>,
            copied: &'static [&'static str],
            kept: Option<&'static str>,
            fails: bool,
        }

        let cases = [
            Case {
                dir: "config_test_seed_fresh",
                defaults: &[(CONFIG_FILE, "fresh\n"), ("formcast.toml.example", "# example\n")],
                existing: None,
                copied: &[CONFIG_FILE],
                kept: Some("fresh\n"),
                fails: false,
            },
            Case {
                dir: "config_test_seed_keeps_user_file",
                defaults: &[(CONFIG_FILE, "fresh\n")],
                existing: Some("# custom\n"),
                copied: &[],
                kept: Some("# custom\n"),
                fails: false,
            },
            Case {
                dir: "config_test_seed_config_only",
                defaults: &[],
                existing: Some("# custom\n"),
                copied: &[],
                kept: Some("# custom\n"),
                fails: false,
            },
            Case {
                dir: "config_test_seed_nothing",
                defaults: &[],
                existing: None,
                copied: &[],
                kept: None,
                fails: true,
            },
        ];

        for case in cases {
            let tmp = std::env::temp_dir().join(case.dir);
            let _ = fs::remove_dir_all(&tmp);
            fs::create_dir_all(&tmp).unwrap();
            if !case.defaults.is_empty() {
                fs::create_dir_all(tmp.join("defaults")).unwrap();
            }
            for (name, text) in case.defaults {
                fs::write(tmp.join("defaults").join(name), text).unwrap();
            }
            if let Some(text) = case.existing {
                fs::create_dir_all(tmp.join("config")).unwrap();
                fs::write(tmp.join("config").join(CONFIG_FILE), text).unwrap();
            }

            let result = ensure_config_files(&tmp);
            if case.fails {
                assert!(
                    matches!(result, Err(ConfigError::DefaultsCopyError { .. })),
                    "{}: expected DefaultsCopyError",
                    case.dir
                );
            } else {
                let copied: Vec<PathBuf> = result.unwrap();
                let expected: Vec<PathBuf> =
                    case.copied.iter().map(|n| tmp.join("config").join(n)).collect();
                assert_eq!(copied, expected, "{}", case.dir);
                assert!(!tmp.join("config/formcast.toml.example").exists(), "{}", case.dir);
            }
            if let Some(text) = case.kept {
                let on_disk = fs::read_to_string(tmp.join("config").join(CONFIG_FILE)).unwrap();
                assert_eq!(on_disk, text, "{}", case.dir);
            }

            let _ = fs::remove_dir_all(&tmp);
        }
    }

    #[test]
    fn seeded_defaults_load() {
        let tmp = std::env::temp_dir().join("config_test_seeded_loads");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::write(tmp.join("defaults").join(CONFIG_FILE), default_text()).unwrap();

        ensure_config_files(&tmp).unwrap();
        load_config_from(&tmp).expect("seeded defaults should load");

        let _ = fs::remove_dir_all(&tmp);
    }
}
