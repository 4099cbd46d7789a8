// Formcast entry point.
//
// Startup sequence:
// 1. Parse arguments, initialize tracing (stderr)
// 2. Load config (copying defaults/ into config/ when missing)
// 3. Run the requested stage(s)
// 4. Print the stage summary as JSON on stdout

use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use tracing::info;

use formcast_core::config::{self, Config};
use formcast_core::pipeline::{self, PipelineSummary};
use formcast_core::projector::load_contract_json;

#[derive(Parser)]
#[command(name = "formcast")]
#[command(about = "Leakage-safe pre-match feature tables from player box scores", long_about = None)]
struct Cli {
    /// Config file path (default: config/formcast.toml, created from defaults/)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every stage and project every configured contract
    Run,
    /// Raw event files -> players_normalized.csv
    Normalize,
    /// players_normalized.csv + fixtures -> team_matches.csv
    Aggregate,
    /// team_matches.csv -> form_features.csv
    Form,
    /// form_features.csv -> opponent_diff.csv
    Diff,
    /// Stage table -> features_<contract>.csv
    Project {
        /// Contract name
        #[arg(long)]
        contract: String,
        /// Include the `result` label column (training data)
        #[arg(long)]
        with_label: bool,
        /// Read the column list from a model's JSON export instead of the config
        #[arg(long)]
        contract_file: Option<PathBuf>,
    },
    /// Copy default configuration into config/
    Init,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let cwd = std::env::current_dir().context("failed to read current directory")?;

    if let Commands::Init = cli.command {
        let copied = config::ensure_config_files(&cwd).context("failed to initialize config")?;
        if copied.is_empty() {
            info!("config/ already up to date");
        }
        for path in copied {
            info!("created {}", path.display());
        }
        return Ok(());
    }

    let config = load_config(&cli, &cwd)?;
    info!(
        "config loaded: {} event file(s), output to {}",
        config.inputs.player_events.len(),
        config.output_dir().display()
    );

    let summary = match cli.command {
        Commands::Run => pipeline::run(&config).context("pipeline run failed")?,
        Commands::Normalize => pipeline::run_normalize(&config).context("normalize failed")?,
        Commands::Aggregate => pipeline::run_aggregate(&config).context("aggregate failed")?,
        Commands::Form => pipeline::run_form(&config).context("form failed")?,
        Commands::Diff => pipeline::run_diff(&config).context("diff failed")?,
        Commands::Project {
            contract,
            with_label,
            contract_file,
        } => project(&config, &contract, with_label, contract_file)?,
        Commands::Init => PipelineSummary::default(),
    };

    println!("{}", summary.to_json()?);
    Ok(())
}

fn load_config(cli: &Cli, cwd: &std::path::Path) -> anyhow::Result<Config> {
    let config = match &cli.config {
        Some(path) => config::load_config_file(path, cwd),
        None => config::load_config(),
    };
    config.context("failed to load configuration")
}

fn project(
    config: &Config,
    name: &str,
    with_label: bool,
    contract_file: Option<PathBuf>,
) -> anyhow::Result<PipelineSummary> {
    let contract = match contract_file {
        Some(path) => load_contract_json(&path, name)
            .with_context(|| format!("failed to load contract from {}", path.display()))?,
        None => pipeline::configured_contract(config, name)?.clone(),
    };
    pipeline::run_project(config, &contract, with_label)
        .with_context(|| format!("projection onto '{}' failed", contract.name))
}

fn init_tracing(verbose: u8) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("formcast=info,warn")),
        1 => EnvFilter::new("formcast=debug,info"),
        _ => EnvFilter::new("formcast=trace,debug"),
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
