//! Main CLI application structure

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use super::output::{Output, OutputFormat};
use super::{aux_cmd, inspect, layouts_cmd, transform};
use crate::storage::Config;

#[derive(Parser)]
#[command(name = "qrator")]
#[command(author, version, about = "Extract, prune and merge subsets of QGIS projects")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format (defaults to the configured format)
    #[arg(long, short = 'f', global = true)]
    pub format: Option<OutputFormat>,

    /// Enable verbose output for debugging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true, env = "QRATOR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List layers, styles, groups, themes, layouts and relations with their selection tokens
    Inspect {
        /// Project archive (.qgz) or document (.qgs)
        project: PathBuf,
    },

    /// Check that every layer reference resolves
    Validate {
        /// Project archive (.qgz) or document (.qgs)
        project: PathBuf,
    },

    /// Write a pruned copy of a project
    Extract {
        /// Project archive (.qgz) or document (.qgs)
        project: PathBuf,

        /// Selection file (JSON, or TOML with a .toml extension)
        #[arg(long, short)]
        selection: Option<PathBuf>,

        /// Additional layer id to keep (repeatable)
        #[arg(long = "layer", value_name = "ID")]
        layers: Vec<String>,

        /// Output archive
        #[arg(long, short)]
        output: PathBuf,

        /// Include relations between selected layers
        #[arg(long)]
        auto_relations: bool,

        /// Point local data sources at a placeholder directory
        #[arg(long)]
        disconnect_local: bool,
    },

    /// Merge the selected part of a project into another one
    Merge {
        /// Project receiving the layers
        base: PathBuf,

        /// Project providing the layers
        incoming: PathBuf,

        /// Selection file applied to the incoming project
        #[arg(long, short)]
        selection: Option<PathBuf>,

        /// Additional incoming layer id to merge (repeatable)
        #[arg(long = "layer", value_name = "ID")]
        layers: Vec<String>,

        /// Output archive
        #[arg(long, short)]
        output: PathBuf,

        /// Include relations between selected layers
        #[arg(long)]
        auto_relations: bool,

        /// Point local data sources of new layers at a placeholder directory
        #[arg(long)]
        disconnect_local: bool,
    },

    /// Inspect and prune auxiliary stores (.qgd)
    #[command(subcommand)]
    Aux(aux_cmd::AuxCommands),

    /// Export print layouts through the layout worker
    #[command(subcommand)]
    Layouts(layouts_cmd::LayoutCommands),
}

/// Main entry point for the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;
    let format = cli.format.unwrap_or_else(|| config.default_format.into());
    let output = Output::new(format, cli.verbose);

    if let Some(path) = &cli.config {
        output.verbose_ctx("config", &format!("loaded {}", path.display()));
    }

    match cli.command {
        Commands::Inspect { project } => inspect::inspect(&output, &project)?,
        Commands::Validate { project } => inspect::validate(&output, &project)?,

        Commands::Extract {
            project,
            selection,
            layers,
            output: target,
            auto_relations,
            disconnect_local,
        } => {
            let request = transform::Request {
                selection,
                layers,
                output: target,
                auto_relations,
                disconnect_local,
            };
            transform::extract(&output, &config, &project, request)?
        }

        Commands::Merge {
            base,
            incoming,
            selection,
            layers,
            output: target,
            auto_relations,
            disconnect_local,
        } => {
            let request = transform::Request {
                selection,
                layers,
                output: target,
                auto_relations,
                disconnect_local,
            };
            transform::merge(&output, &config, &base, &incoming, request)?
        }

        Commands::Aux(cmd) => aux_cmd::run(cmd, &output, &config)?,
        Commands::Layouts(cmd) => layouts_cmd::run(cmd, &output, &config)?,
    }

    Ok(())
}

/// `--verbose` raises the default filter to debug; `RUST_LOG` wins
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .try_init();
}
