//! Layout CLI commands

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;

use super::output::Output;
use crate::domain::{ExportFormat, ExportItem, ExportJob};
use crate::storage::{Config, LayoutExportWorker, LoadedProject};

#[derive(Subcommand)]
pub enum LayoutCommands {
    /// List the print layouts of a project
    List {
        /// Project archive (.qgz) or document (.qgs)
        project: PathBuf,
    },

    /// Render layouts to PDF or PNG with the configured worker
    Export {
        /// Project archive (.qgz) or document (.qgs)
        project: PathBuf,

        /// Target format (pdf or png)
        #[arg(long, default_value = "pdf")]
        export_format: ExportFormat,

        /// Resolution (defaults to the configured dpi)
        #[arg(long)]
        dpi: Option<u32>,

        /// Layout and output file as NAME=PATH (repeatable)
        #[arg(long = "item", value_name = "NAME=PATH", required = true)]
        items: Vec<ExportItem>,

        /// Worker program (defaults to the configured one)
        #[arg(long)]
        worker: Option<String>,
    },
}

pub fn run(cmd: LayoutCommands, output: &Output, config: &Config) -> Result<()> {
    match cmd {
        LayoutCommands::List { project } => list(output, project),
        LayoutCommands::Export {
            project,
            export_format,
            dpi,
            items,
            worker,
        } => export(output, config, project, export_format, dpi, items, worker),
    }
}

fn list(output: &Output, path: PathBuf) -> Result<()> {
    let project = LoadedProject::open(&path)
        .with_context(|| format!("Failed to load project: {}", path.display()))?;
    let layouts = project.document.layouts();

    if output.is_json() {
        output.data(&layouts);
    } else if layouts.is_empty() {
        println!("No layouts in {}", path.display());
    } else {
        for layout in &layouts {
            println!("{}", layout);
        }
    }
    Ok(())
}

fn export(
    output: &Output,
    config: &Config,
    path: PathBuf,
    format: ExportFormat,
    dpi: Option<u32>,
    items: Vec<ExportItem>,
    worker: Option<String>,
) -> Result<()> {
    let program = worker
        .or_else(|| config.worker.program.clone())
        .context("No layout worker configured. Set [worker] program in the config or pass --worker.")?;

    let project = LoadedProject::open(&path)
        .with_context(|| format!("Failed to load project: {}", path.display()))?;
    let known = project.document.layouts();
    if let Some(missing) = items.iter().find(|item| !known.contains(&item.layout_name)) {
        anyhow::bail!(
            "Layout '{}' not found in {} (available: {})",
            missing.layout_name,
            path.display(),
            known.join(", ")
        );
    }

    let project_path = path
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", path.display()))?;
    let job = ExportJob {
        project_path,
        prefix: config.worker.prefix.clone(),
        format,
        dpi: dpi.unwrap_or(config.worker.dpi),
        items,
    };
    output.verbose_ctx(
        "layouts",
        &format!("{} item(s) as {} at {} dpi via {}", job.items.len(), job.format, job.dpi, program),
    );

    let outcome = LayoutExportWorker::new(program, config.worker.args.clone())
        .run(&job)
        .context("Layout export failed")?;

    if output.is_json() {
        output.data(&outcome);
    } else {
        for result in &outcome.results {
            if result.ok {
                println!("{} -> {}", result.layout_name, result.out_path);
            } else {
                println!("{} FAILED: {}", result.layout_name, result.error);
            }
        }
    }

    let failed = outcome.failures().count();
    if failed > 0 {
        anyhow::bail!("{} layout(s) failed to export", failed);
    }
    Ok(())
}
