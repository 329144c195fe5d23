//! Auxiliary store CLI commands

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;

use super::output::Output;
use crate::storage::{AuxiliaryStore, Config};

#[derive(Subcommand)]
pub enum AuxCommands {
    /// List the tables of an auxiliary store
    Tables {
        /// Auxiliary store (.qgd)
        store: PathBuf,
    },

    /// Drop layer tables of layers not listed with --keep (in place)
    Prune {
        /// Auxiliary store (.qgd)
        store: PathBuf,

        /// Layer id whose table is kept (repeatable)
        #[arg(long, value_name = "ID")]
        keep: Vec<String>,

        /// Reclaim space afterwards (defaults to the configured setting)
        #[arg(long)]
        vacuum: bool,
    },
}

pub fn run(cmd: AuxCommands, output: &Output, config: &Config) -> Result<()> {
    match cmd {
        AuxCommands::Tables { store } => tables(output, store),
        AuxCommands::Prune { store, keep, vacuum } => {
            prune(output, store, keep, vacuum || config.auxiliary.vacuum)
        }
    }
}

fn open(path: &Path) -> Result<AuxiliaryStore> {
    AuxiliaryStore::open(path)
        .with_context(|| format!("Failed to open auxiliary store: {}", path.display()))
}

fn tables(output: &Output, path: PathBuf) -> Result<()> {
    let store = open(&path)?;
    let tables = store.tables()?;

    if output.is_json() {
        output.data(&tables);
        return Ok(());
    }

    println!("Auxiliary store: {}", store.path().display());
    println!("{:<32} {:<8} ROWS", "TABLE", "LAYER");
    println!("{}", "-".repeat(50));
    for table in &tables {
        println!(
            "{:<32} {:<8} {}",
            table.name,
            if table.layer_scoped { "yes" } else { "no" },
            table
                .rows
                .map(|rows| rows.to_string())
                .unwrap_or_else(|| "?".to_string())
        );
    }

    Ok(())
}

fn prune(output: &Output, path: PathBuf, keep: Vec<String>, vacuum: bool) -> Result<()> {
    let store = open(&path)?;
    let retained: BTreeSet<String> = keep.into_iter().collect();
    output.verbose_ctx("aux", &format!("keeping {:?}", retained));

    let summary = store.prune(&retained);
    if vacuum {
        store.vacuum().context("Failed to vacuum auxiliary store")?;
    }

    if output.is_json() {
        output.data(&summary);
    } else {
        output.success(&format!(
            "Dropped {} table(s), kept {}, preserved {}",
            summary.dropped.len(),
            summary.kept.len(),
            summary.preserved.len()
        ));
        output.warnings(&summary.failures);
    }

    Ok(())
}
