//! Extract and merge commands

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::output::Output;
use crate::domain::SelectionSet;
use crate::storage::{self, Config, ExportReport, PipelineOptions};

/// Selection and output arguments shared by extract and merge
pub struct Request {
    pub selection: Option<PathBuf>,
    pub layers: Vec<String>,
    pub output: PathBuf,
    pub auto_relations: bool,
    pub disconnect_local: bool,
}

impl Request {
    fn selection(&self) -> Result<SelectionSet> {
        let mut selection = match &self.selection {
            Some(path) => load_selection(path)?,
            None => SelectionSet::default(),
        };
        selection.layers.extend(self.layers.iter().cloned());

        if selection.is_empty() {
            anyhow::bail!("Nothing selected. Pass --selection <file> or --layer <id>.");
        }
        Ok(selection)
    }

    fn options(&self, config: &Config) -> PipelineOptions {
        let mut options = PipelineOptions::from_config(config);
        options.auto_relations = self.auto_relations;
        options.disconnect_local = self.disconnect_local;
        options
    }
}

/// Reads a selection file, TOML when the extension says so, JSON otherwise
pub fn load_selection(path: &Path) -> Result<SelectionSet> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read selection: {}", path.display()))?;

    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse selection: {}", path.display()))
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse selection: {}", path.display()))
    }
}

pub fn extract(output: &Output, config: &Config, project: &Path, request: Request) -> Result<()> {
    let selection = request.selection()?;
    output.verbose_ctx(
        "extract",
        &format!(
            "{} layer(s), {} style token(s), {} theme token(s)",
            selection.layers.len(),
            selection.styles.len(),
            selection.theme_layers.len() + selection.theme_styles.len()
        ),
    );

    let report = storage::extract(project, &selection, &request.output, &request.options(config))?;

    report_result(
        output,
        &report,
        &format!(
            "Extracted {} layer(s) to {}",
            report.retained_layers.len(),
            report.output.display()
        ),
    );

    if !request.auto_relations && !report.relations_suggested.is_empty() && !output.is_json() {
        println!(
            "Hint: relations between selected layers were left out: {} (use --auto-relations)",
            report.relations_suggested.join(", ")
        );
    }
    Ok(())
}

pub fn merge(output: &Output, config: &Config, base: &Path, incoming: &Path, request: Request) -> Result<()> {
    let selection = request.selection()?;
    output.verbose_ctx(
        "merge",
        &format!("merging {} into {}", incoming.display(), base.display()),
    );

    let report =
        storage::merge_into(base, incoming, &selection, &request.output, &request.options(config))?;

    for matched in &report.matched_layers {
        output.verbose_ctx(
            "merge",
            &format!("'{}' matches existing layer '{}'", matched.incoming, matched.base),
        );
    }

    report_result(
        output,
        &report,
        &format!(
            "Merged into {}: {} new layer(s), {} existing layer(s) reused, {} style(s) added",
            report.output.display(),
            report.added_layers.len(),
            report.matched_layers.len(),
            report.styles_added.len()
        ),
    );
    Ok(())
}

fn report_result(output: &Output, report: &ExportReport, message: &str) {
    if output.is_json() {
        output.data(report);
        return;
    }

    output.success(message);
    if !report.disconnected.is_empty() {
        println!("Disconnected sources: {}", report.disconnected.join(", "));
    }
    if !report.auxiliary_dropped.is_empty() {
        println!(
            "Auxiliary tables dropped: {}",
            report.auxiliary_dropped.join(", ")
        );
    }
    if !report.passthrough.is_empty() {
        output.verbose_ctx("package", &format!("passthrough: {}", report.passthrough.join(", ")));
    }
    output.warnings(&report.warnings);
}
