//! Extraction and merge workflows
//!
//! Ties loading, selection, pruning, merging and packaging together. Only
//! failures on the primary document are errors; everything else ends up in
//! [`ExportReport::warnings`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Local;
use serde::Serialize;

use super::archive::{ArchiveLayout, ArchiveWriter, PackageReport};
use super::config::Config;
use super::loader::LoadedProject;
use crate::domain::{
    merge_documents, prune, suggest_relations, AddedLayer, EffectiveSelection, LayerMatch,
    ProjectDocument, PruneSummary, SelectionSet, SourcePolicy,
};

/// Settings shared by both workflows
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub archive: ArchiveLayout,
    pub vacuum: bool,
    pub sources: SourcePolicy,
    /// Recorded as `saveUser`
    pub user: String,
    /// Include relations between selected layers
    pub auto_relations: bool,
    /// Disconnect local sources even when the selection does not ask for it
    pub disconnect_local: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            archive: config.archive.clone(),
            vacuum: config.auxiliary.vacuum,
            sources: config.sources.policy(),
            user: config.effective_user(),
            auto_relations: false,
            disconnect_local: false,
        }
    }

    fn writer(&self) -> ArchiveWriter {
        ArchiveWriter::new(self.archive.clone()).with_vacuum(self.vacuum)
    }
}

/// What a workflow wrote
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportReport {
    pub output: PathBuf,
    pub retained_layers: Vec<String>,
    pub matched_layers: Vec<LayerMatch>,
    pub added_layers: Vec<AddedLayer>,
    pub styles_added: Vec<String>,
    pub relations_suggested: Vec<String>,
    pub disconnected: Vec<String>,
    pub prune: PruneSummary,
    pub auxiliary_dropped: Vec<String>,
    pub passthrough: Vec<String>,
    pub warnings: Vec<String>,
}

impl ExportReport {
    fn absorb_package(&mut self, package: PackageReport) {
        self.output = package.output;
        if let Some(auxiliary) = package.auxiliary {
            self.auxiliary_dropped = auxiliary.dropped;
        }
        self.passthrough = package.passthrough;
        self.warnings.extend(package.warnings);
    }
}

/// Resolves and prunes `document`, optionally adding suggested relations
fn filter(
    document: &ProjectDocument,
    selection: &SelectionSet,
    options: &PipelineOptions,
    report: &mut ExportReport,
) -> (ProjectDocument, EffectiveSelection) {
    let mut effective = EffectiveSelection::resolve(document, selection);

    let suggested = suggest_relations(document, &effective);
    if options.auto_relations && !suggested.is_empty() {
        log::debug!("including suggested relations {:?}", suggested);
        effective.include_relations(suggested.iter().cloned());
    }
    report.relations_suggested = suggested;

    let (pruned, summary) = prune(document, &effective);
    report.warnings.extend(summary.warnings.iter().cloned());
    report.prune = summary;
    (pruned, effective)
}

/// Refuses a pruned document with no layer, theme or layout left. A
/// document holding only themes or layouts is kept with a warning.
fn ensure_retained(document: &ProjectDocument, source: &Path, report: &mut ExportReport) -> Result<()> {
    if !report.prune.retained_layers.is_empty() {
        return Ok(());
    }
    let themes = document.themes().len();
    let layouts = document.layouts().len();
    if themes == 0 && layouts == 0 {
        bail!(
            "Selection retains nothing of {}: no layer, theme or layout matched",
            source.display()
        );
    }

    let message = format!(
        "no layer retained from {}; keeping {} theme(s) and {} layout(s)",
        source.display(),
        themes,
        layouts
    );
    log::warn!("{}", message);
    report.warnings.push(message);
    Ok(())
}

/// Writes a pruned copy of `source` to `output`
pub fn extract(
    source: &Path,
    selection: &SelectionSet,
    output: &Path,
    options: &PipelineOptions,
) -> Result<ExportReport> {
    let project = LoadedProject::open(source)
        .with_context(|| format!("Failed to load project: {}", source.display()))?;
    let mut report = ExportReport::default();

    let (mut document, effective) = filter(&project.document, selection, options, &mut report);
    ensure_retained(&document, source, &mut report)?;
    report.retained_layers = report.prune.retained_layers.clone();

    if options.disconnect_local || effective.disconnect_local {
        report.disconnected = options.sources.disconnect_layers(&mut document, None);
    }

    document.stamp_saved(&options.user, Local::now().naive_local());

    let package = options
        .writer()
        .write(&document, output, Some(&project.source))
        .with_context(|| format!("Failed to write archive: {}", output.display()))?;
    report.absorb_package(package);

    log::info!(
        "extracted {} layer(s) from {} into {}",
        report.retained_layers.len(),
        source.display(),
        output.display()
    );
    Ok(report)
}

/// Merges the selected part of `incoming` into `base`, writing `output`
///
/// The base project provides the auxiliary store and passthrough members.
pub fn merge_into(
    base: &Path,
    incoming: &Path,
    selection: &SelectionSet,
    output: &Path,
    options: &PipelineOptions,
) -> Result<ExportReport> {
    let base_project = LoadedProject::open(base)
        .with_context(|| format!("Failed to load base project: {}", base.display()))?;
    let incoming_project = LoadedProject::open(incoming)
        .with_context(|| format!("Failed to load incoming project: {}", incoming.display()))?;
    let mut report = ExportReport::default();

    let (filtered, effective) = filter(&incoming_project.document, selection, options, &mut report);
    ensure_retained(&filtered, incoming, &mut report)?;

    let merged = merge_documents(&base_project.document, &filtered);
    let mut document = merged.document;
    let summary = merged.summary;

    if options.disconnect_local || effective.disconnect_local {
        let added: BTreeSet<String> = summary.added.iter().map(|a| a.id.clone()).collect();
        report.disconnected = options.sources.disconnect_layers(&mut document, Some(&added));
    }

    for skipped in &summary.layouts_skipped {
        report
            .warnings
            .push(format!("layout '{}' already exists in base", skipped));
    }
    for skipped in &summary.relations_skipped {
        report
            .warnings
            .push(format!("relation '{}' already exists in base", skipped));
    }

    report.retained_layers = document.layer_ids().into_iter().collect();
    report.matched_layers = summary.matched;
    report.added_layers = summary.added;
    report.styles_added = summary.styles_added;

    document.stamp_saved(&options.user, Local::now().naive_local());

    let package = options
        .writer()
        .write(&document, output, Some(&base_project.source))
        .with_context(|| format!("Failed to write archive: {}", output.display()))?;
    report.absorb_package(package);

    log::info!(
        "merged {} new and {} matching layer(s) into {}",
        report.added_layers.len(),
        report.matched_layers.len(),
        output.display()
    );
    Ok(report)
}
