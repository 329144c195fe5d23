//! Inspect and validate commands
//!
//! `inspect` prints every selectable item with the token a selection file
//! expects for it.

use std::path::Path;

use anyhow::{Context, Result};

use super::output::Output;
use crate::domain::Inventory;
use crate::storage::{LoadedProject, ProjectSource};

fn load(output: &Output, path: &Path) -> Result<LoadedProject> {
    let project = LoadedProject::open(path)
        .with_context(|| format!("Failed to load project: {}", path.display()))?;

    match &project.source {
        ProjectSource::Archive {
            document_member,
            auxiliary_member,
            ..
        } => output.verbose_ctx(
            "load",
            &format!("archive member '{}', auxiliary {:?}", document_member, auxiliary_member),
        ),
        ProjectSource::Plain { auxiliary, .. } => {
            output.verbose_ctx("load", &format!("plain document, auxiliary {:?}", auxiliary))
        }
    }
    Ok(project)
}

pub fn inspect(output: &Output, path: &Path) -> Result<()> {
    let project = load(output, path)?;
    let inventory = Inventory::from_document(&project.document);

    if output.is_json() {
        output.data(&inventory);
        return Ok(());
    }

    let meta = &inventory.metadata;
    println!(
        "Project: {}",
        meta.title.as_deref().or(meta.name.as_deref()).unwrap_or("(untitled)")
    );
    if let Some(author) = &meta.author {
        println!("Author: {}", author);
    }
    if let Some(version) = &meta.version {
        println!("QGIS version: {}", version);
    }
    if let (Some(at), Some(by)) = (&meta.saved_at, &meta.saved_by) {
        println!("Saved: {} by {}", at, by);
    }

    output.heading(&format!("Layers ({})", inventory.layers.len()));
    println!("{:<24} {:<20} {:<12} KEY", "ID", "NAME", "PROVIDER");
    println!("{}", "-".repeat(72));
    for layer in &inventory.layers {
        println!(
            "{:<24} {:<20} {:<12} {}",
            layer.id, layer.name, layer.provider, layer.fingerprint
        );
        for style in &layer.styles {
            let marker = if style.current { "*" } else { " " };
            println!("  {} {}", marker, style.token);
        }
    }

    if !inventory.groups.is_empty() {
        output.heading("Groups");
        for group in &inventory.groups {
            output.item(1, group);
        }
    }

    if !inventory.themes.is_empty() {
        output.heading("Themes");
        for theme in &inventory.themes {
            output.item(1, &theme.name);
            for layer in &theme.layers {
                let token = if layer.style.is_some() {
                    &layer.style_token
                } else {
                    &layer.token
                };
                output.item(2, token);
            }
        }
    }

    if !inventory.layouts.is_empty() {
        output.heading("Layouts");
        for layout in &inventory.layouts {
            output.item(1, layout);
        }
    }

    if !inventory.relations.is_empty() {
        output.heading("Relations");
        for relation in &inventory.relations {
            println!(
                "  {} ({} -> {})",
                relation.name, relation.parent_layer, relation.child_layer
            );
            for field in &relation.fields {
                println!("    {}  {}", field.parent_token, field.child_token);
            }
        }
    }

    Ok(())
}

pub fn validate(output: &Output, path: &Path) -> Result<()> {
    let project = load(output, path)?;
    let issues = project.document.integrity_issues();
    output.verbose_ctx(
        "validate",
        &format!("{} layer(s) checked", project.document.layer_ids().len()),
    );

    if output.is_json() {
        output.data(&serde_json::json!({
            "valid": issues.is_empty(),
            "issues": issues,
        }));
    } else if issues.is_empty() {
        output.success(&format!("{}: all layer references resolve", path.display()));
    } else {
        for issue in &issues {
            println!("  {}", issue);
        }
    }

    if !issues.is_empty() {
        anyhow::bail!("{} integrity issue(s) found", issues.len());
    }
    Ok(())
}
