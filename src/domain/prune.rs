//! Selection-driven pruning
//!
//! Removes everything an [`EffectiveSelection`] does not retain while keeping
//! every remaining layer reference resolvable. Each section is pruned on its
//! own; a section missing from the document is simply skipped.

use std::collections::BTreeSet;

use serde::Serialize;

use super::document::{
    layer_id, layout_elements, remove_section, section_mut, style_manager_mut, style_name,
    ProjectDocument, CUSTOM_ORDER, FIELD_REF, LAYER_ORDER, LAYER_TREE_GROUP, LAYER_TREE_LAYER,
    LAYOUT, LAYOUTS, MAP_LAYER, PROJECT_LAYERS, RELATION, RELATIONS, STYLE, THEME, THEMES,
};
use super::selection::EffectiveSelection;
use super::token::{child_field_token, parent_field_token};
use super::xml::{Element, Node};

/// What a pruning pass removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneSummary {
    pub retained_layers: Vec<String>,
    pub layers_removed: usize,
    pub styles_removed: usize,
    pub themes_removed: usize,
    pub layouts_removed: usize,
    pub relations_removed: usize,
    pub warnings: Vec<String>,
}

/// Prunes a copy of `document`; the original is left untouched
pub fn prune(document: &ProjectDocument, selection: &EffectiveSelection) -> (ProjectDocument, PruneSummary) {
    let mut pruned = document.clone();
    let summary = prune_in_place(&mut pruned, selection);
    (pruned, summary)
}

pub fn prune_in_place(document: &mut ProjectDocument, selection: &EffectiveSelection) -> PruneSummary {
    let known = document.layer_ids();
    let retained: BTreeSet<String> = known
        .iter()
        .filter(|id| selection.retains_layer(id))
        .cloned()
        .collect();
    let dropped: BTreeSet<String> = known.difference(&retained).cloned().collect();

    let mut summary = PruneSummary {
        retained_layers: retained.iter().cloned().collect(),
        ..Default::default()
    };

    let root = document.root_mut();
    summary.layers_removed = prune_layers(root, &retained);
    prune_group_tree(root, &retained);
    prune_styles(root, selection, &mut summary);
    summary.themes_removed = prune_themes(root, selection, &retained, &dropped);
    summary.layouts_removed = prune_layouts(root, &selection.layouts);
    summary.relations_removed = prune_relations(root, selection, &retained);

    log::debug!(
        "pruned {} layer(s), {} style(s), {} theme(s), {} layout(s), {} relation(s)",
        summary.layers_removed,
        summary.styles_removed,
        summary.themes_removed,
        summary.layouts_removed,
        summary.relations_removed
    );
    summary
}

fn prune_layers(root: &mut Element, retained: &BTreeSet<String>) -> usize {
    let removed = root.remove_descendants(&mut |el| {
        el.is(MAP_LAYER) && layer_id(el).is_some_and(|id| !retained.contains(&id))
    });

    if let Some(listing) = section_mut(root, PROJECT_LAYERS) {
        listing.retain_children(|el| {
            !el.is("layer") || layer_id(el).map_or(true, |id| retained.contains(&id))
        });
    }

    if let Some(order) = section_mut(root, LAYER_ORDER) {
        order.retain_children(|el| el.attr("id").map_or(true, |id| retained.contains(id)));
    }

    removed
}

fn prune_group_tree(root: &mut Element, retained: &BTreeSet<String>) {
    if let Some(tree) = section_mut(root, LAYER_TREE_GROUP) {
        // The root group stays even when empty
        prune_group(tree, retained);
    }
}

/// Post-order pass; returns whether the group still holds anything
fn prune_group(group: &mut Element, retained: &BTreeSet<String>) -> bool {
    group.children.retain_mut(|node| match node {
        Node::Element(el) if el.is(LAYER_TREE_LAYER) => {
            el.attr("id").is_some_and(|id| retained.contains(id))
        }
        Node::Element(el) if el.is(LAYER_TREE_GROUP) => prune_group(el, retained),
        _ => true,
    });

    if let Some(order) = group.child_mut(CUSTOM_ORDER) {
        order.retain_children(|item| !item.is("item") || retained.contains(item.text().trim()));
    }

    group
        .children()
        .any(|c| c.is(LAYER_TREE_LAYER) || c.is(LAYER_TREE_GROUP))
}

fn prune_styles(root: &mut Element, selection: &EffectiveSelection, summary: &mut PruneSummary) {
    root.visit_mut(MAP_LAYER, &mut |layer| {
        let Some(id) = layer_id(layer) else {
            return;
        };
        let Some(allowed) = selection.allowed_styles(&id) else {
            return;
        };
        let Some(manager) = style_manager_mut(layer) else {
            return;
        };

        summary.styles_removed +=
            manager.retain_children(|s| !s.is(STYLE) || allowed.contains(style_name(s)));

        let remaining: Vec<String> = manager
            .children()
            .filter(|s| s.is(STYLE))
            .map(|s| style_name(s).to_string())
            .collect();

        match remaining.first() {
            None => {
                let message = format!(
                    "layer '{}' has no style left after pruning (selected: {})",
                    id,
                    allowed.iter().cloned().collect::<Vec<_>>().join(", ")
                );
                log::warn!("{}", message);
                summary.warnings.push(message);
            }
            Some(first) => {
                let current = manager.attr("current").unwrap_or_default();
                if !remaining.iter().any(|name| name == current) {
                    log::debug!("layer '{}': current style '{}' -> '{}'", id, current, first);
                    manager.set_attr("current", first.as_str());
                }
            }
        }
    });
}

fn prune_themes(
    root: &mut Element,
    selection: &EffectiveSelection,
    retained: &BTreeSet<String>,
    dropped: &BTreeSet<String>,
) -> usize {
    if selection.themes.is_empty() {
        let count = section_mut(root, THEMES)
            .map(|presets| presets.children().filter(|p| p.is(THEME)).count())
            .unwrap_or(0);
        remove_section(root, THEMES);
        return count;
    }

    let Some(presets) = section_mut(root, THEMES) else {
        return 0;
    };

    let removed = presets.retain_children(|preset| {
        !preset.is(THEME) || preset.attr("name").is_some_and(|name| selection.themes.contains(name))
    });

    for preset in presets.children_mut().filter(|p| p.is(THEME)) {
        preset.retain_children(|entry| {
            if !entry.is("layer") {
                return true;
            }
            let Some(id) = entry.attr("id") else {
                return true;
            };
            if !retained.contains(id) {
                return false;
            }
            match entry.attr("style").filter(|s| !s.is_empty()) {
                Some(style) => selection.allows_style(id, style),
                None => true,
            }
        });

        // Legend node state of pruned layers
        preset.remove_descendants(&mut |el| {
            !el.is("layer") && el.attr("id").is_some_and(|id| dropped.contains(id))
        });
    }

    removed
}

fn prune_layouts(root: &mut Element, keep: &BTreeSet<String>) -> usize {
    let before = layout_elements(root).count();
    let wanted = |layout: &Element| {
        !layout.is(LAYOUT)
            || layout
                .attr("name")
                .is_some_and(|name| keep.contains(name.trim()))
    };

    root.retain_children(wanted);
    // Containers are kept even when emptied
    root.visit_mut(LAYOUTS, &mut |container| {
        container.retain_children(wanted);
    });

    before - layout_elements(root).count()
}

fn prune_relations(
    root: &mut Element,
    selection: &EffectiveSelection,
    retained: &BTreeSet<String>,
) -> usize {
    if selection.relations.is_empty() {
        let count = section_mut(root, RELATIONS)
            .map(|s| s.children().filter(|r| r.is(RELATION)).count())
            .unwrap_or(0);
        remove_section(root, RELATIONS);
        return count;
    }

    let Some(relations) = section_mut(root, RELATIONS) else {
        return 0;
    };

    let removed = relations.retain_children(|rel| {
        if !rel.is(RELATION) {
            return true;
        }
        let named = rel
            .attr("name")
            .is_some_and(|name| selection.relations.contains(name));
        let endpoints_kept = ["referencingLayer", "referencedLayer"]
            .iter()
            .all(|key| rel.attr(key).is_some_and(|id| retained.contains(id)));
        if named && !endpoints_kept {
            log::debug!(
                "dropping relation '{}': an endpoint layer is not retained",
                rel.attr("name").unwrap_or_default()
            );
        }
        named && endpoints_kept
    });

    if !selection.relation_fields.is_empty() {
        let fields = &selection.relation_fields;
        for rel in relations.children_mut().filter(|r| r.is(RELATION)) {
            let name = rel.attr("name").unwrap_or_default().to_string();
            rel.retain_children(|field| {
                if !field.is(FIELD_REF) {
                    return true;
                }
                let child = field.attr("referencingField").unwrap_or_default();
                let parent = field.attr("referencedField").unwrap_or_default();
                fields.contains(&child_field_token(&name, child))
                    && fields.contains(&parent_field_token(&name, parent))
            });
        }
    }

    removed
}
