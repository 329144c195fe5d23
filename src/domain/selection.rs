//! Selection sets and their resolution against a document
//!
//! A [`SelectionSet`] is what the user picked. An [`EffectiveSelection`] is
//! what that means for one particular document: every layer implied by a
//! style, theme or group token is retained, and the allowed styles of each
//! layer are known. The effective selection is recomputed for every
//! transformation and never mutated afterwards, except to add suggested
//! relations before pruning.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::document::{GroupNode, ProjectDocument};
use super::token::{IdentifierResolver, TokenShape};

/// The user's selection. Absent keys deserialize as empty sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionSet {
    pub layers: BTreeSet<String>,
    pub layer_groups: BTreeSet<String>,
    /// `layer|style` tokens
    pub styles: BTreeSet<String>,
    pub themes: BTreeSet<String>,
    /// `theme|layer` tokens
    pub theme_layers: BTreeSet<String>,
    /// `theme|layer|style` tokens
    pub theme_styles: BTreeSet<String>,
    pub layouts: BTreeSet<String>,
    pub relations: BTreeSet<String>,
    /// `relation_child_field_x` / `relation_parent_field_y` tokens
    pub relation_fields: BTreeSet<String>,
    /// Invalidate local data sources of retained layers
    pub disconnect_local: bool,
}

impl SelectionSet {
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
            && self.layer_groups.is_empty()
            && self.styles.is_empty()
            && self.theme_layers.is_empty()
            && self.theme_styles.is_empty()
            && self.themes.is_empty()
            && self.layouts.is_empty()
    }
}

/// A selection resolved against one document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EffectiveSelection {
    pub layers: BTreeSet<String>,
    /// `(layer, style)` pairs picked explicitly
    pub styles: BTreeSet<(String, String)>,
    pub allowed_styles: BTreeMap<String, BTreeSet<String>>,
    pub themes: BTreeSet<String>,
    pub layouts: BTreeSet<String>,
    pub relations: BTreeSet<String>,
    pub relation_fields: BTreeSet<String>,
    pub disconnect_local: bool,
}

impl EffectiveSelection {
    pub fn resolve(document: &ProjectDocument, selection: &SelectionSet) -> Self {
        let resolver = IdentifierResolver::for_document(document);
        let mut effective = EffectiveSelection {
            layers: selection.layers.clone(),
            themes: selection.themes.clone(),
            layouts: selection.layouts.clone(),
            relations: selection.relations.clone(),
            relation_fields: selection.relation_fields.clone(),
            disconnect_local: selection.disconnect_local,
            ..Default::default()
        };

        if !selection.layer_groups.is_empty() {
            if let Some(tree) = document.group_tree() {
                for name in &selection.layer_groups {
                    let before = effective.layers.len();
                    expand_group(&tree, name, false, &mut effective.layers);
                    log::debug!(
                        "group '{}' added {} layer(s)",
                        name,
                        effective.layers.len() - before
                    );
                }
            }
        }

        let shapes = [
            (TokenShape::LayerStyle, &selection.styles),
            (TokenShape::ThemeLayer, &selection.theme_layers),
            (TokenShape::ThemeStyle, &selection.theme_styles),
        ];

        for (shape, tokens) in shapes {
            for raw in tokens {
                let Some(token) = resolver.resolve(shape, raw) else {
                    log::debug!("ignoring unresolved token '{}'", raw);
                    continue;
                };

                effective.layers.insert(token.layer.clone());
                if let Some(style) = token.style {
                    effective.allow_style(&token.layer, &style);
                }
                if shape != TokenShape::LayerStyle {
                    if let Some(theme) = token.theme {
                        effective.themes.insert(theme);
                    }
                }
            }
        }

        effective
    }

    fn allow_style(&mut self, layer: &str, style: &str) {
        self.styles.insert((layer.to_string(), style.to_string()));
        self.allowed_styles
            .entry(layer.to_string())
            .or_default()
            .insert(style.to_string());
    }

    pub fn retains_layer(&self, id: &str) -> bool {
        self.layers.contains(id)
    }

    /// Styles explicitly allowed for a layer; `None` keeps every style
    pub fn allowed_styles(&self, layer: &str) -> Option<&BTreeSet<String>> {
        self.allowed_styles.get(layer).filter(|s| !s.is_empty())
    }

    /// Whether a style survives on a retained layer
    pub fn allows_style(&self, layer: &str, style: &str) -> bool {
        self.allowed_styles(layer)
            .map_or(true, |allowed| allowed.contains(style))
    }

    pub fn include_relations<I: IntoIterator<Item = String>>(&mut self, names: I) {
        self.relations.extend(names);
    }
}

/// Adds every layer beneath each group named `name`
fn expand_group(node: &GroupNode, name: &str, inside: bool, out: &mut BTreeSet<String>) {
    match node {
        GroupNode::Layer { id, .. } => {
            if inside && !id.is_empty() {
                out.insert(id.clone());
            }
        }
        GroupNode::Group { name: group, children } => {
            let inside = inside || group == name;
            for child in children {
                expand_group(child, name, inside, out);
            }
        }
    }
}
