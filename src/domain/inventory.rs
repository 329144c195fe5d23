//! Selectable items of a project
//!
//! The inventory lists everything a selection set can name, each item with
//! the exact token the selection expects.

use serde::Serialize;

use super::document::{ProjectDocument, ProjectMetadata, DEFAULT_STYLE};
use super::selection::EffectiveSelection;
use super::token::{
    child_field_token, layer_style_token, parent_field_token, theme_layer_token, theme_style_token,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StyleItem {
    pub name: String,
    pub token: String,
    pub current: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerItem {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,
    pub fingerprint: String,
    pub styles: Vec<StyleItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThemeLayerItem {
    pub layer: String,
    pub style: Option<String>,
    pub token: String,
    pub style_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThemeItem {
    pub name: String,
    pub layers: Vec<ThemeLayerItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldItem {
    pub parent: String,
    pub child: String,
    pub parent_token: String,
    pub child_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationItem {
    pub name: String,
    pub parent_layer: String,
    pub child_layer: String,
    pub fields: Vec<FieldItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inventory {
    pub metadata: ProjectMetadata,
    pub layers: Vec<LayerItem>,
    pub groups: Vec<String>,
    pub themes: Vec<ThemeItem>,
    pub layouts: Vec<String>,
    pub relations: Vec<RelationItem>,
}

impl Inventory {
    pub fn from_document(document: &ProjectDocument) -> Self {
        let layers = document
            .layers()
            .into_iter()
            .map(|layer| {
                let fingerprint = layer.identity_key().fingerprint();
                let mut names = layer.styles.clone();
                if names.is_empty() {
                    names.push(DEFAULT_STYLE.to_string());
                }
                let current = layer.current_style.as_deref().unwrap_or(DEFAULT_STYLE);
                let styles = names
                    .into_iter()
                    .map(|name| StyleItem {
                        token: layer_style_token(&layer.id, &name),
                        current: name == current,
                        name,
                    })
                    .collect();

                LayerItem {
                    id: layer.id,
                    name: layer.name,
                    provider: layer.provider,
                    source: layer.data_source,
                    subset: layer.subset,
                    crs: layer.crs,
                    fingerprint,
                    styles,
                }
            })
            .collect();

        let groups = document
            .group_tree()
            .map(|tree| tree.group_names().into_iter().map(str::to_string).collect())
            .unwrap_or_default();

        let themes = document
            .themes()
            .into_iter()
            .map(|theme| ThemeItem {
                layers: theme
                    .entries
                    .into_iter()
                    .map(|entry| ThemeLayerItem {
                        token: theme_layer_token(&theme.name, &entry.layer_id),
                        style_token: theme_style_token(
                            &theme.name,
                            &entry.layer_id,
                            entry.style.as_deref().unwrap_or_default(),
                        ),
                        layer: entry.layer_id,
                        style: entry.style,
                    })
                    .collect(),
                name: theme.name,
            })
            .collect();

        let relations = document
            .relations()
            .into_iter()
            .map(|rel| RelationItem {
                fields: rel
                    .fields
                    .iter()
                    .map(|pair| FieldItem {
                        parent_token: parent_field_token(&rel.name, &pair.parent),
                        child_token: child_field_token(&rel.name, &pair.child),
                        parent: pair.parent.clone(),
                        child: pair.child.clone(),
                    })
                    .collect(),
                name: rel.name,
                parent_layer: rel.parent_layer,
                child_layer: rel.child_layer,
            })
            .collect();

        Self {
            metadata: document.metadata(),
            layers,
            groups,
            themes,
            layouts: document.layouts(),
            relations,
        }
    }
}

/// Relations whose two layers are retained but which are not selected yet
pub fn suggest_relations(document: &ProjectDocument, selection: &EffectiveSelection) -> Vec<String> {
    document
        .relations()
        .into_iter()
        .filter(|rel| {
            selection.retains_layer(&rel.parent_layer)
                && selection.retains_layer(&rel.child_layer)
                && !selection.relations.contains(&rel.name)
        })
        .map(|rel| rel.name)
        .collect()
}
