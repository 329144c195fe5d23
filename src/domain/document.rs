//! Project document model
//!
//! [`ProjectDocument`] owns the parsed XML tree of a QGIS project and exposes
//! typed read-only views (layers, group tree, themes, layouts, relations).
//! Mutation goes through the tree itself so that unrelated settings survive
//! pruning and merging untouched.

use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;

use super::xml::{Element, XmlDocument, XmlError};

/// Section element names
pub(crate) const LAYER_TREE_GROUP: &str = "layer-tree-group";
pub(crate) const LAYER_TREE_LAYER: &str = "layer-tree-layer";
pub(crate) const PROJECT_LAYERS: &str = "projectlayers";
pub(crate) const MAP_LAYER: &str = "maplayer";
pub(crate) const LAYER_ORDER: &str = "layerorder";
pub(crate) const CUSTOM_ORDER: &str = "custom-order";
pub(crate) const THEMES: &str = "visibility-presets";
pub(crate) const THEME: &str = "visibility-preset";
pub(crate) const LAYOUTS: &str = "layouts";
pub(crate) const LAYOUT: &str = "layout";
pub(crate) const RELATIONS: &str = "relations";
pub(crate) const RELATION: &str = "relation";
pub(crate) const FIELD_REF: &str = "fieldRef";
pub(crate) const STYLE: &str = "map-layer-style";

/// Style names written when a style entry carries no name
pub const DEFAULT_STYLE: &str = "default";

const SAVE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Project-level metadata from the root element
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectMetadata {
    pub name: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub version: Option<String>,
    pub saved_at: Option<String>,
    pub saved_by: Option<String>,
}

/// Content identity of a layer: provider, data source and subset filter,
/// lower-cased and trimmed.
///
/// Two layers with equal keys are the same real-world layer, whatever their
/// document-local ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IdentityKey {
    pub provider: String,
    pub source: String,
    pub subset: String,
}

impl IdentityKey {
    pub fn new(provider: &str, source: &str, subset: Option<&str>) -> Self {
        let normalize = |s: &str| s.trim().to_lowercase();
        Self {
            provider: normalize(provider),
            source: normalize(source),
            subset: subset.map(normalize).unwrap_or_default(),
        }
    }

    /// Short stable digest of the key, for display
    pub fn fingerprint(&self) -> String {
        let input = format!("{}\u{1f}{}\u{1f}{}", self.provider, self.source, self.subset);
        let hash = blake3::hash(input.as_bytes());
        hash.to_hex()[..12].to_string()
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.subset.is_empty() {
            write!(f, "{}:{}", self.provider, self.source)
        } else {
            write!(f, "{}:{} [{}]", self.provider, self.source, self.subset)
        }
    }
}

/// A `maplayer` definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerDefinition {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub data_source: String,
    pub subset: Option<String>,
    pub crs: Option<String>,
    /// Style variant names in document order
    pub styles: Vec<String>,
    pub current_style: Option<String>,
}

impl LayerDefinition {
    /// Reads a `maplayer` element; `None` when it carries no id
    pub fn from_element(element: &Element) -> Option<Self> {
        let id = layer_id(element)?;
        let raw_source = element.child_text("datasource").unwrap_or_default();
        let (data_source, inline_subset) = split_subset(&raw_source);
        let subset = element
            .child_text("subset")
            .filter(|s| !s.is_empty())
            .or_else(|| inline_subset.map(str::to_string));

        let manager = style_manager(element);
        let styles = manager
            .map(|m| m.children().filter(|s| s.is(STYLE)).map(|s| style_name(s).to_string()).collect())
            .unwrap_or_default();
        let current_style = manager
            .and_then(|m| m.attr("current"))
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Some(Self {
            name: element.child_text("layername").unwrap_or_else(|| id.clone()),
            provider: element.child_text("provider").unwrap_or_default(),
            data_source: data_source.to_string(),
            subset,
            crs: element
                .child("srs")
                .and_then(|srs| srs.find("authid"))
                .map(|a| a.text().trim().to_string())
                .filter(|s| !s.is_empty()),
            styles,
            current_style,
            id,
        })
    }

    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::new(&self.provider, &self.data_source, self.subset.as_deref())
    }
}

/// Splits an inline `|subset=` suffix off a data source string
pub fn split_subset(source: &str) -> (&str, Option<&str>) {
    match source.find("|subset=") {
        Some(pos) => (&source[..pos], Some(&source[pos + "|subset=".len()..])),
        None => (source, None),
    }
}

/// A node of the layer group tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GroupNode {
    Group { name: String, children: Vec<GroupNode> },
    Layer { id: String, name: String },
}

impl GroupNode {
    fn from_element(element: &Element) -> Option<Self> {
        if element.is(LAYER_TREE_LAYER) {
            return Some(GroupNode::Layer {
                id: element.attr("id").unwrap_or_default().to_string(),
                name: element.attr("name").unwrap_or_default().to_string(),
            });
        }
        if element.is(LAYER_TREE_GROUP) {
            return Some(GroupNode::Group {
                name: element.attr("name").unwrap_or_default().to_string(),
                children: element.children().filter_map(GroupNode::from_element).collect(),
            });
        }
        None
    }

    /// Layer ids referenced anywhere beneath this node
    pub fn layer_ids(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_layer_ids(&mut out);
        out
    }

    fn collect_layer_ids<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            GroupNode::Layer { id, .. } => out.push(id),
            GroupNode::Group { children, .. } => {
                for child in children {
                    child.collect_layer_ids(out);
                }
            }
        }
    }

    /// Names of all groups beneath (and including) this node
    pub fn group_names(&self) -> Vec<&str> {
        let mut out = Vec::new();
        if let GroupNode::Group { name, children } = self {
            if !name.is_empty() {
                out.push(name.as_str());
            }
            for child in children {
                out.extend(child.group_names());
            }
        }
        out
    }

    /// Finds the first group with the given name, depth-first
    pub fn find_group(&self, wanted: &str) -> Option<&GroupNode> {
        match self {
            GroupNode::Group { name, children } => {
                if name == wanted {
                    return Some(self);
                }
                children.iter().find_map(|c| c.find_group(wanted))
            }
            GroupNode::Layer { .. } => None,
        }
    }
}

/// A visibility preset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Theme {
    pub name: String,
    pub entries: Vec<ThemeEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThemeEntry {
    pub layer_id: String,
    /// `None` means the theme's default style
    pub style: Option<String>,
}

/// A parent/child relation between two layers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relation {
    pub id: String,
    pub name: String,
    pub parent_layer: String,
    pub child_layer: String,
    pub fields: Vec<FieldPair>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldPair {
    pub parent: String,
    pub child: String,
}

/// A layer reference that does not resolve to a layer definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityIssue {
    GroupLeaf { layer: String },
    LayerOrder { layer: String },
    ThemeEntry { theme: String, layer: String },
    RelationEndpoint { relation: String, layer: String },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityIssue::GroupLeaf { layer } => {
                write!(f, "group tree references missing layer '{}'", layer)
            }
            IntegrityIssue::LayerOrder { layer } => {
                write!(f, "layer order references missing layer '{}'", layer)
            }
            IntegrityIssue::ThemeEntry { theme, layer } => {
                write!(f, "theme '{}' references missing layer '{}'", theme, layer)
            }
            IntegrityIssue::RelationEndpoint { relation, layer } => {
                write!(f, "relation '{}' references missing layer '{}'", relation, layer)
            }
        }
    }
}

/// An in-memory QGIS project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDocument {
    xml: XmlDocument,
}

impl ProjectDocument {
    pub fn new(xml: XmlDocument) -> Self {
        Self { xml }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, XmlError> {
        XmlDocument::from_bytes(bytes).map(Self::new)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, XmlError> {
        self.xml.to_bytes()
    }

    pub fn root(&self) -> &Element {
        &self.xml.root
    }

    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.xml.root
    }

    pub fn metadata(&self) -> ProjectMetadata {
        let root = self.root();
        let attr = |key: &str| root.attr(key).map(str::to_string).filter(|s| !s.is_empty());

        ProjectMetadata {
            name: attr("projectname"),
            title: root.child_text("title").filter(|s| !s.is_empty()),
            author: root
                .child("projectMetadata")
                .and_then(|m| m.child_text("author"))
                .filter(|s| !s.is_empty()),
            version: attr("version"),
            saved_at: attr("saveDateTime"),
            saved_by: attr("saveUser"),
        }
    }

    /// Records who saved the project and when
    pub fn stamp_saved(&mut self, user: &str, at: NaiveDateTime) {
        let root = self.root_mut();
        root.set_attr("saveDateTime", at.format(SAVE_TIME_FORMAT).to_string());
        root.set_attr("saveUser", user);
    }

    /// Every `maplayer` element carrying an id, in document order
    pub fn layer_elements(&self) -> impl Iterator<Item = &Element> {
        self.root()
            .find_all(MAP_LAYER)
            .filter(|el| layer_id(el).is_some())
    }

    /// The `maplayer` element with the given id
    pub fn layer_element(&self, id: &str) -> Option<&Element> {
        self.layer_elements()
            .find(|el| layer_id(el).as_deref() == Some(id))
    }

    pub fn layers(&self) -> Vec<LayerDefinition> {
        self.layer_elements()
            .filter_map(LayerDefinition::from_element)
            .collect()
    }

    /// All layer ids defined in the document
    pub fn layer_ids(&self) -> BTreeSet<String> {
        let mut ids: BTreeSet<String> = self.layer_elements().filter_map(layer_id).collect();
        if let Some(listing) = section(self.root(), PROJECT_LAYERS) {
            ids.extend(listing.children().filter(|c| c.is("layer")).filter_map(layer_id));
        }
        ids
    }

    pub fn group_tree(&self) -> Option<GroupNode> {
        section(self.root(), LAYER_TREE_GROUP).and_then(GroupNode::from_element)
    }

    pub fn themes(&self) -> Vec<Theme> {
        let Some(presets) = section(self.root(), THEMES) else {
            return Vec::new();
        };

        presets
            .children()
            .filter(|p| p.is(THEME))
            .map(|preset| Theme {
                name: preset.attr("name").unwrap_or_default().to_string(),
                entries: preset
                    .children()
                    .filter(|l| l.is("layer"))
                    .filter_map(|l| {
                        let id = l.attr("id").filter(|id| !id.is_empty())?;
                        Some(ThemeEntry {
                            layer_id: id.to_string(),
                            style: l.attr("style").filter(|s| !s.is_empty()).map(str::to_string),
                        })
                    })
                    .collect(),
            })
            .collect()
    }

    /// Layout names, deduplicated, in document order
    pub fn layouts(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        layout_elements(self.root())
            .filter_map(|l| l.attr("name"))
            .map(str::trim)
            .filter(|name| !name.is_empty() && seen.insert(name.to_string()))
            .map(str::to_string)
            .collect()
    }

    pub fn relations(&self) -> Vec<Relation> {
        let Some(listing) = section(self.root(), RELATIONS) else {
            return Vec::new();
        };

        listing
            .children()
            .filter(|r| r.is(RELATION))
            .map(|rel| Relation {
                id: rel.attr("id").unwrap_or_default().to_string(),
                name: rel.attr("name").unwrap_or_default().to_string(),
                parent_layer: rel.attr("referencedLayer").unwrap_or_default().to_string(),
                child_layer: rel.attr("referencingLayer").unwrap_or_default().to_string(),
                fields: rel
                    .children()
                    .filter(|f| f.is(FIELD_REF))
                    .map(|f| FieldPair {
                        parent: f.attr("referencedField").unwrap_or_default().to_string(),
                        child: f.attr("referencingField").unwrap_or_default().to_string(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Lists every layer reference that does not resolve to a definition
    pub fn integrity_issues(&self) -> Vec<IntegrityIssue> {
        let ids = self.layer_ids();
        let missing = |id: &str| !id.is_empty() && !ids.contains(id);
        let mut issues = Vec::new();

        if let Some(tree) = self.group_tree() {
            for id in tree.layer_ids() {
                if missing(id) {
                    issues.push(IntegrityIssue::GroupLeaf { layer: id.to_string() });
                }
            }
        }

        if let Some(order) = section(self.root(), LAYER_ORDER) {
            for id in order.children().filter_map(|l| l.attr("id")) {
                if missing(id) {
                    issues.push(IntegrityIssue::LayerOrder { layer: id.to_string() });
                }
            }
        }

        for theme in self.themes() {
            for entry in theme.entries {
                if missing(entry.layer_id.as_str()) {
                    issues.push(IntegrityIssue::ThemeEntry {
                        theme: theme.name.clone(),
                        layer: entry.layer_id,
                    });
                }
            }
        }

        for relation in self.relations() {
            for id in [&relation.parent_layer, &relation.child_layer] {
                if missing(id.as_str()) {
                    issues.push(IntegrityIssue::RelationEndpoint {
                        relation: relation.name.clone(),
                        layer: id.clone(),
                    });
                }
            }
        }

        issues
    }
}

/// The `id` child of a layer definition, if non-empty
pub(crate) fn layer_id(element: &Element) -> Option<String> {
    element.child_text("id").filter(|id| !id.is_empty())
}

/// The style manager of a `maplayer`, under either of its element names
pub(crate) fn style_manager(layer: &Element) -> Option<&Element> {
    layer
        .child("map-layer-style-manager")
        .or_else(|| layer.child("style-manager"))
        .or_else(|| layer.find("map-layer-style-manager"))
}

pub(crate) fn style_manager_mut(layer: &mut Element) -> Option<&mut Element> {
    if layer.child("map-layer-style-manager").is_some() {
        layer.child_mut("map-layer-style-manager")
    } else if layer.child("style-manager").is_some() {
        layer.child_mut("style-manager")
    } else {
        layer.find_mut("map-layer-style-manager")
    }
}

pub(crate) fn style_name(style: &Element) -> &str {
    style
        .attr("name")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_STYLE)
}

/// A top-level section: a direct child of the root, or failing that the
/// first descendant with that name
pub(crate) fn section<'a>(root: &'a Element, name: &str) -> Option<&'a Element> {
    root.child(name).or_else(|| root.find(name))
}

pub(crate) fn section_mut<'a>(root: &'a mut Element, name: &str) -> Option<&'a mut Element> {
    if root.child(name).is_some() {
        root.child_mut(name)
    } else {
        root.find_mut(name)
    }
}

/// Returns the section, appending an empty one to the root when absent
pub(crate) fn ensure_section<'a>(root: &'a mut Element, name: &str) -> &'a mut Element {
    if section(root, name).is_none() {
        root.push_child(Element::new(name));
    }
    match section_mut(root, name) {
        Some(found) => found,
        None => unreachable!("section <{}> was just inserted", name),
    }
}

/// Removes a section (direct children first, else the first descendant).
/// Returns true when something was removed.
pub(crate) fn remove_section(root: &mut Element, name: &str) -> bool {
    if root.retain_children(|c| !c.is(name)) > 0 {
        return true;
    }
    let mut removed = false;
    root.remove_descendants(&mut |el| {
        if !removed && el.is(name) {
            removed = true;
            return true;
        }
        false
    });
    removed
}

/// Layout elements: direct children of the root plus the children of any
/// layouts container
pub(crate) fn layout_elements(root: &Element) -> impl Iterator<Item = &Element> {
    let flat = root.children().filter(|c| c.is(LAYOUT));
    let contained = root
        .descendants()
        .filter(|c| c.is(LAYOUTS))
        .flat_map(|container| container.children().filter(|c| c.is(LAYOUT)));
    flat.chain(contained)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures;

    #[test]
    fn reads_metadata() {
        let doc = fixtures::sample();
        let meta = doc.metadata();

        assert_eq!(meta.name.as_deref(), Some("Sample"));
        assert_eq!(meta.author.as_deref(), Some("Alice Martin"));
        assert_eq!(meta.saved_by.as_deref(), Some("alice"));
        assert_eq!(meta.version.as_deref(), Some("3.34.4-Prizren"));
    }

    #[test]
    fn reads_layer_definitions() {
        let doc = fixtures::sample();
        let layers = doc.layers();

        assert_eq!(layers.len(), 3);
        let rail = layers.iter().find(|l| l.id == "rail_3c4d").unwrap();
        assert_eq!(rail.name, "Rail");
        assert_eq!(rail.data_source, "/data/rail.gpkg|layername=rail");
        assert_eq!(rail.subset.as_deref(), Some("\"active\" = 1"));
        assert_eq!(rail.crs.as_deref(), Some("EPSG:2154"));

        let rivers = layers.iter().find(|l| l.id == "rivers_5e6f").unwrap();
        assert_eq!(rivers.styles, vec!["summer", "winter"]);
        assert_eq!(rivers.current_style.as_deref(), Some("summer"));
    }

    #[test]
    fn identity_key_normalizes_case_and_whitespace() {
        let a = IdentityKey::new(" OGR", "/DATA/roads.shp ", None);
        let b = IdentityKey::new("ogr", "/data/roads.shp", Some(""));

        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a, IdentityKey::new("ogr", "/data/roads.shp", Some("x > 1")));
    }

    #[test]
    fn reads_group_tree() {
        let doc = fixtures::sample();
        let tree = doc.group_tree().unwrap();

        assert_eq!(tree.layer_ids(), vec!["roads_1a2b", "rail_3c4d", "rivers_5e6f"]);
        assert_eq!(tree.group_names(), vec!["Transport", "Rail", "Hydro"]);
        let rail = tree.find_group("Rail").unwrap();
        assert_eq!(rail.layer_ids(), vec!["rail_3c4d"]);
    }

    #[test]
    fn reads_themes_layouts_relations() {
        let doc = fixtures::sample();

        let themes = doc.themes();
        assert_eq!(themes.len(), 2);
        assert_eq!(themes[0].name, "Overview");
        assert_eq!(themes[0].entries[1].style.as_deref(), Some("summer"));

        assert_eq!(doc.layouts(), vec!["A4 Overview", "A3 Water"]);

        let relations = doc.relations();
        assert_eq!(relations[0].parent_layer, "rivers_5e6f");
        assert_eq!(relations[0].child_layer, "roads_1a2b");
        assert_eq!(relations[0].fields.len(), 2);
    }

    #[test]
    fn sample_has_no_integrity_issues() {
        assert!(fixtures::sample().integrity_issues().is_empty());
    }

    #[test]
    fn detects_dangling_references() {
        let mut doc = fixtures::sample();
        doc.root_mut()
            .remove_descendants(&mut |el| el.is(MAP_LAYER) && layer_id(el).as_deref() == Some("rivers_5e6f"));

        let issues = doc.integrity_issues();
        assert!(issues.contains(&IntegrityIssue::GroupLeaf { layer: "rivers_5e6f".into() }));
        assert!(issues.contains(&IntegrityIssue::ThemeEntry {
            theme: "Water".into(),
            layer: "rivers_5e6f".into()
        }));
        assert!(issues.contains(&IntegrityIssue::RelationEndpoint {
            relation: "roads_rivers".into(),
            layer: "rivers_5e6f".into()
        }));
    }

    #[test]
    fn stamp_saved_updates_root() {
        let mut doc = fixtures::sample();
        let at = NaiveDateTime::parse_from_str("2025-01-02T03:04:05", SAVE_TIME_FORMAT).unwrap();
        doc.stamp_saved("carol", at);

        let meta = doc.metadata();
        assert_eq!(meta.saved_at.as_deref(), Some("2025-01-02T03:04:05"));
        assert_eq!(meta.saved_by.as_deref(), Some("carol"));
    }

    #[test]
    fn ensure_and_remove_section() {
        let mut doc = fixtures::sample();
        let root = doc.root_mut();

        assert!(remove_section(root, THEMES));
        assert!(section(root, THEMES).is_none());
        ensure_section(root, THEMES).push_child(Element::new(THEME).with_attr("name", "New"));
        assert_eq!(doc.themes().len(), 1);
    }
}
