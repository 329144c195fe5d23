//! Merging a filtered project into a base project
//!
//! Layers are matched by content identity ([`IdentityKey`]), not by id. An
//! incoming layer whose key already exists in the base is mapped onto the
//! base layer and only contributes style variants the base does not have.
//! Every other incoming layer is added under its own id, or under a
//! numbered variant (`id_1`, `id_2`, ...) when the base already uses it.
//!
//! Every element taken from the incoming document is cloned and has all
//! remapped ids rewritten, in one pass over the whole subtree, before it is
//! spliced into the base.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::document::{
    ensure_section, layer_id, layout_elements, section, section_mut, style_manager,
    style_manager_mut, style_name, IdentityKey, ProjectDocument, CUSTOM_ORDER, LAYER_ORDER,
    LAYER_TREE_GROUP, LAYER_TREE_LAYER, LAYOUT, LAYOUTS, MAP_LAYER, PROJECT_LAYERS, RELATION,
    RELATIONS, STYLE, THEME, THEMES,
};
use super::token::layer_style_token;
use super::xml::{Element, Node};

/// Incoming layer id to result layer id, built once per merge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct IdMap {
    entries: BTreeMap<String, String>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.entries.insert(from.into(), to.into());
    }

    pub fn get(&self, from: &str) -> Option<&str> {
        self.entries.get(from).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mappings whose target differs from the source
    pub fn changed(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .filter(|(from, to)| from != to)
            .map(|(from, to)| (from.as_str(), to.as_str()))
    }

    /// Rewrites every attribute value and text node of `element`.
    /// Returns the number of values changed.
    pub fn rewrite(&self, element: &mut Element) -> usize {
        let rewriter = IdRewriter::new(self);
        if rewriter.is_noop() {
            return 0;
        }
        element.rewrite_values(&|value| rewriter.rewrite(value))
    }
}

/// Single-pass, longest-match substitution of remapped ids
///
/// Identity mappings take part in matching too, so an id that is kept as
/// is shields its text from a shorter remapped id it starts with.
struct IdRewriter<'a> {
    /// Longest source first
    pairs: Vec<(&'a str, &'a str)>,
    changed: bool,
}

impl<'a> IdRewriter<'a> {
    fn new(map: &'a IdMap) -> Self {
        let mut pairs: Vec<(&str, &str)> = map
            .entries
            .iter()
            .filter(|(from, _)| !from.is_empty())
            .map(|(from, to)| (from.as_str(), to.as_str()))
            .collect();
        pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));
        let changed = map.changed().next().is_some();
        Self { pairs, changed }
    }

    fn is_noop(&self) -> bool {
        !self.changed
    }

    /// `None` when the value is left unchanged. Replacement text is never
    /// scanned again.
    fn rewrite(&self, value: &str) -> Option<String> {
        if !self.pairs.iter().any(|(from, to)| from != to && value.contains(from)) {
            return None;
        }

        let mut out = String::with_capacity(value.len() + 8);
        let mut rest = value;
        'scan: while let Some(ch) = rest.chars().next() {
            for (from, to) in &self.pairs {
                if let Some(tail) = rest.strip_prefix(from) {
                    out.push_str(to);
                    rest = tail;
                    continue 'scan;
                }
            }
            out.push(ch);
            rest = &rest[ch.len_utf8()..];
        }
        (out != value).then_some(out)
    }
}

/// An incoming layer recognized as an existing base layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerMatch {
    pub incoming: String,
    pub base: String,
}

/// An incoming layer added to the result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddedLayer {
    pub incoming: String,
    pub id: String,
}

/// What a merge contributed to the base
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub id_map: IdMap,
    pub matched: Vec<LayerMatch>,
    pub added: Vec<AddedLayer>,
    /// `layer|style` tokens of style variants appended to base layers
    pub styles_added: Vec<String>,
    pub themes_merged: Vec<String>,
    pub themes_added: Vec<String>,
    pub layouts_added: Vec<String>,
    pub layouts_skipped: Vec<String>,
    pub relations_added: Vec<String>,
    pub relations_skipped: Vec<String>,
}

/// Result of merging an incoming document into a base
#[derive(Debug)]
pub struct MergeResult {
    /// The merged document
    pub document: ProjectDocument,

    pub summary: MergeSummary,
}

/// Merges `incoming` into a copy of `base`
///
/// # Arguments
///
/// * `base` - The project receiving the layers
/// * `incoming` - An already filtered project
pub fn merge_documents(base: &ProjectDocument, incoming: &ProjectDocument) -> MergeResult {
    let mut document = base.clone();
    let mut summary = MergeSummary::default();

    // First occurrence wins on duplicate keys within the base
    let mut base_index: BTreeMap<IdentityKey, String> = BTreeMap::new();
    for layer in base.layers() {
        base_index.entry(layer.identity_key()).or_insert(layer.id);
    }

    let mut used = base.layer_ids();
    let mut new_index: BTreeMap<IdentityKey, String> = BTreeMap::new();
    let mut id_map = IdMap::new();

    for layer in incoming.layers() {
        let key = layer.identity_key();
        if let Some(base_id) = base_index.get(&key) {
            log::debug!("layer '{}' matches base layer '{}' ({})", layer.id, base_id, key);
            id_map.insert(&layer.id, base_id);
            summary.matched.push(LayerMatch {
                incoming: layer.id,
                base: base_id.clone(),
            });
        } else if let Some(first) = new_index.get(&key) {
            log::debug!("layer '{}' duplicates incoming layer mapped to '{}'", layer.id, first);
            id_map.insert(&layer.id, first);
        } else {
            let id = fresh_id(&layer.id, &used);
            used.insert(id.clone());
            new_index.insert(key, id.clone());
            id_map.insert(&layer.id, &id);
            summary.added.push(AddedLayer {
                incoming: layer.id,
                id,
            });
        }
    }

    let root = document.root_mut();

    for matched in &summary.matched {
        let Some(source) = incoming.layer_element(&matched.incoming) else {
            continue;
        };
        let Some(target) = find_layer_mut(root, &matched.base) else {
            continue;
        };
        for style in merge_styles(target, source, &id_map) {
            summary.styles_added.push(layer_style_token(&matched.base, &style));
        }
    }

    let incoming_tree = section(incoming.root(), LAYER_TREE_GROUP);
    for added in &summary.added {
        let Some(source) = incoming.layer_element(&added.incoming) else {
            continue;
        };
        let mut layer = source.clone();
        id_map.rewrite(&mut layer);
        let name = layer.child_text("layername").unwrap_or_else(|| added.id.clone());
        ensure_section(root, PROJECT_LAYERS).push_child(layer);

        if let Some(order) = section_mut(root, LAYER_ORDER) {
            order.push_child(Element::new("layer").with_attr("id", added.id.as_str()));
        }

        let spliced = incoming_tree
            .map(|tree| splice_group_leaf(root, tree, &added.incoming, &id_map))
            .unwrap_or(false);
        if !spliced {
            let leaf = Element::new(LAYER_TREE_LAYER)
                .with_attr("id", added.id.as_str())
                .with_attr("name", name);
            insert_tree_child(ensure_section(root, LAYER_TREE_GROUP), leaf);
        }

        if let Some(order) = section_mut(root, LAYER_TREE_GROUP).and_then(|t| t.child_mut(CUSTOM_ORDER)) {
            order.push_child(Element::new("item").with_text(added.id.as_str()));
        }
    }

    merge_themes(root, incoming, &id_map, &mut summary);
    merge_layouts(root, incoming, &id_map, &mut summary);
    merge_relations(root, incoming, &id_map, &mut summary);

    log::debug!(
        "merge: {} matched, {} added, {} style(s) added",
        summary.matched.len(),
        summary.added.len(),
        summary.styles_added.len()
    );

    summary.id_map = id_map;
    MergeResult { document, summary }
}

/// The incoming id itself when free, else the first free `id_N`
pub fn fresh_id(id: &str, used: &BTreeSet<String>) -> String {
    if !used.contains(id) {
        return id.to_string();
    }
    (1..)
        .map(|n| format!("{}_{}", id, n))
        .find(|candidate| !used.contains(candidate))
        .unwrap_or_else(|| id.to_string())
}

fn find_layer_mut<'a>(element: &'a mut Element, id: &str) -> Option<&'a mut Element> {
    for child in element.children_mut() {
        if child.is(MAP_LAYER) && layer_id(child).as_deref() == Some(id) {
            return Some(child);
        }
        if let Some(found) = find_layer_mut(child, id) {
            return Some(found);
        }
    }
    None
}

/// Appends incoming style variants the target does not have; returns their names
fn merge_styles(target: &mut Element, source: &Element, id_map: &IdMap) -> Vec<String> {
    let Some(incoming) = style_manager(source) else {
        return Vec::new();
    };

    let Some(manager) = style_manager_mut(target) else {
        let mut manager = incoming.clone();
        id_map.rewrite(&mut manager);
        let names = manager
            .children()
            .filter(|s| s.is(STYLE))
            .map(|s| style_name(s).to_string())
            .collect();
        target.push_child(manager);
        return names;
    };

    let mut present: BTreeSet<String> = manager
        .children()
        .filter(|s| s.is(STYLE))
        .map(|s| style_name(s).to_string())
        .collect();

    let mut added = Vec::new();
    for style in incoming.children().filter(|s| s.is(STYLE)) {
        let name = style_name(style).to_string();
        if !present.insert(name.clone()) {
            continue;
        }
        let mut clone = style.clone();
        id_map.rewrite(&mut clone);
        manager.push_child(clone);
        added.push(name);
    }
    added
}

/// Ancestor groups (outermost first, root excluded) and the leaf for a layer
fn leaf_path<'a>(group: &'a Element, id: &str) -> Option<(Vec<&'a Element>, &'a Element)> {
    for child in group.children() {
        if child.is(LAYER_TREE_LAYER) && child.attr("id") == Some(id) {
            return Some((Vec::new(), child));
        }
        if child.is(LAYER_TREE_GROUP) {
            if let Some((mut path, leaf)) = leaf_path(child, id) {
                path.insert(0, child);
                return Some((path, leaf));
            }
        }
    }
    None
}

/// Recreates the incoming group path of a layer in the base tree and adds
/// the leaf there
fn splice_group_leaf(root: &mut Element, incoming_tree: &Element, incoming_id: &str, id_map: &IdMap) -> bool {
    let Some((path, leaf)) = leaf_path(incoming_tree, incoming_id) else {
        return false;
    };

    let groups: Vec<Element> = path
        .iter()
        .map(|group| {
            let mut shell = group.shallow_clone();
            id_map.rewrite(&mut shell);
            shell
        })
        .collect();
    let mut leaf = leaf.clone();
    id_map.rewrite(&mut leaf);

    insert_leaf(ensure_section(root, LAYER_TREE_GROUP), &groups, leaf);
    true
}

fn insert_leaf(parent: &mut Element, path: &[Element], leaf: Element) {
    let Some((group, rest)) = path.split_first() else {
        insert_tree_child(parent, leaf);
        return;
    };

    let name = group.attr("name").unwrap_or_default();
    let existing = parent.children.iter().position(|node| {
        node.as_element()
            .is_some_and(|el| el.is(LAYER_TREE_GROUP) && el.attr("name").unwrap_or_default() == name)
    });
    let index = match existing {
        Some(index) => index,
        None => insert_tree_child(parent, group.clone()),
    };

    if let Some(Node::Element(child)) = parent.children.get_mut(index) {
        insert_leaf(child, rest, leaf);
    }
}

/// Inserts a tree node before the group's `custom-order`; returns its index
fn insert_tree_child(group: &mut Element, child: Element) -> usize {
    let index = group
        .children
        .iter()
        .position(|node| node.as_element().is_some_and(|el| el.is(CUSTOM_ORDER)))
        .unwrap_or(group.children.len());
    group.children.insert(index, Node::Element(child));
    index
}

fn merge_themes(root: &mut Element, incoming: &ProjectDocument, id_map: &IdMap, summary: &mut MergeSummary) {
    let Some(presets) = section(incoming.root(), THEMES) else {
        return;
    };

    for preset in presets.children().filter(|p| p.is(THEME)) {
        let name = preset.attr("name").unwrap_or_default().to_string();
        let mut clone = preset.clone();
        id_map.rewrite(&mut clone);

        let target = section_mut(root, THEMES).and_then(|section| {
            section
                .children_mut()
                .find(|p| p.is(THEME) && p.attr("name") == Some(name.as_str()))
        });

        match target {
            Some(target) => {
                let added = merge_theme_entries(target, &clone);
                log::debug!("theme '{}': {} layer reference(s) added", name, added);
                summary.themes_merged.push(name);
            }
            None => {
                ensure_section(root, THEMES).push_child(clone);
                summary.themes_added.push(name);
            }
        }
    }
}

/// Unions layer references into an existing theme, skipping layer ids it
/// already lists. Legend node state follows the layers that were added.
fn merge_theme_entries(target: &mut Element, incoming: &Element) -> usize {
    let present: BTreeSet<String> = target
        .children()
        .filter(|c| c.is("layer"))
        .filter_map(|c| c.attr("id"))
        .map(str::to_string)
        .collect();

    let mut added: BTreeSet<String> = BTreeSet::new();
    for entry in incoming.children().filter(|c| c.is("layer")) {
        let Some(id) = entry.attr("id") else {
            continue;
        };
        if present.contains(id) || !added.insert(id.to_string()) {
            continue;
        }
        target.push_child(entry.clone());
    }

    for node in incoming.children().filter(|c| !c.is("layer")) {
        if node.attr("id").is_some_and(|id| added.contains(id)) {
            target.push_child(node.clone());
        }
    }

    added.len()
}

fn merge_layouts(root: &mut Element, incoming: &ProjectDocument, id_map: &IdMap, summary: &mut MergeSummary) {
    let mut present: BTreeSet<String> = layout_elements(root)
        .filter_map(|l| l.attr("name"))
        .map(|name| name.trim().to_string())
        .collect();

    for layout in layout_elements(incoming.root()) {
        let name = layout.attr("name").unwrap_or_default().trim().to_string();
        if !present.insert(name.clone()) {
            summary.layouts_skipped.push(name);
            continue;
        }

        let mut clone = layout.clone();
        id_map.rewrite(&mut clone);
        if let Some(container) = section_mut(root, LAYOUTS) {
            container.push_child(clone);
        } else if root.child(LAYOUT).is_some() {
            root.push_child(clone);
        } else {
            ensure_section(root, "Layouts").push_child(clone);
        }
        summary.layouts_added.push(name);
    }
}

fn merge_relations(root: &mut Element, incoming: &ProjectDocument, id_map: &IdMap, summary: &mut MergeSummary) {
    let Some(relations) = section(incoming.root(), RELATIONS) else {
        return;
    };

    let mut present: BTreeSet<String> = section(root, RELATIONS)
        .map(|s| {
            s.children()
                .filter(|r| r.is(RELATION))
                .filter_map(|r| r.attr("name"))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    for relation in relations.children().filter(|r| r.is(RELATION)) {
        let name = relation.attr("name").unwrap_or_default().to_string();
        if !present.insert(name.clone()) {
            summary.relations_skipped.push(name);
            continue;
        }

        let mut clone = relation.clone();
        id_map.rewrite(&mut clone);
        ensure_section(root, RELATIONS).push_child(clone);
        summary.relations_added.push(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures;
    use crate::domain::prune::prune;
    use crate::domain::selection::{EffectiveSelection, SelectionSet};
    use proptest::prelude::*;

    fn merged() -> MergeResult {
        merge_documents(&fixtures::base(), &fixtures::sample())
    }

    fn styles_of(doc: &ProjectDocument, id: &str) -> Vec<String> {
        doc.layers()
            .into_iter()
            .find(|l| l.id == id)
            .map(|l| l.styles)
            .unwrap_or_default()
    }

    // =========================================================================
    // Id map
    // =========================================================================

    #[test]
    fn fresh_id_prefers_original() {
        let used: BTreeSet<String> = ["a", "a_1"].iter().map(|s| s.to_string()).collect();

        assert_eq!(fresh_id("b", &used), "b");
        assert_eq!(fresh_id("a", &used), "a_2");
    }

    #[test]
    fn rewrite_is_single_pass_and_longest_first() {
        let mut map = IdMap::new();
        map.insert("a", "b");
        map.insert("b", "c");
        map.insert("ab", "X");
        map.insert("same", "same");

        let mut el = Element::new("x")
            .with_attr("k", "ab")
            .with_attr("j", "a b")
            .with_text("xyz");

        assert_eq!(map.rewrite(&mut el), 2);
        assert_eq!(el.attr("k"), Some("X"));
        assert_eq!(el.attr("j"), Some("b c"));
        assert_eq!(el.text(), "xyz");
    }

    #[test]
    fn rewrite_with_suffixed_target() {
        let mut map = IdMap::new();
        map.insert("rail", "rail_1");

        let mut el = Element::new("x").with_attr("layer", "rail").with_text("rail;rail");
        map.rewrite(&mut el);

        assert_eq!(el.attr("layer"), Some("rail_1"));
        assert_eq!(el.text(), "rail_1;rail_1");
    }

    // =========================================================================
    // Merge
    // =========================================================================

    #[test]
    fn matches_by_content_identity() {
        let result = merged();
        let summary = &result.summary;

        assert_eq!(
            summary.matched,
            vec![LayerMatch {
                incoming: "roads_1a2b".into(),
                base: "base_roads".into()
            }]
        );
        assert_eq!(summary.id_map.get("roads_1a2b"), Some("base_roads"));
        assert_eq!(summary.styles_added, vec!["base_roads|highlighted"]);
        assert_eq!(
            styles_of(&result.document, "base_roads"),
            vec!["default", "night", "highlighted"]
        );
    }

    #[test]
    fn colliding_new_layer_gets_suffixed_id() {
        let result = merged();

        assert_eq!(
            result.summary.added,
            vec![
                AddedLayer {
                    incoming: "rail_3c4d".into(),
                    id: "rail_3c4d_1".into()
                },
                AddedLayer {
                    incoming: "rivers_5e6f".into(),
                    id: "rivers_5e6f".into()
                },
            ]
        );

        let ids = result.document.layer_ids();
        assert_eq!(ids.len(), 5);
        assert!(ids.contains("rail_3c4d"));
        assert!(ids.contains("rail_3c4d_1"));
        let tram = result
            .document
            .layers()
            .into_iter()
            .find(|l| l.id == "rail_3c4d")
            .unwrap();
        assert_eq!(tram.data_source, "/data/tram.shp");
    }

    #[test]
    fn no_duplicate_identity_keys() {
        let doc = merged().document;
        let keys: Vec<IdentityKey> = doc.layers().iter().map(|l| l.identity_key()).collect();
        let unique: BTreeSet<&IdentityKey> = keys.iter().collect();

        assert_eq!(keys.len(), unique.len());
        assert!(doc.integrity_issues().is_empty());
    }

    #[test]
    fn group_leaves_follow_incoming_path() {
        let tree = merged().document.group_tree().unwrap();

        let transport = tree.find_group("Transport").unwrap();
        assert_eq!(
            transport.layer_ids(),
            vec!["base_roads", "rail_3c4d", "rail_3c4d_1"]
        );
        assert_eq!(
            tree.find_group("Rail").unwrap().layer_ids(),
            vec!["rail_3c4d_1"]
        );
        assert_eq!(
            tree.find_group("Hydro").unwrap().layer_ids(),
            vec!["rivers_5e6f"]
        );
    }

    #[test]
    fn themes_union_by_name() {
        let result = merged();
        let themes = result.document.themes();

        let overview = themes.iter().find(|t| t.name == "Overview").unwrap();
        let ids: Vec<&str> = overview.entries.iter().map(|e| e.layer_id.as_str()).collect();
        assert_eq!(ids, vec!["base_roads", "rivers_5e6f"]);
        assert_eq!(overview.entries[0].style.as_deref(), Some("night"));
        assert!(themes.iter().any(|t| t.name == "Water"));

        assert_eq!(result.summary.themes_merged, vec!["Overview"]);
        assert_eq!(result.summary.themes_added, vec!["Water"]);
    }

    #[test]
    fn layouts_and_relations_skip_by_name() {
        let result = merged();

        assert_eq!(result.document.layouts(), vec!["A4 Overview", "A3 Water"]);
        assert_eq!(result.summary.layouts_skipped, vec!["A4 Overview"]);

        let relations = result.document.relations();
        let rail = relations.iter().find(|r| r.name == "rail_roads").unwrap();
        assert_eq!(rail.child_layer, "rail_3c4d_1");
        assert_eq!(rail.parent_layer, "base_roads");

        let again = merge_documents(&result.document, &fixtures::sample());
        assert_eq!(again.summary.relations_skipped.len(), 2);
        assert!(again.summary.relations_added.is_empty());
    }

    #[test]
    fn remapped_ids_do_not_survive_in_spliced_content() {
        let doc = merged().document;
        let root = doc.root();

        let mut spliced: Vec<&Element> = Vec::new();
        spliced.extend(root.find_all(MAP_LAYER));
        spliced.extend(root.find_all(LAYER_TREE_LAYER));
        spliced.extend(root.find_all(THEME));
        spliced.extend(root.find_all(RELATION));

        for element in spliced {
            for value in element.values() {
                assert!(!value.contains("roads_1a2b"), "stale id in {:?}", value);
            }
        }

        let rail_refs: Vec<&str> = root
            .find_all(RELATION)
            .filter_map(|r| r.attr("referencingLayer"))
            .collect();
        assert!(!rail_refs.contains(&"rail_3c4d"));
    }

    #[test]
    fn merging_known_layers_adds_only_styles() {
        let sample = fixtures::sample();
        let selection = SelectionSet {
            layers: ["roads_1a2b".to_string()].into(),
            ..Default::default()
        };
        let (filtered, _) = prune(&sample, &EffectiveSelection::resolve(&sample, &selection));

        let base = fixtures::base();
        let result = merge_documents(&base, &filtered);

        assert!(result.summary.added.is_empty());
        assert_eq!(result.document.layer_ids(), base.layer_ids());
        assert_eq!(result.summary.styles_added, vec!["base_roads|highlighted"]);
    }

    #[test]
    fn base_is_left_untouched() {
        let base = fixtures::base();
        let _ = merge_documents(&base, &fixtures::sample());

        assert_eq!(base, fixtures::base());
    }

    /// Minimal project: one root leaf, definition and order entry per layer
    fn project(layers: &[(&str, &str)], extra: &str) -> ProjectDocument {
        let mut leaves = String::new();
        let mut items = String::new();
        let mut defs = String::new();
        let mut order = String::new();
        for (id, source) in layers {
            leaves.push_str(&format!(r#"<layer-tree-layer id="{id}" name="{id}"/>"#));
            items.push_str(&format!("<item>{id}</item>"));
            defs.push_str(&format!(
                "<maplayer><id>{id}</id><datasource>{source}</datasource><provider>ogr</provider></maplayer>"
            ));
            order.push_str(&format!(r#"<layer id="{id}"/>"#));
        }
        let xml = format!(
            r#"<qgis><layer-tree-group>{leaves}<custom-order enabled="0">{items}</custom-order></layer-tree-group><projectlayers>{defs}</projectlayers><layerorder>{order}</layerorder>{extra}</qgis>"#
        );
        ProjectDocument::parse(xml.as_bytes()).unwrap()
    }

    #[test]
    fn kept_id_is_not_rewritten_by_shorter_remapped_prefix() {
        let base = project(&[("base", "/roads.shp")], "");
        let incoming = project(&[("L", "/roads.shp"), ("L_2", "/rivers.shp")], "");

        let result = merge_documents(&base, &incoming);
        let doc = &result.document;

        assert_eq!(
            result.summary.added,
            vec![AddedLayer {
                incoming: "L_2".into(),
                id: "L_2".into()
            }]
        );
        assert_eq!(
            doc.layer_ids(),
            BTreeSet::from(["base".to_string(), "L_2".to_string()])
        );
        assert_eq!(doc.group_tree().unwrap().layer_ids(), vec!["base", "L_2"]);
        let items: Vec<String> = doc
            .root()
            .find(CUSTOM_ORDER)
            .unwrap()
            .children()
            .map(|i| i.text())
            .collect();
        assert_eq!(items, vec!["base", "L_2"]);
        assert!(doc.integrity_issues().is_empty());
    }

    #[test]
    fn identity_mappings_shield_longer_ids() {
        let mut map = IdMap::new();
        map.insert("L", "base");
        map.insert("L_2", "L_2");

        let mut el = Element::new("x").with_attr("a", "L_2").with_attr("b", "L;L_2");

        assert_eq!(map.rewrite(&mut el), 1);
        assert_eq!(el.attr("a"), Some("L_2"));
        assert_eq!(el.attr("b"), Some("base;L_2"));
    }

    #[test]
    fn flat_layouts_stay_flat() {
        let base = project(&[("base", "/roads.shp")], r#"<Layout name="Base print"/>"#);
        let incoming = project(
            &[("roads", "/roads.shp")],
            r#"<Layout name="Incoming print"/><Layout name="Base print"/>"#,
        );

        let result = merge_documents(&base, &incoming);

        assert_eq!(result.document.layouts(), vec!["Base print", "Incoming print"]);
        assert_eq!(result.summary.layouts_added, vec!["Incoming print"]);
        assert_eq!(result.summary.layouts_skipped, vec!["Base print"]);
        assert!(result.document.root().find(LAYOUTS).is_none());
    }

    #[test]
    fn prefixed_elements_are_matched_and_merged() {
        let base = ProjectDocument::parse(
            br#"<qgis xmlns:q="http://qgis.org/project">
  <q:projectlayers>
    <q:maplayer><q:id>roads</q:id><q:datasource>/data/roads.shp</q:datasource><q:provider>ogr</q:provider></q:maplayer>
  </q:projectlayers>
  <q:visibility-presets>
    <q:visibility-preset name="Overview"><q:layer id="roads" visible="1"/></q:visibility-preset>
  </q:visibility-presets>
</qgis>"#,
        )
        .unwrap();
        let incoming = ProjectDocument::parse(
            br#"<qgis xmlns:q="http://qgis.org/project">
  <q:projectlayers>
    <q:maplayer><q:id>r1</q:id><q:datasource>/DATA/roads.shp</q:datasource><q:provider>OGR</q:provider></q:maplayer>
    <q:maplayer><q:id>lakes</q:id><q:datasource>/data/lakes.shp</q:datasource><q:provider>ogr</q:provider></q:maplayer>
  </q:projectlayers>
  <q:visibility-presets>
    <q:visibility-preset name="Overview"><q:layer id="r1" visible="1"/><q:layer id="lakes" visible="1"/></q:visibility-preset>
  </q:visibility-presets>
</qgis>"#,
        )
        .unwrap();

        let result = merge_documents(&base, &incoming);

        assert_eq!(
            result.summary.matched,
            vec![LayerMatch {
                incoming: "r1".into(),
                base: "roads".into()
            }]
        );
        assert_eq!(result.summary.themes_merged, vec!["Overview"]);
        let themes = result.document.themes();
        let ids: Vec<&str> = themes[0].entries.iter().map(|e| e.layer_id.as_str()).collect();
        assert_eq!(ids, vec!["roads", "lakes"]);
        assert!(result.document.integrity_issues().is_empty());
    }

    proptest! {
        #[test]
        fn rewrite_leaves_unrelated_values_alone(value in "[A-Z ]{0,20}") {
            let mut map = IdMap::new();
            map.insert("abc", "xyz");
            let mut el = Element::new("x").with_attr("v", value.clone());

            prop_assert_eq!(map.rewrite(&mut el), 0);
            prop_assert_eq!(el.attr("v"), Some(value.as_str()));
        }

        #[test]
        fn rewrite_replaces_every_occurrence(parts in proptest::collection::vec("[A-Z]{0,4}", 1..5)) {
            let mut map = IdMap::new();
            map.insert("old", "new_old");
            let value = parts.join("old");
            let mut el = Element::new("x").with_attr("v", value.clone());

            map.rewrite(&mut el);

            let expected = parts.join("new_old");
            prop_assert_eq!(el.attr("v"), Some(expected.as_str()));
        }
    }
}
