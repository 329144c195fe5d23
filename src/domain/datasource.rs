//! Local data source detection and disconnection
//!
//! Disconnecting a layer rewrites its data source under a placeholder
//! directory so that the project opens with the layer marked as broken and
//! the user re-links it. Only file-based sources are touched; database and
//! web sources are left as they are.

use std::collections::{BTreeMap, BTreeSet};

use super::document::{layer_id, ProjectDocument, LAYER_TREE_LAYER, MAP_LAYER};

pub const DEFAULT_LOCAL_PROVIDERS: &[&str] = &[
    "ogr",
    "gdal",
    "spatialite",
    "delimitedtext",
    "gpx",
    "mdal",
    "pdal",
];

pub const DEFAULT_DISCONNECTED_PREFIX: &str = "./__disconnected__/";

/// Markers of a source that is not a plain file path
const REMOTE_MARKERS: &[&str] = &["://", "url=", "host=", "service=", "dbname="];
const REMOTE_VSI: &[&str] = &["/vsicurl", "/vsis3", "/vsigs", "/vsiaz", "/vsiadls", "/vsiswift"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Local,
    Remote,
}

/// Which providers count as local, and where disconnected sources point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePolicy {
    pub local_providers: BTreeSet<String>,
    pub prefix: String,
}

impl Default for SourcePolicy {
    fn default() -> Self {
        Self {
            local_providers: DEFAULT_LOCAL_PROVIDERS.iter().map(|p| p.to_string()).collect(),
            prefix: DEFAULT_DISCONNECTED_PREFIX.to_string(),
        }
    }
}

impl SourcePolicy {
    pub fn new<I, S>(providers: I, prefix: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            local_providers: providers
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .collect(),
            prefix: prefix.into(),
        }
    }

    pub fn classify(&self, provider: &str, source: &str) -> SourceKind {
        if !self.local_providers.contains(&provider.trim().to_lowercase()) {
            return SourceKind::Remote;
        }

        let lowered = source.trim().to_lowercase();
        if lowered.starts_with("file:") {
            return SourceKind::Local;
        }
        if REMOTE_MARKERS.iter().any(|m| lowered.contains(m))
            || REMOTE_VSI.iter().any(|v| lowered.starts_with(v))
        {
            return SourceKind::Remote;
        }
        SourceKind::Local
    }

    /// The placeholder source for a local source. Keeps the file name and
    /// any provider options after `|` or `?`.
    pub fn disconnected(&self, source: &str) -> String {
        let source = source.trim();
        if source.starts_with(&self.prefix) {
            return source.to_string();
        }

        let split = source.find(['|', '?']).unwrap_or(source.len());
        let (path, options) = source.split_at(split);
        let path = path
            .strip_prefix("file://")
            .or_else(|| path.strip_prefix("file:"))
            .unwrap_or(path);
        let file_name = path
            .trim_end_matches(['/', '\\'])
            .rsplit(['/', '\\'])
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("source");

        format!("{}{}{}", self.prefix, file_name, options)
    }

    /// Disconnects every local layer (restricted to `only` when given).
    /// Returns the ids of the layers whose source changed.
    pub fn disconnect_layers(
        &self,
        document: &mut ProjectDocument,
        only: Option<&BTreeSet<String>>,
    ) -> Vec<String> {
        let mut changed: BTreeMap<String, String> = BTreeMap::new();

        document.root_mut().visit_mut(MAP_LAYER, &mut |layer| {
            let Some(id) = layer_id(layer) else {
                return;
            };
            if only.is_some_and(|ids| !ids.contains(&id)) {
                return;
            }

            let provider = layer.child_text("provider").unwrap_or_default();
            let Some(datasource) = layer.child_mut("datasource") else {
                return;
            };
            let source = datasource.text();
            if source.trim().is_empty() || self.classify(&provider, &source) == SourceKind::Remote {
                return;
            }

            let replacement = self.disconnected(&source);
            if replacement != source.trim() {
                log::debug!("disconnecting layer '{}': {} -> {}", id, source.trim(), replacement);
                datasource.set_text(replacement.as_str());
                changed.insert(id, replacement);
            }
        });

        document.root_mut().visit_mut(LAYER_TREE_LAYER, &mut |leaf| {
            if leaf.attr("source").is_none() {
                return;
            }
            if let Some(replacement) = leaf.attr("id").and_then(|id| changed.get(id)).cloned() {
                leaf.set_attr("source", replacement);
            }
        });

        changed.into_keys().collect()
    }
}
