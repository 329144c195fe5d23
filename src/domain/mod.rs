//! Domain models for qrator
//!
//! Contains the project document model and the transformations on it
//! (selection resolution, pruning, merging) without any I/O concerns.

pub mod xml;
mod document;
mod token;
mod selection;
mod prune;
mod merge;
mod datasource;
mod inventory;
mod export_job;

pub use xml::{Element, Node, XmlDocument, XmlError};
pub use document::{
    split_subset, FieldPair, GroupNode, IdentityKey, IntegrityIssue, LayerDefinition,
    ProjectDocument, ProjectMetadata, Relation, Theme, ThemeEntry, DEFAULT_STYLE,
};
pub use token::{
    child_field_token, layer_style_token, parent_field_token, theme_layer_token,
    theme_style_token, IdentifierResolver, ResolvedToken, SelectionToken, TokenShape,
};
pub use selection::{EffectiveSelection, SelectionSet};
pub use prune::{prune, prune_in_place, PruneSummary};
pub use merge::{fresh_id, merge_documents, AddedLayer, IdMap, LayerMatch, MergeResult, MergeSummary};
pub use datasource::{SourceKind, SourcePolicy, DEFAULT_DISCONNECTED_PREFIX, DEFAULT_LOCAL_PROVIDERS};
pub use inventory::{
    suggest_relations, FieldItem, Inventory, LayerItem, RelationItem, StyleItem, ThemeItem,
    ThemeLayerItem,
};
pub use export_job::{ExportFormat, ExportItem, ExportJob, ExportOutcome, ItemResult, DEFAULT_DPI};

#[cfg(test)]
pub(crate) mod fixtures {
    use super::ProjectDocument;

    pub fn sample() -> ProjectDocument {
        ProjectDocument::parse(include_bytes!("../../tests/fixtures/sample.qgs")).unwrap()
    }

    pub fn base() -> ProjectDocument {
        ProjectDocument::parse(include_bytes!("../../tests/fixtures/base.qgs")).unwrap()
    }
}
