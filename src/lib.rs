//! qrator - Extract, prune and merge subsets of QGIS projects
//!
//! A project is loaded from a `.qgz` archive or a plain `.qgs` document,
//! a user selection (layers, styles, themes, layouts, relations) is resolved
//! against it, and the result is either written as a standalone pruned
//! project or merged into another project. Layers are matched across
//! projects by content (provider, data source and subset filter), never by
//! their document-local ids.

pub mod domain;
pub mod storage;
pub mod cli;

pub use domain::{
    merge_documents, prune, EffectiveSelection, IdentityKey, Inventory, ProjectDocument,
    SelectionSet,
};
pub use storage::{extract, merge_into, ExportReport, LoadedProject, PipelineOptions};
