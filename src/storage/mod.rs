//! # Storage Layer
//!
//! Everything that touches the filesystem or another process.
//!
//! ## Formats
//!
//! | Data | Format | Location |
//! |------|--------|----------|
//! | Project | `.qgz` zip archive or plain `.qgs` XML | user supplied |
//! | Auxiliary store | SQLite (`.qgd`) | archive member or sibling file |
//! | Config | TOML | `~/.config/qrator/config.toml` or `--config` |
//! | Layout export job | JSON | temporary file handed to the worker |
//!
//! ## Output Safety
//!
//! - Archives are staged as `<output>.tmp` under an exclusive `fs2` lock
//! - The staged file is renamed into place only once complete
//! - The auxiliary store is pruned on a temporary copy, never in place
//!
//! ## Key Types
//!
//! - [`LoadedProject`] - A parsed project and where it came from
//! - [`AuxiliaryStore`] - Layer-scoped SQLite side tables
//! - [`ArchiveWriter`] - Writes output archives
//! - [`Config`] - User configuration
//! - [`extract`] / [`merge_into`] - The two end-to-end workflows

mod loader;
mod auxiliary;
mod archive;
mod config;
mod layout_worker;
mod pipeline;

pub use loader::{is_archive, LoadError, LoadedProject, ProjectSource};
pub use auxiliary::{AuxiliaryError, AuxiliaryPruneSummary, AuxiliaryStore, AuxiliaryTable, MARKER_COLUMN};
pub use archive::{ArchiveError, ArchiveLayout, ArchiveWriter, PackageReport};
pub use config::{AuxiliaryConfig, Config, ConfigError, OutputFormat, SourcesConfig, WorkerConfig};
pub use layout_worker::{LayoutExportWorker, WorkerError};
pub use pipeline::{extract, merge_into, ExportReport, PipelineOptions};
