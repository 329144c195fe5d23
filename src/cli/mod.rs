//! # Command-Line Interface
//!
//! User-facing CLI commands and output formatting.
//!
//! ## Commands
//!
//! | Command | Purpose |
//! |---------|---------|
//! | `inspect` | List selectable items and their selection tokens |
//! | `validate` | Report layer references that do not resolve |
//! | `extract` | Write a pruned copy of a project |
//! | `merge` | Merge the selected part of a project into another |
//! | `aux tables`, `aux prune` | Auxiliary store maintenance |
//! | `layouts list`, `layouts export` | Print layouts and the export worker |
//!
//! ## Output Formats
//!
//! All commands support `--format` flag:
//! - `text` (default) - Human-readable output
//! - `json` - Machine-parseable JSON
//!
//! ## Verbose Mode
//!
//! Use `--verbose` (or `-v`) for debug output and debug-level logging:
//! ```bash
//! qrator --verbose extract project.qgz --layer roads -o subset.qgz
//! ```
//!
//! ## Entry Point
//!
//! Call [`run()`] to parse arguments and execute the appropriate command.

mod app;
mod output;
mod inspect;
mod transform;
mod aux_cmd;
mod layouts_cmd;

pub use app::{Cli, Commands, run};
pub use output::{Output, OutputFormat};
pub use transform::load_selection;
