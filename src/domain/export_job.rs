//! Layout export job and result payloads
//!
//! Layouts are rendered by an external worker process. The worker receives
//! the path of a JSON [`ExportJob`] as its only argument and prints a single
//! JSON [`ExportOutcome`] line on stdout.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const DEFAULT_DPI: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Pdf,
    Png,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Pdf => write!(f, "pdf"),
            ExportFormat::Png => write!(f, "png"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pdf" => Ok(ExportFormat::Pdf),
            "png" => Ok(ExportFormat::Png),
            other => Err(format!("Unsupported export format '{}' (expected pdf or png)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportItem {
    pub layout_name: String,
    pub out_path: PathBuf,
}

impl FromStr for ExportItem {
    type Err = String;

    /// Parses `NAME=PATH`; the layout name may not contain `=`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, path) = s
            .split_once('=')
            .ok_or_else(|| format!("Expected LAYOUT=PATH, got '{}'", s))?;
        let (name, path) = (name.trim(), path.trim());
        if name.is_empty() || path.is_empty() {
            return Err(format!("Expected LAYOUT=PATH, got '{}'", s));
        }
        Ok(Self {
            layout_name: name.to_string(),
            out_path: PathBuf::from(path),
        })
    }
}

/// The configuration handed to the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportJob {
    pub project_path: PathBuf,
    /// Install prefix used by the worker to locate its runtime
    #[serde(default)]
    pub prefix: String,
    pub format: ExportFormat,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    pub items: Vec<ExportItem>,
}

fn default_dpi() -> u32 {
    DEFAULT_DPI
}

/// Per-layout result reported by the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    #[serde(default)]
    pub layout_name: String,
    #[serde(default)]
    pub out_path: String,
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub error: String,
}

/// The single result line printed by the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default)]
    pub results: Vec<ItemResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExportOutcome {
    /// Parses the last non-empty line of the worker's stdout
    pub fn from_stdout(stdout: &str) -> Result<Self, serde_json::Error> {
        let line = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default();
        serde_json::from_str(line)
    }

    /// Items that failed, whatever the overall flag says
    pub fn failures(&self) -> impl Iterator<Item = &ItemResult> {
        self.results.iter().filter(|r| !r.ok)
    }

    pub fn all_ok(&self) -> bool {
        self.ok && self.failures().next().is_none()
    }
}
