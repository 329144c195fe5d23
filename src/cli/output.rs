//! Terminal output for qrator commands
//!
//! Commands print human-readable listings by default. With `--format json`
//! they print one JSON document on stdout instead, and diagnostics go to
//! stderr only.

use serde::Serialize;

use crate::storage::OutputFormat as ConfiguredFormat;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl From<ConfiguredFormat> for OutputFormat {
    fn from(format: ConfiguredFormat) -> Self {
        match format {
            ConfiguredFormat::Text => OutputFormat::Text,
            ConfiguredFormat::Json => OutputFormat::Json,
        }
    }
}

pub struct Output {
    format: OutputFormat,
    verbose: bool,
}

impl Output {
    pub fn new(format: OutputFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }

    /// One-line outcome of a command that wrote or changed something
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Text => println!("{}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "success": true,
                        "message": message
                    })
                );
            }
        }
    }

    /// Non-fatal problems of a transformation, on stderr. JSON callers find
    /// them in the report itself.
    pub fn warnings<S: AsRef<str>>(&self, warnings: &[S]) {
        if self.format != OutputFormat::Text {
            return;
        }
        for warning in warnings {
            eprintln!("Warning: {}", warning.as_ref());
        }
    }

    /// A report, inventory or listing as JSON (pretty-printed in text mode)
    pub fn data<T: Serialize>(&self, data: &T) {
        let json = match self.format {
            OutputFormat::Text => serde_json::to_string_pretty(data),
            OutputFormat::Json => serde_json::to_string(data),
        };
        if let Ok(json) = json {
            println!("{}", json);
        }
    }

    /// Section title of a text listing, preceded by a blank line
    pub fn heading(&self, title: &str) {
        if self.format == OutputFormat::Text {
            println!();
            println!("{}:", title);
        }
    }

    /// Indented entry under a heading (text only)
    pub fn item(&self, depth: usize, text: &str) {
        if self.format == OutputFormat::Text {
            println!("{}{}", "  ".repeat(depth), text);
        }
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Diagnostics under `--verbose`, tagged with the stage they come from
    pub fn verbose_ctx(&self, stage: &str, message: &str) {
        if self.verbose {
            eprintln!("[{}] {}", stage, message);
        }
    }
}
