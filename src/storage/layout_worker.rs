//! Out-of-process layout export
//!
//! Layout rendering needs the full map engine, so it runs in a separate
//! worker program. The job is handed over as a JSON file whose path is the
//! last argument; the worker answers with one JSON line on stdout.

use std::io::Write;
use std::process::Command;

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::domain::{ExportJob, ExportOutcome};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to start layout worker '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid worker payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Layout worker failed: {0}")]
    Failed(String),
}

pub struct LayoutExportWorker {
    program: String,
    args: Vec<String>,
}

impl LayoutExportWorker {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Runs one export job and returns the worker's outcome
    ///
    /// An outcome with `ok == false` is an error; per-item failures are
    /// left to the caller.
    pub fn run(&self, job: &ExportJob) -> Result<ExportOutcome, WorkerError> {
        let mut job_file = NamedTempFile::new()?;
        serde_json::to_writer(job_file.as_file_mut(), job)?;
        job_file.as_file_mut().flush()?;

        log::debug!(
            "running {} {:?} {} ({} item(s))",
            self.program,
            self.args,
            job_file.path().display(),
            job.items.len()
        );

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(job_file.path())
            .output()
            .map_err(|source| WorkerError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let outcome = match ExportOutcome::from_stdout(&stdout) {
            Ok(outcome) => outcome,
            Err(e) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let detail = stderr.lines().last().unwrap_or_default().trim().to_string();
                if !output.status.success() {
                    return Err(WorkerError::Failed(format!("exited with {}: {}", output.status, detail)));
                }
                return Err(WorkerError::Json(e));
            }
        };

        if !outcome.ok {
            return Err(WorkerError::Failed(
                outcome.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        for failure in outcome.failures() {
            log::warn!("layout '{}' failed: {}", failure.layout_name, failure.error);
        }
        Ok(outcome)
    }
}
