//! qrator - Extract, prune and merge subsets of QGIS projects

use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = qrator::cli::run() {
        eprintln!("Error: {:#}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
