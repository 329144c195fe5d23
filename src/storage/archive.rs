//! Output archive packaging
//!
//! Writes a transformed document into a fresh `.qgz` archive, together with
//! a pruned copy of the auxiliary store and every unrelated member of the
//! source archive. Only the primary document member is mandatory; any other
//! member that cannot be copied is logged and omitted.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::auxiliary::{AuxiliaryError, AuxiliaryPruneSummary, AuxiliaryStore};
use super::loader::ProjectSource;
use crate::domain::{ProjectDocument, XmlError};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to serialize project document: {0}")]
    Serialize(#[from] XmlError),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Auxiliary store error: {0}")]
    Auxiliary(#[from] AuxiliaryError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Member names used in written archives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveLayout {
    pub document_member: String,
    pub auxiliary_member: String,
}

impl Default for ArchiveLayout {
    fn default() -> Self {
        Self {
            document_member: "project.qgs".to_string(),
            auxiliary_member: "project.qgd".to_string(),
        }
    }
}

/// What ended up in a written archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageReport {
    pub output: PathBuf,
    pub document_member: String,
    /// Present when an auxiliary store was pruned and packaged
    pub auxiliary: Option<AuxiliaryPruneSummary>,
    pub passthrough: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct ArchiveWriter {
    layout: ArchiveLayout,
    vacuum: bool,
}

impl ArchiveWriter {
    pub fn new(layout: ArchiveLayout) -> Self {
        Self {
            layout,
            vacuum: false,
        }
    }

    /// Vacuums the pruned auxiliary store before packaging it
    pub fn with_vacuum(mut self, vacuum: bool) -> Self {
        self.vacuum = vacuum;
        self
    }

    pub fn layout(&self) -> &ArchiveLayout {
        &self.layout
    }

    /// Writes `document` to `output`
    ///
    /// The auxiliary store and passthrough members are taken from `source`.
    /// The archive is staged next to `output` and only renamed into place
    /// once complete.
    pub fn write(
        &self,
        document: &ProjectDocument,
        output: &Path,
        source: Option<&ProjectSource>,
    ) -> Result<PackageReport, ArchiveError> {
        let bytes = document.to_bytes()?;

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let temp_path = staging_path(output);
        let mut report = PackageReport {
            output: output.to_path_buf(),
            document_member: self.layout.document_member.clone(),
            auxiliary: None,
            passthrough: Vec::new(),
            warnings: Vec::new(),
        };

        let written = self
            .write_archive(&temp_path, &bytes, document, source, &mut report)
            .and_then(|()| fs::rename(&temp_path, output).map_err(ArchiveError::from));
        match written {
            Ok(()) => {
                log::debug!("wrote {}", output.display());
                Ok(report)
            }
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }

    fn write_archive(
        &self,
        temp_path: &Path,
        bytes: &[u8],
        document: &ProjectDocument,
        source: Option<&ProjectSource>,
        report: &mut PackageReport,
    ) -> Result<(), ArchiveError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp_path)?;
        file.lock_exclusive()?;

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut zip = ZipWriter::new(BufWriter::new(&file));

        zip.start_file(self.layout.document_member.as_str(), options)?;
        zip.write_all(bytes)?;

        if let Some(source) = source {
            self.add_auxiliary(&mut zip, options, document, source, report);
            self.add_passthrough(&mut zip, source, report);
        }

        let mut writer = zip.finish()?;
        writer.flush()?;
        Ok(())
    }

    fn add_auxiliary<W: Write + Seek>(
        &self,
        zip: &mut ZipWriter<W>,
        options: SimpleFileOptions,
        document: &ProjectDocument,
        source: &ProjectSource,
        report: &mut PackageReport,
    ) {
        let staged = match stage_auxiliary(source) {
            Ok(Some(staged)) => staged,
            Ok(None) => return,
            Err(e) => {
                log::warn!("auxiliary store omitted: {}", e);
                report.warnings.push(format!("auxiliary store omitted: {}", e));
                return;
            }
        };

        let summary = match self.prune_staged(staged.path(), &document.layer_ids()) {
            Ok(summary) => summary,
            Err(e) => {
                log::warn!("auxiliary store omitted: {}", e);
                report.warnings.push(format!("auxiliary store omitted: {}", e));
                return;
            }
        };
        for failure in &summary.failures {
            report.warnings.push(format!("auxiliary table: {}", failure));
        }

        let copied = zip
            .start_file(self.layout.auxiliary_member.as_str(), options)
            .map_err(ArchiveError::from)
            .and_then(|()| {
                let mut reader = BufReader::new(File::open(staged.path())?);
                io::copy(&mut reader, zip)?;
                Ok(())
            });

        match copied {
            Ok(()) => report.auxiliary = Some(summary),
            Err(e) => {
                log::warn!("auxiliary store omitted: {}", e);
                report.warnings.push(format!("auxiliary store omitted: {}", e));
                let _ = zip.abort_file();
            }
        }
    }

    fn prune_staged(
        &self,
        path: &Path,
        retained: &BTreeSet<String>,
    ) -> Result<AuxiliaryPruneSummary, AuxiliaryError> {
        let store = AuxiliaryStore::open(path)?;
        // An unreadable database is dropped as a whole
        store.table_names()?;
        let summary = store.prune(retained);
        if self.vacuum {
            if let Err(e) = store.vacuum() {
                log::warn!("cannot vacuum auxiliary store: {}", e);
            }
        }
        log::debug!(
            "auxiliary store: {} dropped, {} kept, {} preserved",
            summary.dropped.len(),
            summary.kept.len(),
            summary.preserved.len()
        );
        Ok(summary)
    }

    fn add_passthrough<W: Write + Seek>(
        &self,
        zip: &mut ZipWriter<W>,
        source: &ProjectSource,
        report: &mut PackageReport,
    ) {
        let ProjectSource::Archive {
            path,
            document_member,
            auxiliary_member,
        } = source
        else {
            return;
        };

        let mut archive = match File::open(path)
            .map_err(ArchiveError::from)
            .and_then(|f| Ok(ZipArchive::new(BufReader::new(f))?))
        {
            Ok(archive) => archive,
            Err(e) => {
                log::warn!("cannot reopen {} for passthrough: {}", path.display(), e);
                report.warnings.push(format!("passthrough members omitted: {}", e));
                return;
            }
        };

        let reserved = [
            document_member.as_str(),
            self.layout.document_member.as_str(),
            self.layout.auxiliary_member.as_str(),
        ];

        for index in 0..archive.len() {
            let entry = match archive.by_index_raw(index) {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("cannot read member #{} of {}: {}", index, path.display(), e);
                    report.warnings.push(format!("member #{} omitted: {}", index, e));
                    continue;
                }
            };
            let name = entry.name().to_string();
            if reserved.contains(&name.as_str()) || auxiliary_member.as_deref() == Some(name.as_str()) {
                continue;
            }

            match zip.raw_copy_file(entry) {
                Ok(()) => report.passthrough.push(name),
                Err(e) => {
                    log::warn!("member '{}' omitted: {}", name, e);
                    report.warnings.push(format!("member '{}' omitted: {}", name, e));
                }
            }
        }
    }
}

/// `<output>.tmp`
fn staging_path(output: &Path) -> PathBuf {
    let mut name = OsString::from(output.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Copies the source's auxiliary store into a temporary file
fn stage_auxiliary(source: &ProjectSource) -> Result<Option<NamedTempFile>, ArchiveError> {
    match source {
        ProjectSource::Plain {
            auxiliary: Some(path),
            ..
        } => {
            let mut staged = NamedTempFile::new()?;
            io::copy(&mut File::open(path)?, staged.as_file_mut())?;
            staged.as_file_mut().flush()?;
            Ok(Some(staged))
        }
        ProjectSource::Archive {
            path,
            auxiliary_member: Some(member),
            ..
        } => {
            let mut archive = ZipArchive::new(BufReader::new(File::open(path)?))?;
            let mut entry = archive.by_name(member)?;
            let mut staged = NamedTempFile::new()?;
            io::copy(&mut entry, staged.as_file_mut())?;
            staged.as_file_mut().flush()?;
            Ok(Some(staged))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::loader::LoadedProject;
    use rusqlite::Connection;
    use std::io::Read;
    use tempfile::TempDir;

    const SAMPLE: &str = include_str!("../../tests/fixtures/sample.qgs");

    fn create_store(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE roads_1a2b (ASPK INTEGER PRIMARY KEY, x REAL);
             CREATE TABLE rivers_5e6f (ASPK INTEGER PRIMARY KEY, x REAL);
             CREATE TABLE meta (k TEXT);",
        )
        .unwrap();
    }

    fn build_source(dir: &Path) -> PathBuf {
        let store = dir.join("store.qgd");
        create_store(&store);

        let path = dir.join("source.qgz");
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        let options = SimpleFileOptions::default();
        zip.start_file("source.qgs", options).unwrap();
        zip.write_all(SAMPLE.as_bytes()).unwrap();
        zip.start_file("source.qgd", options).unwrap();
        zip.write_all(&fs::read(&store).unwrap()).unwrap();
        zip.start_file("fonts/custom.ttf", options).unwrap();
        zip.write_all(b"font-bytes").unwrap();
        zip.finish().unwrap();
        path
    }

    fn member_names(path: &Path) -> Vec<String> {
        let archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        names
    }

    fn auxiliary_tables(archive_path: &Path, dir: &Path) -> Vec<String> {
        let mut archive = ZipArchive::new(File::open(archive_path).unwrap()).unwrap();
        let mut bytes = Vec::new();
        archive
            .by_name("project.qgd")
            .unwrap()
            .read_to_end(&mut bytes)
            .unwrap();
        let extracted = dir.join("extracted.qgd");
        fs::write(&extracted, bytes).unwrap();
        AuxiliaryStore::open(&extracted).unwrap().table_names().unwrap()
    }

    #[test]
    fn packages_document_auxiliary_and_passthrough() {
        let dir = TempDir::new().unwrap();
        let source = LoadedProject::open(&build_source(dir.path())).unwrap();

        let mut document = source.document.clone();
        document
            .root_mut()
            .remove_descendants(&mut |el| el.is("maplayer") && el.child_text("id").as_deref() == Some("rivers_5e6f"));

        let output = dir.path().join("out").join("result.qgz");
        let report = ArchiveWriter::new(ArchiveLayout::default())
            .with_vacuum(true)
            .write(&document, &output, Some(&source.source))
            .unwrap();

        assert!(report.warnings.is_empty());
        assert_eq!(report.passthrough, vec!["fonts/custom.ttf"]);
        assert_eq!(
            member_names(&output),
            vec!["fonts/custom.ttf", "project.qgd", "project.qgs"]
        );
        assert!(!staging_path(&output).exists());

        let auxiliary = report.auxiliary.unwrap();
        assert_eq!(auxiliary.dropped, vec!["rivers_5e6f"]);
        assert_eq!(auxiliary_tables(&output, dir.path()), vec!["meta", "roads_1a2b"]);
    }

    #[test]
    fn corrupt_auxiliary_is_omitted_with_warning() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("plain.qgs");
        fs::write(&plain, SAMPLE).unwrap();
        fs::write(dir.path().join("plain.qgd"), b"this is not sqlite").unwrap();
        let source = LoadedProject::open(&plain).unwrap();

        let output = dir.path().join("result.qgz");
        let report = ArchiveWriter::new(ArchiveLayout::default())
            .write(&source.document, &output, Some(&source.source))
            .unwrap();

        assert!(report.auxiliary.is_none());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(member_names(&output), vec!["project.qgs"]);
    }

    #[test]
    fn written_document_reloads() {
        let dir = TempDir::new().unwrap();
        let document = ProjectDocument::parse(SAMPLE.as_bytes()).unwrap();
        let output = dir.path().join("plain-copy.qgz");

        ArchiveWriter::new(ArchiveLayout::default())
            .write(&document, &output, None)
            .unwrap();

        let reloaded = LoadedProject::open(&output).unwrap();
        assert_eq!(reloaded.document.layer_ids(), document.layer_ids());
    }

    #[test]
    fn failed_rename_leaves_no_staging_file() {
        let dir = TempDir::new().unwrap();
        let document = ProjectDocument::parse(SAMPLE.as_bytes()).unwrap();
        let output = dir.path().join("taken.qgz");
        fs::create_dir(&output).unwrap();
        fs::write(output.join("keep.txt"), "x").unwrap();

        let result = ArchiveWriter::new(ArchiveLayout::default()).write(&document, &output, None);

        assert!(result.is_err());
        assert!(!staging_path(&output).exists());
        assert!(output.join("keep.txt").exists());
    }

    #[test]
    fn staging_path_appends_suffix() {
        assert_eq!(
            staging_path(Path::new("/tmp/out.qgz")),
            PathBuf::from("/tmp/out.qgz.tmp")
        );
    }
}
