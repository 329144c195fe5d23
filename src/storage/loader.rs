//! Project loading
//!
//! Opens a `.qgz` archive or a plain `.qgs` document and locates its
//! auxiliary store (a `.qgd` member of the archive, or a sibling `.qgd`
//! file next to a plain document).

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::ZipArchive;

use crate::domain::{ProjectDocument, XmlError};

const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Project not found: {0}")]
    NotFound(PathBuf),

    #[error("Archive {0} contains no .qgs project document")]
    NoDocument(PathBuf),

    #[error("Invalid project archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Failed to parse project document {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: XmlError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a loaded project came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectSource {
    Archive {
        path: PathBuf,
        document_member: String,
        auxiliary_member: Option<String>,
    },
    Plain {
        path: PathBuf,
        auxiliary: Option<PathBuf>,
    },
}

impl ProjectSource {
    pub fn path(&self) -> &Path {
        match self {
            ProjectSource::Archive { path, .. } | ProjectSource::Plain { path, .. } => path,
        }
    }

    pub fn is_archive(&self) -> bool {
        matches!(self, ProjectSource::Archive { .. })
    }

    pub fn has_auxiliary(&self) -> bool {
        match self {
            ProjectSource::Archive { auxiliary_member, .. } => auxiliary_member.is_some(),
            ProjectSource::Plain { auxiliary, .. } => auxiliary.is_some(),
        }
    }
}

/// A parsed project and its source
#[derive(Debug, Clone)]
pub struct LoadedProject {
    pub document: ProjectDocument,
    pub source: ProjectSource,
}

impl LoadedProject {
    /// Opens a project archive or plain document
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        if !path.is_file() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }

        if is_archive(path)? {
            Self::open_archive(path)
        } else {
            Self::open_plain(path)
        }
    }

    fn open_archive(path: &Path) -> Result<Self, LoadError> {
        let archive_error = |source| LoadError::Archive {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path)?;
        let mut archive = ZipArchive::new(BufReader::new(file)).map_err(archive_error)?;

        let mut document_member = None;
        let mut auxiliary_member = None;
        for index in 0..archive.len() {
            let entry = archive.by_index_raw(index).map_err(archive_error)?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let lowered = name.to_lowercase();
            if document_member.is_none() && lowered.ends_with(".qgs") {
                document_member = Some(name);
            } else if auxiliary_member.is_none() && lowered.ends_with(".qgd") {
                auxiliary_member = Some(name);
            }
        }

        let document_member = document_member.ok_or_else(|| LoadError::NoDocument(path.to_path_buf()))?;
        log::debug!(
            "archive {}: document '{}', auxiliary {:?}",
            path.display(),
            document_member,
            auxiliary_member
        );

        let mut bytes = Vec::new();
        archive
            .by_name(&document_member)
            .map_err(archive_error)?
            .read_to_end(&mut bytes)?;

        let document = ProjectDocument::parse(&bytes).map_err(|source| LoadError::Parse {
            path: path.join(&document_member),
            source,
        })?;

        Ok(Self {
            document,
            source: ProjectSource::Archive {
                path: path.to_path_buf(),
                document_member,
                auxiliary_member,
            },
        })
    }

    fn open_plain(path: &Path) -> Result<Self, LoadError> {
        let bytes = fs::read(path)?;
        let document = ProjectDocument::parse(&bytes).map_err(|source| LoadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let sibling = path.with_extension("qgd");
        let auxiliary = sibling.is_file().then_some(sibling);
        log::debug!("plain project {}: auxiliary {:?}", path.display(), auxiliary);

        Ok(Self {
            document,
            source: ProjectSource::Plain {
                path: path.to_path_buf(),
                auxiliary,
            },
        })
    }
}

/// Zip magic bytes first, then the `.qgz` extension
pub fn is_archive(path: &Path) -> Result<bool, LoadError> {
    let mut magic = [0u8; 4];
    let mut file = File::open(path)?;
    let read = file.read(&mut magic)?;
    if read == magic.len() && &magic == ZIP_MAGIC {
        return Ok(true);
    }
    Ok(path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("qgz")))
}
