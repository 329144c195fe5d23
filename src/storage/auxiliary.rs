//! Auxiliary storage (`.qgd`)
//!
//! The auxiliary store is a SQLite database holding one table per layer,
//! named after the layer id. Layer-scoped tables carry the `ASPK` primary
//! key column; any other table belongs to the project as a whole and is
//! never touched.
//!
//! Pruning is best-effort: a table that cannot be inspected or dropped is
//! logged and skipped.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use thiserror::Error;

/// Primary key column of layer-scoped tables
pub const MARKER_COLUMN: &str = "ASPK";

#[derive(Debug, Error)]
pub enum AuxiliaryError {
    #[error("Auxiliary store not found at {0}")]
    NotFound(PathBuf),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// A table of the auxiliary store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuxiliaryTable {
    pub name: String,
    pub layer_scoped: bool,
    pub rows: Option<i64>,
}

/// Outcome of pruning the store against a set of retained layers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuxiliaryPruneSummary {
    pub dropped: Vec<String>,
    pub kept: Vec<String>,
    /// Tables without the marker column
    pub preserved: Vec<String>,
    pub failures: Vec<String>,
}

impl AuxiliaryPruneSummary {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// An open auxiliary store
pub struct AuxiliaryStore {
    path: PathBuf,
    conn: Connection,
}

impl AuxiliaryStore {
    /// Opens an existing store for reading and writing
    pub fn open(path: &Path) -> Result<Self, AuxiliaryError> {
        if !path.is_file() {
            return Err(AuxiliaryError::NotFound(path.to_path_buf()));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// User table names, sorted
    pub fn table_names(&self) -> Result<Vec<String>, AuxiliaryError> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Whether the table carries the marker primary key column
    pub fn is_layer_scoped(&self, table: &str) -> Result<bool, AuxiliaryError> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns.iter().any(|c| c.eq_ignore_ascii_case(MARKER_COLUMN)))
    }

    pub fn row_count(&self, table: &str) -> Result<i64, AuxiliaryError> {
        let count = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn tables(&self) -> Result<Vec<AuxiliaryTable>, AuxiliaryError> {
        let mut tables = Vec::new();
        for name in self.table_names()? {
            tables.push(AuxiliaryTable {
                layer_scoped: self.is_layer_scoped(&name)?,
                rows: self.row_count(&name).ok(),
                name,
            });
        }
        Ok(tables)
    }

    /// Drops every layer-scoped table whose name is not a retained layer id
    pub fn prune(&self, retained: &BTreeSet<String>) -> AuxiliaryPruneSummary {
        let mut summary = AuxiliaryPruneSummary::default();

        let names = match self.table_names() {
            Ok(names) => names,
            Err(e) => {
                log::warn!("cannot list tables of {}: {}", self.path.display(), e);
                summary.failures.push(format!("list tables: {}", e));
                return summary;
            }
        };

        for name in names {
            match self.is_layer_scoped(&name) {
                Ok(false) => summary.preserved.push(name),
                Ok(true) if retained.contains(&name) => summary.kept.push(name),
                Ok(true) => match self.drop_table(&name) {
                    Ok(()) => {
                        log::debug!("dropped auxiliary table '{}'", name);
                        summary.dropped.push(name);
                    }
                    Err(e) => {
                        log::warn!("cannot drop auxiliary table '{}': {}", name, e);
                        summary.failures.push(format!("{}: {}", name, e));
                    }
                },
                Err(e) => {
                    log::warn!("cannot inspect auxiliary table '{}': {}", name, e);
                    summary.failures.push(format!("{}: {}", name, e));
                }
            }
        }

        summary
    }

    fn drop_table(&self, table: &str) -> Result<(), AuxiliaryError> {
        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))?;
        Ok(())
    }

    /// Reclaims the space of dropped tables
    pub fn vacuum(&self) -> Result<(), AuxiliaryError> {
        self.conn.execute_batch("VACUUM")?;
        Ok(())
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
