//! Error handling for CHIANTI ingestion.
//!
//! Every failure that concerns a single source carries that source's
//! identifier, and where it applies the offending line, row and column, so
//! batch drivers can report per-source failures and keep going.

use std::path::PathBuf;
use thiserror::Error;

use crate::decoder::DecodeError;
use crate::table::TableError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error("Source not found: {source_id}")]
    SourceNotFound { source_id: String },

    #[error("Malformed source {source_id}{}: {reason}", fmt_line(.line))]
    MalformedSource {
        source_id: String,
        line: Option<usize>,
        reason: String,
    },

    #[error("Schema mismatch in {source_id}, column '{column}'{}: {reason}", fmt_row(.row))]
    SchemaMismatch {
        source_id: String,
        column: String,
        row: Option<usize>,
        reason: String,
    },

    #[error("Invalid store file {path}: {reason}")]
    StoreFormat { path: PathBuf, reason: String },

    #[error("Store layout conflict at '{path}': {reason}")]
    StoreLayout { path: String, reason: String },

    #[error("Cannot read version marker {path}: {reason}")]
    VersionMarker { path: PathBuf, reason: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Store lock poisoned by a panicked writer")]
    StoreLock,
}

pub type Result<T> = std::result::Result<T, Error>;

fn fmt_line(line: &Option<usize>) -> String {
    line.map(|l| format!(" (line {l})")).unwrap_or_default()
}

fn fmt_row(row: &Option<usize>) -> String {
    row.map(|r| format!(" (row {r})")).unwrap_or_default()
}

impl Error {
    /// Missing sources are skipped by batch ingestion rather than failing it
    pub fn is_skippable(&self) -> bool {
        matches!(self, Error::SourceNotFound { .. })
    }

    /// Identifier of the source this error belongs to, if any
    pub fn source_id(&self) -> Option<&str> {
        match self {
            Error::SourceNotFound { source_id }
            | Error::MalformedSource { source_id, .. }
            | Error::SchemaMismatch { source_id, .. } => Some(source_id),
            _ => None,
        }
    }

    pub fn from_decode(source_id: impl Into<String>, error: DecodeError) -> Self {
        Error::MalformedSource {
            source_id: source_id.into(),
            line: error.line,
            reason: error.reason,
        }
    }

    pub fn from_table(source_id: impl Into<String>, error: TableError) -> Self {
        let source_id = source_id.into();
        match error {
            TableError::RowWidth {
                line,
                expected,
                found,
            } => Error::MalformedSource {
                source_id,
                line: Some(line),
                reason: format!("declared row width {expected} but decoded {found} fields"),
            },
            TableError::Cast {
                column,
                row,
                reason,
            } => Error::SchemaMismatch {
                source_id,
                column,
                row,
                reason,
            },
            TableError::Polars(e) => Error::Polars(e),
        }
    }

    pub fn store_layout(path: impl ToString, reason: impl Into<String>) -> Self {
        Error::StoreLayout {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}
