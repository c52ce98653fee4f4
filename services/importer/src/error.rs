//! Error taxonomy for the importer.
//!
//! Which of these are fatal depends on where they surface:
//! - `SourceNotFound` aborts the whole orchestration
//! - `AmbiguousFormat` and `Persistence` roll back the current file only
//! - `RowParse` and `UnresolvedMunicipality` are counted and skipped, unless
//!   the import class runs with the `abort` row policy

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ImportError>;

#[derive(Error, Debug)]
pub enum ImportError {
    /// Planned source file or directory does not exist
    #[error("Source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// File layout cannot be interpreted without guessing
    #[error("AMBIGUITY: {0}")]
    AmbiguousFormat(String),

    /// Malformed row (wrong column count, invalid required number)
    #[error("Line {line}: {reason}")]
    RowParse { line: usize, reason: String },

    /// Municipality name did not match the lookup table
    #[error("Line {line}: unresolved municipality '{name}'")]
    UnresolvedMunicipality { line: usize, name: String },

    /// Per-file state machine misuse
    #[error("Invalid file state transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Plan file could not be interpreted
    #[error("Invalid import plan: {0}")]
    Plan(String),

    /// Database write or read failure
    #[error("Database error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl ImportError {
    /// Errors that only concern one row and may be skipped under the `skip` policy
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            ImportError::RowParse { .. } | ImportError::UnresolvedMunicipality { .. }
        )
    }
}
