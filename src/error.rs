use thiserror::Error;

use crate::session::ImportState;

#[derive(Error, Debug)]
pub enum PennywiseError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown group: {0}")]
    UnknownGroup(String),

    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    #[error("Invalid mapping '{0}': expected IDENTITY=USER_ID")]
    InvalidMapping(String),

    #[error("Every payer must be mapped to a group member before importing. Unmapped: {}", .unmapped.join(", "))]
    MappingIncomplete { unmapped: Vec<String> },

    #[error("No files to import")]
    NothingToImport,

    #[error("Import session is not ready to submit (state: {0})")]
    NotReady(ImportState),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PennywiseError>;

/// Why a whole file could not be imported. These are recorded on the file,
/// never returned as `Err` out of the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FileFailure {
    #[error("Failed to read file: {0}")]
    Unreadable(String),

    #[error("CSV file must have at least a header and one data row")]
    Empty,

    #[error("CSV file is missing required headers: {}", .0.join(", "))]
    MissingHeaders(Vec<String>),

    #[error("no valid transactions found")]
    NoValidTransactions,

    #[error("{0}")]
    Submission(String),
}
