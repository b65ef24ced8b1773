use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("Unsupported file format '{extension}': {path}")]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("Registry source {path} unusable: {reason}")]
    Registry { path: PathBuf, reason: String },

    #[error("Registry source {path} has no '{column}' column")]
    MissingRegistryColumn { path: PathBuf, column: String },

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No input files: {0}")]
    NoInput(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
