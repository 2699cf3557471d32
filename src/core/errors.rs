// src/core/errors.rs

//! Defines the primary error type for the analysis pipeline.

use thiserror::Error;

/// The main error enum for VigilRoute's core pipeline.
///
/// Matches the error kinds named in the error-handling design: most variants
/// are recovered locally (logged and swallowed) at an analyzer or request
/// boundary; only `ConfigInvalid` and `SourceAdapterFailed` are meant to
/// propagate to the process boundary.
#[derive(Error, Debug, Clone)]
pub enum AppError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("source adapter failed: {0}")]
    SourceAdapterFailed(String),

    #[error("failed to parse log line: {0}")]
    ParseError(String),

    #[error("analyzer '{analyzer}' failed to process request: {reason}")]
    AnalyzerProcessError { analyzer: String, reason: String },

    #[error("analyzer '{analyzer}' failed to report rules: {reason}")]
    AnalyzerReportError { analyzer: String, reason: String },

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("record not found")]
    NotFound,

    #[error("file size for '{0}' could not be resolved")]
    FileSizeUnresolvable(String),
}

impl From<sled::Error> for AppError {
    fn from(e: sled::Error) -> Self {
        AppError::StorageError(e.to_string())
    }
}

impl From<sled::transaction::TransactionError<AppError>> for AppError {
    fn from(e: sled::transaction::TransactionError<AppError>) -> Self {
        match e {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(e) => AppError::StorageError(e.to_string()),
        }
    }
}
