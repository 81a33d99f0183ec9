//! Error types shared by every stage of the pipeline.
//!
//! Batch operations (normalize, sequence, organize) report and count filesystem
//! problems instead of returning them; the variants below are what escapes a
//! single step.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PaperError {
    /// Title reconstruction for one file produced nothing usable.
    #[error("Could not reconstruct title for {file}: {message}")]
    Enrichment { file: String, message: String },

    /// A rename/move/copy target already exists.
    #[error("Target already exists: {}", path.display())]
    FileConflict { path: PathBuf },

    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// A model response that is not the JSON shape we asked for.
    #[error("Failed to parse model response ({stage}): {message}")]
    Parse { stage: String, message: String },

    /// HTTP failure, non-success status or missing credentials.
    #[error("Model service error: {message}")]
    Service { message: String },

    #[error("Unsupported document type '{extension}': {}", path.display())]
    Unsupported { path: PathBuf, extension: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PaperError>;

impl PaperError {
    pub fn service(message: impl Into<String>) -> Self {
        PaperError::Service { message: message.into() }
    }

    pub fn parse(stage: impl Into<String>, message: impl Into<String>) -> Self {
        PaperError::Parse { stage: stage.into(), message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        PaperError::Config { message: message.into() }
    }

    /// Whether the failure only concerns a single file and the batch may continue.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            PaperError::Enrichment { .. }
                | PaperError::FileConflict { .. }
                | PaperError::FileNotFound { .. }
                | PaperError::Unsupported { .. }
                | PaperError::Io(_)
        )
    }
}
