use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateFillError {
    #[error("Failed to load template {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("Failed to save document to {path}: {reason}")]
    Save { path: PathBuf, reason: String },

    #[error("Invalid field map: {0}")]
    InvalidFieldMap(String),

    #[error("Unsupported template format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid document package: {0}")]
    InvalidDocument(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TemplateFillError {
    pub fn load(path: &Path, reason: impl ToString) -> Self {
        Self::Load {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn save(path: &Path, reason: impl ToString) -> Self {
        Self::Save {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TemplateFillError>;
