//! Error taxonomy for the editor core.

use std::path::PathBuf;
use thiserror::Error;

/// Every failure the editor core can report.
#[derive(Debug, Error)]
pub enum EditorError {
    // === Editor state ===
    #[error("No document is open")]
    NoDocument,

    #[error("No transaction is open")]
    NoTransaction,

    #[error("A transaction is already in progress")]
    TransactionInProgress,

    #[error("The open document has unsaved changes")]
    UnsavedChanges,

    // === Tool input ===
    #[error("Invalid color format: {value}")]
    InvalidColorFormat { value: String },

    #[error("Invalid region: {message}")]
    InvalidRegion { message: String },

    #[error("The color of this tool cannot be changed")]
    ColorLocked,

    #[error("No color has been selected for replacement")]
    NoColorSelected,

    // === Surfaces and import ===
    #[error("Unable to allocate a {width}x{height} drawing surface")]
    Memory { width: u32, height: u32 },

    #[error("Invalid image: {message}")]
    InvalidImage { message: String },

    #[error("File error '{path}': {message}")]
    File { path: PathBuf, message: String },

    // === Collaborators ===
    #[error("Unsupported clipboard type '{mime}', only image/png is accepted")]
    UnsupportedClipboardType { mime: String },

    #[error("Clipboard error: {message}")]
    Clipboard { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },
}

pub type Result<T> = std::result::Result<T, EditorError>;

impl EditorError {
    pub fn invalid_region(message: impl Into<String>) -> Self {
        EditorError::InvalidRegion { message: message.into() }
    }

    pub fn invalid_image(message: impl Into<String>) -> Self {
        EditorError::InvalidImage { message: message.into() }
    }

    /// True for the four editor-state contract violations.
    pub fn is_state_violation(&self) -> bool {
        matches!(
            self,
            EditorError::NoDocument
                | EditorError::NoTransaction
                | EditorError::TransactionInProgress
                | EditorError::UnsavedChanges
        )
    }
}

impl From<image::ImageError> for EditorError {
    fn from(e: image::ImageError) -> Self {
        EditorError::InvalidImage { message: e.to_string() }
    }
}

impl From<bincode::Error> for EditorError {
    fn from(e: bincode::Error) -> Self {
        EditorError::Storage { message: e.to_string() }
    }
}
