//! Error types for model, weight and image operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for model operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors that can occur while loading weights, building layers or reading images
#[derive(Debug, Error)]
pub enum ModelError {
    /// File not found or cannot be read
    #[error("File not found: {path}")]
    FileNotFound {
        /// Path that was attempted
        path: PathBuf,
    },

    /// Weight file does not start with the expected magic bytes
    #[error("Invalid weight file header: expected magic bytes \"Q7NN\"")]
    InvalidHeader,

    /// Weight file written by an unknown format revision
    #[error("Unsupported weight file version: {version} (expected 1)")]
    UnsupportedVersion {
        /// Version found in the file
        version: u16,
    },

    /// Tensor length does not match the layer's compile-time shape
    #[error("Shape mismatch in {layer}: expected {expected} elements, got {actual}")]
    ShapeMismatch {
        /// Layer and tensor name
        layer: String,
        /// Element count required by the layer geometry
        expected: usize,
        /// Element count supplied
        actual: usize,
    },

    /// Weight file is truncated or structurally invalid
    #[error("Failed to parse weight file: {reason}")]
    ParseError {
        /// Reason for failure
        reason: String,
    },

    /// Image buffer has the wrong size
    #[error("Invalid image: expected {expected} bytes, got {actual}")]
    InvalidImage {
        /// Required byte count (32×32×3)
        expected: usize,
        /// Byte count supplied
        actual: usize,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl ModelError {
    /// Create a parse error
    pub fn parse_error(reason: impl Into<String>) -> Self {
        Self::ParseError {
            reason: reason.into(),
        }
    }

    /// Create a shape mismatch error
    pub fn shape_mismatch(layer: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::ShapeMismatch {
            layer: layer.into(),
            expected,
            actual,
        }
    }
}
