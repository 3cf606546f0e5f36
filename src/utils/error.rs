//! Error Handling Module
//!
//! Defines the error type shared by every stage of the pipeline.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for pixelshift operations
#[derive(Error, Debug)]
pub enum PixelShiftError {
    /// A catalog directory is missing or cannot be listed
    #[error("Failed to discover images in '{0}': {1}")]
    Discovery(PathBuf, String),

    /// A path could not be decoded as an image
    #[error("Failed to decode image at '{0}': {1}")]
    Decode(PathBuf, String),

    /// Paired lists or tensors do not have the expected shape
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A checkpoint exists but could not be loaded into the network
    #[error("Failed to load checkpoint '{0}': {1}")]
    CheckpointLoad(PathBuf, String),

    /// Writing the checkpoint failed
    #[error("Failed to save checkpoint '{0}': {1}")]
    CheckpointSave(PathBuf, String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Writing an output image failed
    #[error("Failed to render '{0}': {1}")]
    Render(PathBuf, String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<serde_json::Error> for PixelShiftError {
    fn from(err: serde_json::Error) -> Self {
        PixelShiftError::Serialization(err.to_string())
    }
}

/// Convenience Result type for pixelshift operations
pub type Result<T> = std::result::Result<T, PixelShiftError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| PixelShiftError::InvalidInput(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| PixelShiftError::InvalidInput(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| PixelShiftError::InvalidInput(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| PixelShiftError::InvalidInput(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PixelShiftError::ShapeMismatch("3 inputs vs 4 targets".to_string());
        assert_eq!(format!("{}", err), "Shape mismatch: 3 inputs vs 4 targets");
    }

    #[test]
    fn test_decode_error_names_path() {
        let path = PathBuf::from("/data/images/Abyssinian_1.jpg");
        let err = PixelShiftError::Decode(path, "unexpected EOF".to_string());
        assert!(format!("{}", err).contains("Abyssinian_1.jpg"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PixelShiftError = io_err.into();
        assert!(matches!(err, PixelShiftError::Io(_)));
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<i32, std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"));

        let with_context = result.context("Failed to read file");
        assert!(with_context.is_err());
    }

    #[test]
    fn test_option_context() {
        let opt: Option<i32> = None;
        let with_context = opt.with_context(|| "Value was None".to_string());
        assert!(matches!(with_context, Err(PixelShiftError::InvalidInput(_))));
    }
}
