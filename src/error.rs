use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, FoodError>;

/// Errors raised by the training and inference pipeline.
///
/// Per-sample decode failures during dataset loading are not represented
/// here: loaders log and skip them. Everything below is surfaced to the
/// caller, which decides whether it is fatal (training) or degrades the
/// service (inference).
#[derive(Error, Debug)]
pub enum FoodError {
    /// Missing dataset directories or an invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// A split that must contain samples has none.
    #[error("dataset '{split}' contains no samples")]
    EmptyDataset { split: String },

    /// The model artifact or class list is missing, empty or inconsistent.
    #[error("artifact error: {0}")]
    Artifact(String),

    /// Image bytes could not be decoded.
    #[error("image decode error: {0}")]
    Image(#[from] image::ImageError),

    /// The caller supplied something that is not a usable image.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A tensor did not have the dimensions an operation expects.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    Shape { expected: String, actual: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FoodError {
    pub fn config(msg: impl Into<String>) -> Self {
        FoodError::Config(msg.into())
    }

    pub fn artifact(msg: impl Into<String>) -> Self {
        FoodError::Artifact(msg.into())
    }

    pub fn empty(split: impl Into<String>) -> Self {
        FoodError::EmptyDataset { split: split.into() }
    }

    pub fn shape(expected: impl ToString, actual: impl ToString) -> Self {
        FoodError::Shape { expected: expected.to_string(), actual: actual.to_string() }
    }

    /// True when the error was caused by the request payload rather than
    /// by the service itself.
    pub fn is_client_error(&self) -> bool {
        matches!(self, FoodError::Image(_) | FoodError::InvalidInput(_))
    }
}
