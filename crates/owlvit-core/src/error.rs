//! Error types for the OWL-ViT detector.
//!
//! Configuration problems (bad TOML, unknown presets, malformed checkpoints)
//! are kept apart from model errors raised while running the forward graph,
//! so callers can tell a broken setup from a bad input.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for OWL-ViT operations.
#[derive(Error, Debug)]
pub enum OwlError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Model construction or inference errors
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors. None of these are recoverable at runtime.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// Body variant is not one of the known architecture presets
    #[error("Unknown body variant '{0}' (expected one of vit_b32, vit_b16, vit_l14, vit_l14_336)")]
    UnknownVariant(String),

    /// Box bias kind is not location, size or both
    #[error("Unknown box bias '{0}' (expected location, size or both)")]
    UnknownBoxBias(String),

    /// A restored checkpoint has neither `params` nor `optimizer.target`
    #[error("Malformed checkpoint {path}: {message}")]
    MalformedCheckpoint { path: PathBuf, message: String },

    /// Parameter loading was requested without a checkpoint path
    #[error("init.checkpoint_path is required to load parameters")]
    MissingCheckpointPath,
}

/// Errors raised while building or running the detection graph.
#[derive(Error, Debug)]
pub enum ModelError {
    /// Arguments that are inconsistent with each other
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Tensor shapes that cannot be combined or reshaped
    #[error("Shape error: {0}")]
    Shape(String),

    /// A parameter required by a head is absent from the tree
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    /// Reading or writing a checkpoint file failed
    #[error("Checkpoint error for {path}: {message}")]
    Checkpoint { path: PathBuf, message: String },

    /// Backbone embedder failure (session creation, inference, output extraction)
    #[error("Embedder error: {message}")]
    Embedder { message: String },

    /// Tokenizer failure
    #[error("Tokenizer error: {message}")]
    Tokenizer { message: String },

    /// Image could not be opened or decoded
    #[error("Image error for {path}: {message}")]
    Image { path: PathBuf, message: String },
}

impl From<ndarray::ShapeError> for ModelError {
    fn from(e: ndarray::ShapeError) -> Self {
        ModelError::Shape(e.to_string())
    }
}

/// Convenience type alias for OWL-ViT results.
pub type Result<T> = std::result::Result<T, OwlError>;

/// Convenience type alias for model-level results.
pub type ModelResult<T> = std::result::Result<T, ModelError>;
