//! Error types for the tuneserve system

use thiserror::Error;

/// Main error type for tuneserve operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Training payload could not be unwrapped into a list of examples
    #[error("Invalid data shape: {0}")]
    InvalidDataShape(String),

    /// No known training-data format matched the first example
    #[error("Unsupported data format: {0}")]
    UnsupportedFormat(String),

    /// The normalized training corpus contained no examples
    #[error("Training dataset is empty")]
    EmptyDataset,

    /// Model identifier has no artifact on disk
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Training job identifier has no registry entry
    #[error("Training job not found: {0}")]
    JobNotFound(String),

    /// The model backend failed to load a model
    #[error("Backend load failure: {0}")]
    BackendLoad(String),

    /// The model backend failed during the optimization loop
    #[error("Backend training failure: {0}")]
    BackendTraining(String),

    /// Local resource directory has no entry for the requested location
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Tensor operation error
    #[error("Tensor operation error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for tuneserve operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid-data-shape error
    pub fn invalid_data_shape(msg: impl Into<String>) -> Self {
        Self::InvalidDataShape(msg.into())
    }

    /// Create an unsupported-format error
    pub fn unsupported_format(msg: impl Into<String>) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    /// Create a model-not-found error
    pub fn model_not_found(msg: impl Into<String>) -> Self {
        Self::ModelNotFound(msg.into())
    }

    /// Create a job-not-found error
    pub fn job_not_found(msg: impl Into<String>) -> Self {
        Self::JobNotFound(msg.into())
    }

    /// Create a backend load error
    pub fn backend_load(msg: impl Into<String>) -> Self {
        Self::BackendLoad(msg.into())
    }

    /// Create a backend training error
    pub fn backend_training(msg: impl Into<String>) -> Self {
        Self::BackendTraining(msg.into())
    }

    /// Create a resource-not-found error
    pub fn resource_not_found(msg: impl Into<String>) -> Self {
        Self::ResourceNotFound(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
