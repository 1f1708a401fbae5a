//! Error handling module
//!
//! Provides unified error types for schema analysis, resolution handling and
//! data migration.

use crate::config::ConfigError;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Schema extraction failed: {0}")]
    SchemaExtraction(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Settings(#[from] ConfigError),

    #[error("{count} breaking change(s) have no resolution")]
    UnresolvedBreakingChanges { count: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_)
            | AppError::Settings(_)
            | AppError::NotFound(_)
            | AppError::Validation(_)
            | AppError::Io(_)
            | AppError::Json(_) => 2,
            AppError::UnresolvedBreakingChanges { .. } => 3,
            AppError::Database(_)
            | AppError::Pool(_)
            | AppError::Connection(_)
            | AppError::SchemaExtraction(_) => 1,
        }
    }
}

/// Result type alias used across the crate
pub type AppResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}

/// Helper function to create a not found error
pub fn not_found_error(msg: impl Into<String>) -> AppError {
    AppError::NotFound(msg.into())
}
