//! # AppError
//!
//! Centralized error handling for the thread-finder ecosystem.
//! Maps search and voting failures to actionable error types.

use thiserror::Error;

/// The primary error type for all tf-core operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// Validation failure (e.g., malformed time range, limit out of bounds)
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Infrastructure failure (e.g., DB down)
    #[error("internal service error: {0}")]
    Internal(String),

    /// A search could not be executed. Details are logged, never returned.
    #[error("search failed")]
    SearchFailed,
}

/// A specialized Result type for thread-finder logic.
pub type Result<T> = std::result::Result<T, AppError>;
