//! Error types shared by the distribution pipeline.
//!
//! Collaborators (stores, transports, user context) report failures as a boxed
//! error, the same shape every trait in [`crate::contract`] returns. The pipeline
//! wraps those into [`DistributorError`] when it needs to surface them, but most
//! call sites log and degrade to "keep the original reference" instead.

use thiserror::Error;

/// Error type returned by collaborator traits.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for distribution operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DistributorError {
    /// The content store failed to read or write.
    #[error("Store error: {0}")]
    Store(#[source] BoxError),

    /// A push, pull or sync-log call on a connection failed.
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// A post, attachment or term that was expected to exist is missing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The connection type or id could not be resolved.
    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type DistributorResult<T> = Result<T, DistributorError>;
