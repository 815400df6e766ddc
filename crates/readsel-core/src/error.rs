//! Error types for the core crate.

use thiserror::Error;

use crate::document::NodeId;

/// Failures reported by a [`HostDocument`](crate::document::HostDocument).
#[derive(Debug, Clone, Error)]
pub enum DocumentError {
    /// The node was removed from the page or never existed.
    #[error("Node {0} is gone")]
    NodeGone(NodeId),

    /// An event operation was attempted without an active subscription.
    #[error("Document is not being observed")]
    NotObserving,

    /// A failure injected by a test double.
    #[error("Injected failure: {0}")]
    Injected(String),

    /// Any failure reported by the backend driving the page.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Errors raised by the augmenter and its components.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A document operation failed.
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// A structural pattern could not be parsed.
    #[error("Invalid pattern {field} ('{source_text}'): {message}")]
    InvalidPattern {
        field: String,
        source_text: String,
        message: String,
    },

    /// The keyboard shortcut could not be parsed.
    #[error("Invalid shortcut '{0}'")]
    InvalidShortcut(String),

    /// The configuration failed validation.
    #[error("Configuration error: {0}")]
    Config(#[from] readsel_config::ConfigError),

    /// `start` was called on a running augmenter.
    #[error("Augmenter is already running")]
    AlreadyRunning,

    /// `stop` was called on an augmenter that is not running.
    #[error("Augmenter is not running")]
    NotRunning,
}

/// Result type for document operations.
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
