//! Error types for extract-core
//!
//! This module provides the engine error type and user-friendly error formatting.

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("invalid configuration: {field}")]
    InvalidConfig {
        /// Config field name
        field: String,
        /// Detailed message
        message: String,
    },

    /// The orchestrator was initialized more than once
    #[error("orchestrator already initialized")]
    AlreadyInitialized,

    /// The orchestrator was used before initialization
    #[error("orchestrator not initialized")]
    NotInitialized,

    /// Invalid recurring job definition
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// Entity not found
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind
        entity: &'static str,
        /// Entity identifier
        id: i64,
    },

    /// Plugin failure
    #[error("plugin error: {0}")]
    Plugin(String),

    /// Notification failure
    #[error("notification error: {0}")]
    Notification(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Trait for user-friendly error messages
///
/// Provides human-readable error messages and suggestions for fixing them.
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get a suggestion for how to fix the error
    fn suggestion(&self) -> Option<String>;
}

impl UserFriendlyError for Error {
    fn user_message(&self) -> String {
        match self {
            Error::Database(e) => format!("Database error: {}", e),
            Error::Serialization(e) => format!("Invalid stored data: {}", e),
            Error::InvalidConfig { field, message } => {
                format!("Configuration error in '{}': {}", field, message)
            }
            Error::AlreadyInitialized => {
                "The orchestrator has already been initialized.".to_string()
            }
            Error::NotInitialized => "The orchestrator has not been initialized yet.".to_string(),
            Error::InvalidJob(msg) => format!("Invalid job definition: {}", msg),
            Error::NotFound { entity, id } => format!("The {} {} does not exist.", entity, id),
            Error::Plugin(msg) => format!("Plugin failure: {}", msg),
            Error::Notification(msg) => format!("Notification failure: {}", msg),
            Error::Internal(msg) => format!("Internal error: {}", msg),
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            Error::Database(_) => {
                Some("Check the 'database.path' setting and the file permissions.".to_string())
            }
            Error::InvalidConfig { field, .. } => Some(format!(
                "Check the '{}' setting in config/default.toml or the EXTRACT_ environment variables.",
                field
            )),
            Error::AlreadyInitialized | Error::NotInitialized => Some(
                "Create one orchestrator at startup and initialize it exactly once.".to_string(),
            ),
            Error::InvalidJob(_) => {
                Some("Check the import frequency of the connector.".to_string())
            }
            _ => None,
        }
    }
}

/// Format an error for display in the CLI
pub fn format_error_for_cli(error: &Error) -> String {
    let mut output = String::new();

    output.push_str(&error.user_message());
    output.push('\n');

    if let Some(suggestion) = error.suggestion() {
        output.push('\n');
        output.push_str(&suggestion);
        output.push('\n');
    }

    output
}
