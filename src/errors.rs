//! Error types for gatekeeper
//!
//! Each error type has a corresponding error code for programmatic handling.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for gatekeeper operations
pub type Result<T> = std::result::Result<T, GatekeeperError>;

/// Main error type for all gatekeeper operations
#[derive(Debug, Error)]
pub enum GatekeeperError {
    /// Undeclared transition, or a guard/condition rejected it
    #[error("State transition error: {0}")]
    StateTransition(String),

    /// No state machine is configured for the entity type
    #[error("No state machine defined for entity type '{0}'")]
    MissingStateMachine(String),

    /// Reading or writing an evidence artifact failed
    #[error("Evidence error at {}: {message}", .path.display())]
    Evidence { path: PathBuf, message: String },

    /// Another process holds the lock past the deadline
    #[error("Timed out after {waited_ms}ms waiting for lock {namespace}/{key}{}", holder_suffix(.holder))]
    LockTimeout {
        namespace: String,
        key: String,
        waited_ms: u64,
        holder: Option<String>,
    },

    /// Engine refused by the allow-list policy
    #[error("Engine '{0}' is not allowed by the current execution policy")]
    EngineNotAllowed(String),

    /// Engine could not be resolved or started
    #[error("Engine error: {0}")]
    EngineError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Entity lookup failed
    #[error("{entity_type} '{id}' not found")]
    EntityNotFound { entity_type: String, id: String },

    /// Entity document has a malformed header
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Invalid JSON format
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// File not found
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Git operation error
    #[error("Git error: {0}")]
    GitError(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic wrapped error with context
    #[error("{context}: {message}")]
    Wrapped { context: String, message: String },
}

fn holder_suffix(holder: &Option<String>) -> String {
    match holder {
        Some(h) => format!(" (held by {})", h),
        None => String::new(),
    }
}

impl GatekeeperError {
    /// Get the error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            GatekeeperError::StateTransition(_) => "STATE_TRANSITION",
            GatekeeperError::MissingStateMachine(_) => "MISSING_STATE_MACHINE",
            GatekeeperError::Evidence { .. } => "EVIDENCE_ERROR",
            GatekeeperError::LockTimeout { .. } => "LOCK_TIMEOUT",
            GatekeeperError::EngineNotAllowed(_) => "ENGINE_NOT_ALLOWED",
            GatekeeperError::EngineError(_) => "ENGINE_ERROR",
            GatekeeperError::ConfigError(_) => "CONFIG_ERROR",
            GatekeeperError::EntityNotFound { .. } => "ENTITY_NOT_FOUND",
            GatekeeperError::InvalidDocument(_) => "INVALID_DOCUMENT",
            GatekeeperError::InvalidJson(_) => "INVALID_JSON",
            GatekeeperError::FileNotFound(_) => "FILE_NOT_FOUND",
            GatekeeperError::GitError(_) => "GIT_ERROR",
            GatekeeperError::Timeout(_) => "TIMEOUT",
            GatekeeperError::Io(_) => "IO_ERROR",
            GatekeeperError::Wrapped { .. } => "WRAPPED_ERROR",
        }
    }

    /// Whether the caller may simply retry the operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatekeeperError::LockTimeout { .. } | GatekeeperError::Timeout(_)
        )
    }

    /// Wrap an error with additional context
    pub fn wrap<E: std::fmt::Display>(error: E, context: impl Into<String>) -> Self {
        GatekeeperError::Wrapped {
            context: context.into(),
            message: error.to_string(),
        }
    }

    /// Build an evidence error for the given artifact path
    pub fn evidence(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        GatekeeperError::Evidence {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// Convert an error to an appropriate exit code
pub fn to_exit_code(error: &GatekeeperError) -> i32 {
    match error {
        GatekeeperError::StateTransition(_) => 2,
        GatekeeperError::LockTimeout { .. } => 3,
        GatekeeperError::MissingStateMachine(_) | GatekeeperError::ConfigError(_) => 78,
        _ => 1,
    }
}
