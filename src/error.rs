//! Error types for the task tracker.
//!
//! Business outcomes are not errors here: they travel as [`crate::status::Status`]
//! values. These types cover the registry, parsing, configuration and job wiring.

use uuid::Uuid;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Task operation error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Status parse error: {0}")]
    Status(#[from] StatusParseError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Failures of a registry-level task operation (create, update, remove, cancel).
///
/// `TaskJob` logs these rather than folding them into the task's own result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Task {task_id} not found")]
    NotFound { task_id: Uuid },

    #[error("Task {task_id} does not belong to user {user_id}")]
    NotOwner { task_id: Uuid, user_id: String },

    #[error("Task {task_id} cannot be canceled")]
    NotCancelable { task_id: Uuid },

    #[error("Maximum running tasks ({max}) exceeded")]
    CapacityExceeded { max: usize },
}

/// A JSON document could not be turned into a status.
#[derive(Debug, thiserror::Error)]
pub enum StatusParseError {
    #[error("invalid status JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Job wiring errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job name must not be empty")]
    EmptyName,

    #[error("Job {name} was already started")]
    AlreadyStarted { name: String },

    #[error("Job could not create its task: {0}")]
    Registry(#[from] RegistryError),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
