//! Error types for the job executor.
//!

use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigurationError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutorError {
    #[error("Job store error: {0}")]
    Store(String),
    #[error("Optimistic locking conflict on job {job_id}: {reason}")]
    OptimisticLocking { job_id: Uuid, reason: String },
    #[error("Job {0} not found")]
    JobNotFound(Uuid),
    #[error("Job definition '{0}' not found")]
    JobDefinitionNotFound(String),
    #[error("No job handler registered for type '{0}'")]
    UnknownHandler(String),
    #[error("Invalid configuration for job handler '{handler_type}': {reason}")]
    InvalidHandlerConfiguration {
        handler_type: String,
        reason: String,
    },
    #[error("Handler registration error: {0}")]
    Registration(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Invalid timer expression '{expression}': {reason}")]
    InvalidTimer { expression: String, reason: String },
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Job execution failed: {0}")]
    Handler(#[from] HandlerError),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Timeout error: {0}")]
    Timeout(String),
    #[error("Process engine '{0}' is not registered")]
    EngineNotRegistered(String),
    #[error(transparent)]
    Config(#[from] ConfigurationError),
}

impl ExecutorError {
    /// Errors that describe a defect in the job itself rather than a transient condition.
    ///
    /// Jobs failing with one of these are not retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExecutorError::UnknownHandler(_)
                | ExecutorError::InvalidHandlerConfiguration { .. }
                | ExecutorError::InvalidTimer { .. }
        )
    }

    pub fn is_optimistic_locking(&self) -> bool {
        matches!(self, ExecutorError::OptimisticLocking { .. })
    }

    pub fn optimistic_locking(job_id: Uuid, reason: impl Into<String>) -> Self {
        ExecutorError::OptimisticLocking {
            job_id,
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for ExecutorError {
    fn from(error: serde_json::Error) -> Self {
        ExecutorError::Serialization(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for ExecutorError {
    fn from(err: sqlx::Error) -> Self {
        ExecutorError::Store(err.to_string())
    }
}

/// Failure reported by a job handler.
///
/// `details` ends up in the job's exception details (a stack trace or a structured
/// payload, whatever the handler finds useful for operators).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub details: Option<String>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        HandlerError::new(format!("JSON error: {error}"))
    }
}

impl From<ExecutorError> for HandlerError {
    fn from(error: ExecutorError) -> Self {
        HandlerError::new(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
