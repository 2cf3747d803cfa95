//! Error types for the restoration pipeline.
//!
//! Each concern gets its own enum so callers can match on what actually
//! went wrong:
//! - generation calls against a vendor backend
//! - prompt template parsing
//! - pipeline construction
//! - result persistence
//! - job run lifecycle
//! - registry lookups

use thiserror::Error;

use crate::job::run::RunStatus;

/// Failure of a single generation call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Model returned an empty response")]
    EmptyResponse,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PromptError {
    #[error("Template '{template}' references unknown placeholder '{{{placeholder}}}'")]
    UnknownPlaceholder {
        template: String,
        placeholder: String,
    },

    #[error("Template '{template}' has no '{{{slot}}}' slot")]
    MissingSlot { template: String, slot: String },

    #[error("Template '{template}' has an unbalanced brace at byte {offset}")]
    UnbalancedBrace { template: String, offset: usize },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("Model '{0}' is configured more than once")]
    DuplicateModel(String),

    #[error("Prompt template '{0}' is configured more than once")]
    DuplicateTemplate(String),

    #[error("Pipeline needs at least one model and one prompt template")]
    EmptyCrossProduct,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job run {0} not found")]
    RunNotFound(uuid::Uuid),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Invalid job run transition from {from} to {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    #[error("Unknown {kind} '{key}'")]
    Unknown { kind: &'static str, key: String },

    #[error("{kind} '{key}' is already registered")]
    Duplicate { kind: &'static str, key: String },
}
