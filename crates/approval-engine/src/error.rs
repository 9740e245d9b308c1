//! Error types for the approval engine

use approval_types::{DefinitionId, EntityType, InstanceId, RequestId};
use thiserror::Error;

/// Main error type for all engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No workflow definition found: {0}")]
    DefinitionNotFound(String),

    #[error("Workflow definition {0} has no steps configured")]
    NoStepsConfigured(DefinitionId),

    #[error("Workflow definition {0} has an invalid step sequence: {1}")]
    InvalidStepSequence(DefinitionId, String),

    #[error("Approval request {0} not found")]
    RequestNotFound(RequestId),

    #[error("Approval request {0} has already been processed")]
    AlreadyProcessed(RequestId),

    #[error("Workflow instance {0} not found")]
    InstanceNotFound(InstanceId),

    #[error("Workflow instance {0} is already {1}")]
    InstanceTerminal(InstanceId, String),

    #[error("A workflow is already in progress for {0} {1}")]
    WorkflowAlreadyActive(EntityType, String),

    #[error("Invalid workflow type in storage: {0}")]
    InvalidWorkflowType(String),

    #[error("Inconsistent workflow state: {0}")]
    Inconsistent(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl EngineError {
    /// Decision raced or arrived after the workflow finished
    pub fn is_already_processed(&self) -> bool {
        matches!(self, Self::AlreadyProcessed(_))
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
