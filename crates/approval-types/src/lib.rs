//! Shared types for the approval workflow engine

pub mod ids;
pub mod records;
pub mod status;

pub use ids::{DefinitionId, HistoryEntryId, InstanceId, RequestId, StepId};
pub use records::{
    ApprovalHistoryEntry, ApprovalRequest, NewWorkflowDefinition, NewWorkflowStep,
    RequestDecision, WorkflowDefinition, WorkflowInstance, WorkflowStep,
};
pub use status::{
    ApproverType, EntityType, HistoryAction, InstanceStatus, RequestStatus, UnknownVariant,
    WorkflowType,
};
