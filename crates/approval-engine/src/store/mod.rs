//! Persistence contract for definitions and running workflow state
//!
//! Two traits, one per store: definitions are admin-managed templates,
//! instances/requests/history are per-entity runtime state. Implementations
//! must make `decide_request` a compare-and-swap on `pending` and make
//! default-clearing atomic with the write that sets a new default.

pub mod file;
pub mod memory;

use crate::error::Result;
use approval_types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use file::FileStore;
pub use memory::InMemoryStore;

#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Insert a definition; when it is the default, clear the flag on its siblings in the same write
    async fn create_definition(&self, definition: &WorkflowDefinition) -> Result<()>;

    async fn get_definition(&self, id: DefinitionId) -> Result<Option<WorkflowDefinition>>;

    /// The active definition flagged default for `entity_type`
    async fn get_default_definition(&self, entity_type: EntityType) -> Result<Option<WorkflowDefinition>>;

    async fn list_definitions(&self, entity_type: Option<EntityType>) -> Result<Vec<WorkflowDefinition>>;

    /// Make `id` the only default for its entity type. Returns false when the definition is missing
    async fn set_default(&self, id: DefinitionId) -> Result<bool>;

    async fn set_active(&self, id: DefinitionId, active: bool) -> Result<bool>;

    async fn insert_step(&self, step: &WorkflowStep) -> Result<()>;

    /// Steps of a definition ordered by `step_order`
    async fn list_steps(&self, definition_id: DefinitionId) -> Result<Vec<WorkflowStep>>;

    async fn get_step(&self, id: StepId) -> Result<Option<WorkflowStep>>;
}

#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn insert_instance(&self, instance: &WorkflowInstance) -> Result<()>;

    async fn update_instance(&self, instance: &WorkflowInstance) -> Result<()>;

    async fn get_instance(&self, id: InstanceId) -> Result<Option<WorkflowInstance>>;

    /// Most recently initiated instance for the entity
    async fn find_instance_for_entity(&self, entity_type: EntityType, entity_id: &str) -> Result<Option<WorkflowInstance>>;

    /// Instances not yet in a terminal status
    async fn list_active_instances(&self) -> Result<Vec<WorkflowInstance>>;

    async fn insert_request(&self, request: &ApprovalRequest) -> Result<()>;

    async fn get_request(&self, id: RequestId) -> Result<Option<ApprovalRequest>>;

    /// Requests of an instance ordered by step order, then creation time
    async fn list_requests(&self, instance_id: InstanceId) -> Result<Vec<ApprovalRequest>>;

    async fn list_pending_requests(&self) -> Result<Vec<ApprovalRequest>>;

    /// Apply `decision` only if the request is still pending. Returns whether this caller won
    async fn decide_request(&self, id: RequestId, decision: &RequestDecision) -> Result<bool>;

    /// Mark every pending request of the instance skipped. Returns how many were swept
    async fn skip_pending_requests(&self, instance_id: InstanceId, at: DateTime<Utc>) -> Result<usize>;

    /// Bump the reminder counter of a pending request
    async fn record_reminder(&self, id: RequestId, at: DateTime<Utc>) -> Result<bool>;

    async fn append_history(&self, entry: &ApprovalHistoryEntry) -> Result<()>;

    /// History of an instance, oldest first
    async fn list_history(&self, instance_id: InstanceId) -> Result<Vec<ApprovalHistoryEntry>>;
}

/// Decision applied by `skip_pending_requests`
pub(crate) fn skip_decision(at: DateTime<Utc>) -> RequestDecision {
    RequestDecision {
        status: RequestStatus::Skipped,
        actor: crate::constants::SYSTEM_ACTOR.to_string(),
        comment: None,
        decided_at: at,
    }
}

pub(crate) fn sort_requests(requests: &mut [ApprovalRequest]) {
    requests.sort_by(|a, b| {
        a.step_order
            .cmp(&b.step_order)
            .then(a.created_at.cmp(&b.created_at))
    });
}
