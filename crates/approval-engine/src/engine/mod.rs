//! Workflow engine: drives entities through their approver chains

pub mod advance;
pub mod locks;

use crate::constants::SYSTEM_ACTOR;
use crate::dispatcher::RequestDispatcher;
use crate::error::{EngineError, Result};
use crate::history::HistoryLogger;
use crate::observer::{Notification, WorkflowObserver};
use crate::resolver::ApproverResolver;
use crate::store::{DefinitionStore, InstanceStore};
use advance::Advance;
use approval_types::*;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use locks::InstanceLocks;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// The approval state machine
///
/// Every transition runs under a per-instance lock, and a request leaves
/// `pending` only through the store's compare-and-swap. The caller that loses
/// a race on the same request gets [`EngineError::AlreadyProcessed`].
pub struct WorkflowEngine {
    definitions: Arc<dyn DefinitionStore>,
    instances: Arc<dyn InstanceStore>,
    dispatcher: RequestDispatcher,
    history: HistoryLogger,
    observers: Vec<Arc<dyn WorkflowObserver>>,
    locks: InstanceLocks,
    start_lock: tokio::sync::Mutex<()>,
}

impl WorkflowEngine {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        instances: Arc<dyn InstanceStore>,
        resolver: Arc<dyn ApproverResolver>,
    ) -> Self {
        Self {
            definitions,
            history: HistoryLogger::new(instances.clone()),
            instances,
            dispatcher: RequestDispatcher::new(resolver),
            observers: Vec::new(),
            locks: InstanceLocks::new(),
            start_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn WorkflowObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Start a workflow for an entity
    ///
    /// Uses `definition_id` when given, otherwise the entity type's default.
    /// Fails before writing anything when the definition has no steps, a gapped
    /// step sequence, or the entity already has a workflow in progress.
    pub async fn start_workflow(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        initiated_by: &str,
        definition_id: Option<DefinitionId>,
        notes: Option<String>,
    ) -> Result<WorkflowInstance> {
        if entity_id.trim().is_empty() {
            return Err(EngineError::Validation("entity_id is required".to_string()));
        }
        if initiated_by.trim().is_empty() {
            return Err(EngineError::Validation("initiated_by is required".to_string()));
        }

        let definition = self.resolve_definition(entity_type, definition_id).await?;
        let steps = self.definitions.list_steps(definition.id).await?;
        advance::validate_steps(definition.id, &steps)?;

        let _start = self.start_lock.lock().await;

        if let Some(existing) = self.instances.find_instance_for_entity(entity_type, entity_id).await? {
            if !existing.is_terminal() {
                return Err(EngineError::WorkflowAlreadyActive(entity_type, entity_id.to_string()));
            }
        }

        let (current_step, live_steps) = match definition.workflow_type {
            WorkflowType::Sequential => (steps[0].step_order, &steps[..1]),
            WorkflowType::Parallel | WorkflowType::AnyOne => (0, &steps[..]),
        };

        let instance = WorkflowInstance {
            id: InstanceId::new(),
            workflow_definition_id: definition.id,
            entity_type,
            entity_id: entity_id.to_string(),
            status: InstanceStatus::InProgress,
            current_step,
            initiated_by: initiated_by.to_string(),
            initiated_at: Utc::now(),
            completed_at: None,
            notes,
        };

        // resolve every approver before the first write
        let requests = self.dispatcher.materialize_all(instance.id, live_steps).await?;

        self.instances.insert_instance(&instance).await?;
        for request in &requests {
            self.instances.insert_request(request).await?;
        }

        self.history
            .record(ApprovalHistoryEntry::new(instance.id, HistoryAction::Initiated, initiated_by).with_comment(instance.notes.clone()))
            .await;

        info!(
            "Started {} workflow '{}' for {} {} ({} live requests, instance {})",
            definition.workflow_type,
            definition.name,
            entity_type,
            entity_id,
            requests.len(),
            instance.id
        );

        let outbox: Vec<Notification> = requests.iter().map(|r| Notification::pending(&instance, r)).collect();
        self.notify(outbox).await;

        Ok(instance)
    }

    /// Approve a pending request and advance its instance
    pub async fn approve(&self, request_id: RequestId, approver: &str, comment: Option<String>) -> Result<WorkflowInstance> {
        let request = self.load_pending_request(request_id).await?;
        let instance_id = request.workflow_instance_id;

        let (guard, mut instance) = self.lock_open_instance(instance_id, request_id).await?;

        let definition = self
            .definitions
            .get_definition(instance.workflow_definition_id)
            .await?
            .ok_or_else(|| {
                EngineError::Inconsistent(format!(
                    "instance {} references missing definition {}",
                    instance.id, instance.workflow_definition_id
                ))
            })?;
        let steps = self.definitions.list_steps(definition.id).await?;

        let mut snapshot = self.instances.list_requests(instance_id).await?;
        match snapshot.iter_mut().find(|r| r.id == request_id) {
            Some(own) if own.status == RequestStatus::Pending => own.status = RequestStatus::Approved,
            Some(_) => return Err(EngineError::AlreadyProcessed(request_id)),
            None => return Err(EngineError::RequestNotFound(request_id)),
        }

        let advance = advance::decide(definition.workflow_type, &instance, &steps, &snapshot)?;
        let next_request = match &advance {
            Advance::ActivateStep(step) => Some(self.dispatcher.materialize(instance.id, step).await?),
            _ => None,
        };

        let now = Utc::now();
        let decision = RequestDecision {
            status: RequestStatus::Approved,
            actor: approver.to_string(),
            comment: comment.clone(),
            decided_at: now,
        };
        if !self.instances.decide_request(request_id, &decision).await? {
            return Err(EngineError::AlreadyProcessed(request_id));
        }

        self.history
            .record(
                ApprovalHistoryEntry::new(instance.id, HistoryAction::Approved, approver)
                    .with_step(request.step_id)
                    .with_comment(approval_note(comment, &advance)),
            )
            .await;
        info!("Request {} (step {}) approved by {}", request_id, request.step_order, approver);

        let mut outbox = Vec::new();
        match (advance, next_request) {
            (Advance::ActivateStep(step), Some(next)) => {
                instance.current_step = step.step_order;
                self.instances.update_instance(&instance).await?;
                self.instances.insert_request(&next).await?;
                info!(
                    "Instance {} advanced to step {} ({})",
                    instance.id, step.step_order, next.approver_email
                );
                outbox.push(Notification::pending(&instance, &next));
            }
            (Advance::Complete, _) => {
                self.finish(&mut instance, InstanceStatus::Approved, now).await?;
                info!("Instance {} approved", instance.id);
                outbox.push(Notification::completed(&instance));
            }
            _ => debug!("Instance {} still waiting for approvals", instance.id),
        }

        drop(guard);
        if instance.is_terminal() {
            self.locks.release(instance.id);
        }
        self.notify(outbox).await;

        Ok(instance)
    }

    /// Reject a pending request; the whole instance is rejected regardless of workflow type
    pub async fn reject(&self, request_id: RequestId, approver: &str, reason: &str) -> Result<WorkflowInstance> {
        let request = self.load_pending_request(request_id).await?;
        let instance_id = request.workflow_instance_id;

        let (guard, mut instance) = self.lock_open_instance(instance_id, request_id).await?;

        let comment = Some(reason.trim().to_string()).filter(|r| !r.is_empty());
        let now = Utc::now();
        let decision = RequestDecision {
            status: RequestStatus::Rejected,
            actor: approver.to_string(),
            comment: comment.clone(),
            decided_at: now,
        };
        if !self.instances.decide_request(request_id, &decision).await? {
            return Err(EngineError::AlreadyProcessed(request_id));
        }

        self.finish(&mut instance, InstanceStatus::Rejected, now).await?;
        self.history
            .record(
                ApprovalHistoryEntry::new(instance.id, HistoryAction::Rejected, approver)
                    .with_step(request.step_id)
                    .with_comment(comment),
            )
            .await;
        info!(
            "Request {} (step {}) rejected by {}; instance {} rejected",
            request_id, request.step_order, approver, instance.id
        );

        drop(guard);
        self.locks.release(instance.id);
        self.notify(vec![Notification::completed(&instance)]).await;

        Ok(instance)
    }

    /// Cancel an in-progress instance, skipping its pending requests
    pub async fn cancel_workflow(
        &self,
        instance_id: InstanceId,
        cancelled_by: &str,
        reason: Option<String>,
    ) -> Result<WorkflowInstance> {
        let guard = self.locks.acquire(instance_id).await;

        let mut instance = match self.get_instance(instance_id).await {
            Ok(instance) if !instance.is_terminal() => instance,
            Ok(instance) => {
                drop(guard);
                self.locks.release(instance_id);
                return Err(EngineError::InstanceTerminal(instance_id, instance.status.to_string()));
            }
            Err(e) => {
                drop(guard);
                self.locks.release(instance_id);
                return Err(e);
            }
        };

        self.finish(&mut instance, InstanceStatus::Cancelled, Utc::now()).await?;
        self.history
            .record(ApprovalHistoryEntry::new(instance.id, HistoryAction::Cancelled, cancelled_by).with_comment(reason))
            .await;
        info!("Instance {} cancelled by {}", instance.id, cancelled_by);

        drop(guard);
        self.locks.release(instance.id);
        self.notify(vec![Notification::completed(&instance)]).await;

        Ok(instance)
    }

    /// Record a reminder for a pending request and hand it to observers
    pub async fn send_reminder(&self, request_id: RequestId, now: DateTime<Utc>) -> Result<ApprovalRequest> {
        let request = self.load_pending_request(request_id).await?;

        let (guard, instance) = self.lock_open_instance(request.workflow_instance_id, request_id).await?;

        if !self.instances.record_reminder(request_id, now).await? {
            return Err(EngineError::AlreadyProcessed(request_id));
        }
        let request = self
            .instances
            .get_request(request_id)
            .await?
            .ok_or(EngineError::RequestNotFound(request_id))?;

        self.history
            .record(
                ApprovalHistoryEntry::new(instance.id, HistoryAction::ReminderSent, SYSTEM_ACTOR)
                    .with_step(request.step_id)
                    .with_comment(Some(format!("reminder {} to {}", request.reminder_count, request.approver_email))),
            )
            .await;
        debug!("Reminder {} recorded for request {}", request.reminder_count, request_id);

        drop(guard);
        self.notify(vec![Notification::reminder(&instance, &request)]).await;

        Ok(request)
    }

    /// Most recent instance for an entity, terminal or not
    pub async fn get_entity_workflow(&self, entity_type: EntityType, entity_id: &str) -> Result<Option<WorkflowInstance>> {
        self.instances.find_instance_for_entity(entity_type, entity_id).await
    }

    pub async fn get_instance(&self, instance_id: InstanceId) -> Result<WorkflowInstance> {
        self.instances
            .get_instance(instance_id)
            .await?
            .ok_or(EngineError::InstanceNotFound(instance_id))
    }

    pub async fn get_request(&self, request_id: RequestId) -> Result<ApprovalRequest> {
        self.instances
            .get_request(request_id)
            .await?
            .ok_or(EngineError::RequestNotFound(request_id))
    }

    pub async fn list_requests(&self, instance_id: InstanceId) -> Result<Vec<ApprovalRequest>> {
        self.instances.list_requests(instance_id).await
    }

    pub async fn history(&self, instance_id: InstanceId) -> Result<Vec<ApprovalHistoryEntry>> {
        self.history.timeline(instance_id).await
    }

    pub async fn list_active(&self) -> Result<Vec<WorkflowInstance>> {
        self.instances.list_active_instances().await
    }

    /// Every pending request across all instances
    pub async fn pending_requests(&self) -> Result<Vec<ApprovalRequest>> {
        self.instances.list_pending_requests().await
    }

    /// Pending requests addressed to `email`, directly or through a role snapshot
    pub async fn pending_approvals_for_user(&self, email: &str) -> Result<Vec<ApprovalRequest>> {
        let mut requests: Vec<ApprovalRequest> = self
            .instances
            .list_pending_requests()
            .await?
            .into_iter()
            .filter(|r| r.is_addressed_to(email))
            .collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(requests)
    }

    pub async fn get_step(&self, step_id: StepId) -> Result<Option<WorkflowStep>> {
        self.definitions.get_step(step_id).await
    }

    async fn resolve_definition(&self, entity_type: EntityType, definition_id: Option<DefinitionId>) -> Result<WorkflowDefinition> {
        let definition = match definition_id {
            Some(id) => self
                .definitions
                .get_definition(id)
                .await?
                .filter(|d| d.is_active)
                .ok_or_else(|| EngineError::DefinitionNotFound(format!("no active definition {}", id)))?,
            None => self
                .definitions
                .get_default_definition(entity_type)
                .await?
                .ok_or_else(|| EngineError::DefinitionNotFound(format!("no active default for entity type '{}'", entity_type)))?,
        };

        if definition.entity_type != entity_type {
            return Err(EngineError::Validation(format!(
                "definition '{}' is for {}, not {}",
                definition.name, definition.entity_type, entity_type
            )));
        }
        Ok(definition)
    }

    async fn load_pending_request(&self, request_id: RequestId) -> Result<ApprovalRequest> {
        let request = self.get_request(request_id).await?;
        if request.status != RequestStatus::Pending {
            return Err(EngineError::AlreadyProcessed(request_id));
        }
        Ok(request)
    }

    /// Lock an instance and load it; a request on a finished instance is reported as already processed
    async fn lock_open_instance(
        &self,
        instance_id: InstanceId,
        request_id: RequestId,
    ) -> Result<(OwnedMutexGuard<()>, WorkflowInstance)> {
        let guard = self.locks.acquire(instance_id).await;
        let error = match self.get_instance(instance_id).await {
            Ok(instance) if !instance.is_terminal() => return Ok((guard, instance)),
            Ok(_) => EngineError::AlreadyProcessed(request_id),
            Err(e) => e,
        };

        drop(guard);
        self.locks.release(instance_id);
        Err(error)
    }

    /// Skip what is still pending, then store the terminal status
    async fn finish(&self, instance: &mut WorkflowInstance, status: InstanceStatus, at: DateTime<Utc>) -> Result<()> {
        let skipped = self.instances.skip_pending_requests(instance.id, at).await?;
        if skipped > 0 {
            debug!("Skipped {} pending requests of instance {}", skipped, instance.id);
        }
        instance.finish(status, at);
        self.instances.update_instance(instance).await
    }

    async fn notify(&self, outbox: Vec<Notification>) {
        for notification in &outbox {
            let deliveries = self.observers.iter().map(|observer| notification.deliver(observer.as_ref()));
            for result in join_all(deliveries).await {
                if let Err(e) = result {
                    warn!(
                        "Observer failed on {} for instance {}: {}",
                        notification.kind, notification.instance.id, e
                    );
                }
            }
        }
    }
}

/// The approver's comment plus what the approval did to the instance
fn approval_note(comment: Option<String>, advance: &Advance) -> Option<String> {
    let outcome = match advance {
        Advance::Wait => return comment,
        Advance::ActivateStep(step) => format!("advanced to step {}", step.step_order),
        Advance::Complete => "workflow approved".to_string(),
    };
    Some(match comment {
        Some(comment) => format!("{} ({})", comment, outcome),
        None => outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{DirectoryApproverResolver, StaticRoleDirectory};
    use crate::store::InMemoryStore;

    async fn engine_with(workflow_type: WorkflowType, approvers: &[&str]) -> (WorkflowEngine, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let definition = NewWorkflowDefinition::new("Test", EntityType::Proposal, workflow_type)
            .as_default()
            .into_definition();
        store.create_definition(&definition).await.unwrap();
        for (index, approver) in approvers.iter().enumerate() {
            let step = NewWorkflowStep::user(index as u32 + 1, *approver).into_step(definition.id);
            store.insert_step(&step).await.unwrap();
        }

        let resolver = Arc::new(DirectoryApproverResolver::new(Arc::new(StaticRoleDirectory::default())));
        (WorkflowEngine::new(store.clone(), store.clone(), resolver), store)
    }

    #[tokio::test]
    async fn test_sequential_starts_at_first_step() {
        let (engine, _) = engine_with(WorkflowType::Sequential, &["a@x", "b@x"]).await;
        let instance = engine.start_workflow(EntityType::Proposal, "p-1", "c@x", None, None).await.unwrap();

        assert_eq!(instance.status, InstanceStatus::InProgress);
        assert_eq!(instance.current_step, 1);
        let requests = engine.list_requests(instance.id).await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].approver_email, "a@x");
    }

    #[tokio::test]
    async fn test_second_start_for_entity_is_refused() {
        let (engine, _) = engine_with(WorkflowType::AnyOne, &["a@x"]).await;
        engine.start_workflow(EntityType::Proposal, "p-1", "c@x", None, None).await.unwrap();

        let result = engine.start_workflow(EntityType::Proposal, "p-1", "c@x", None, None).await;
        assert!(matches!(result, Err(EngineError::WorkflowAlreadyActive(_, _))));
    }

    #[tokio::test]
    async fn test_restart_after_terminal_instance() {
        let (engine, _) = engine_with(WorkflowType::AnyOne, &["a@x"]).await;
        let first = engine.start_workflow(EntityType::Proposal, "p-1", "c@x", None, None).await.unwrap();
        engine.cancel_workflow(first.id, "c@x", None).await.unwrap();

        let second = engine.start_workflow(EntityType::Proposal, "p-1", "c@x", None, None).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(engine.get_entity_workflow(EntityType::Proposal, "p-1").await.unwrap().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_inconsistent_current_step_mutates_nothing() {
        let (engine, store) = engine_with(WorkflowType::Sequential, &["a@x", "b@x"]).await;
        let mut instance = engine.start_workflow(EntityType::Proposal, "p-1", "c@x", None, None).await.unwrap();
        let request = engine.list_requests(instance.id).await.unwrap().remove(0);

        instance.current_step = 9;
        store.update_instance(&instance).await.unwrap();

        let result = engine.approve(request.id, "a@x", None).await;
        assert!(matches!(result, Err(EngineError::Inconsistent(_))));
        assert_eq!(engine.get_request(request.id).await.unwrap().status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn test_cancel_terminal_instance_is_refused() {
        let (engine, _) = engine_with(WorkflowType::Parallel, &["a@x", "b@x"]).await;
        let instance = engine.start_workflow(EntityType::Proposal, "p-1", "c@x", None, None).await.unwrap();

        let cancelled = engine.cancel_workflow(instance.id, "c@x", Some("duplicate".to_string())).await.unwrap();
        assert_eq!(cancelled.status, InstanceStatus::Cancelled);
        assert!(engine
            .list_requests(instance.id)
            .await
            .unwrap()
            .iter()
            .all(|r| r.status == RequestStatus::Skipped));

        let again = engine.cancel_workflow(instance.id, "c@x", None).await;
        assert!(matches!(again, Err(EngineError::InstanceTerminal(_, _))));
    }

    #[tokio::test]
    async fn test_refused_actions_on_finished_instance_release_their_lock() {
        let (engine, store) = engine_with(WorkflowType::Parallel, &["a@x", "b@x"]).await;
        let mut instance = engine.start_workflow(EntityType::Proposal, "p-1", "c@x", None, None).await.unwrap();
        let request = engine.list_requests(instance.id).await.unwrap().remove(0);

        // finished by another process while the request file still reads pending
        instance.finish(InstanceStatus::Cancelled, Utc::now());
        store.update_instance(&instance).await.unwrap();

        let approve = engine.approve(request.id, "a@x", None).await;
        assert!(matches!(approve, Err(EngineError::AlreadyProcessed(_))));
        let reject = engine.reject(request.id, "a@x", "no").await;
        assert!(matches!(reject, Err(EngineError::AlreadyProcessed(_))));
        let reminder = engine.send_reminder(request.id, Utc::now()).await;
        assert!(matches!(reminder, Err(EngineError::AlreadyProcessed(_))));
        let cancel = engine.cancel_workflow(instance.id, "c@x", None).await;
        assert!(matches!(cancel, Err(EngineError::InstanceTerminal(_, _))));

        assert!(engine.locks.is_empty());
        assert_eq!(engine.get_request(request.id).await.unwrap().status, RequestStatus::Pending);
    }

    #[test]
    fn test_approval_note_folds_outcome_into_comment() {
        assert_eq!(approval_note(Some("ok".to_string()), &Advance::Wait), Some("ok".to_string()));
        assert_eq!(approval_note(None, &Advance::Wait), None);
        assert_eq!(approval_note(None, &Advance::Complete).as_deref(), Some("workflow approved"));

        let step = NewWorkflowStep::user(2, "b@x").into_step(DefinitionId::new());
        assert_eq!(
            approval_note(Some("fine".to_string()), &Advance::ActivateStep(step)).as_deref(),
            Some("fine (advanced to step 2)")
        );
    }

    #[tokio::test]
    async fn test_explicit_definition_must_be_active() {
        let (engine, store) = engine_with(WorkflowType::AnyOne, &["a@x"]).await;
        let definition = store.get_default_definition(EntityType::Proposal).await.unwrap().unwrap();
        store.set_active(definition.id, false).await.unwrap();

        let result = engine
            .start_workflow(EntityType::Proposal, "p-1", "c@x", Some(definition.id), None)
            .await;
        assert!(matches!(result, Err(EngineError::DefinitionNotFound(_))));
    }
}
