//! In-memory store for tests and embedded use
//! All data is held in hash maps behind one lock and lost on drop

use super::{skip_decision, sort_requests, DefinitionStore, InstanceStore};
use crate::error::{EngineError, Result};
use approval_types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    definitions: HashMap<DefinitionId, WorkflowDefinition>,
    steps: HashMap<StepId, WorkflowStep>,
    instances: HashMap<InstanceId, WorkflowInstance>,
    requests: HashMap<RequestId, ApprovalRequest>,
    history: HashMap<InstanceId, Vec<ApprovalHistoryEntry>>,
}

impl State {
    fn clear_defaults(&mut self, entity_type: EntityType, keep: DefinitionId) {
        let now = Utc::now();
        for definition in self.definitions.values_mut() {
            if definition.entity_type == entity_type && definition.id != keep && definition.is_default {
                definition.is_default = false;
                definition.updated_at = now;
            }
        }
    }
}

/// Store backed by process memory
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DefinitionStore for InMemoryStore {
    async fn create_definition(&self, definition: &WorkflowDefinition) -> Result<()> {
        let mut state = self.state.write().await;
        if state.definitions.contains_key(&definition.id) {
            return Err(EngineError::Storage(format!("Definition {} already exists", definition.id)));
        }
        if definition.is_default {
            state.clear_defaults(definition.entity_type, definition.id);
        }
        state.definitions.insert(definition.id, definition.clone());
        Ok(())
    }

    async fn get_definition(&self, id: DefinitionId) -> Result<Option<WorkflowDefinition>> {
        Ok(self.state.read().await.definitions.get(&id).cloned())
    }

    async fn get_default_definition(&self, entity_type: EntityType) -> Result<Option<WorkflowDefinition>> {
        Ok(self
            .state
            .read()
            .await
            .definitions
            .values()
            .find(|d| d.entity_type == entity_type && d.is_default && d.is_active)
            .cloned())
    }

    async fn list_definitions(&self, entity_type: Option<EntityType>) -> Result<Vec<WorkflowDefinition>> {
        let state = self.state.read().await;
        let mut definitions: Vec<_> = state
            .definitions
            .values()
            .filter(|d| entity_type.map_or(true, |t| d.entity_type == t))
            .cloned()
            .collect();
        definitions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(definitions)
    }

    async fn set_default(&self, id: DefinitionId) -> Result<bool> {
        let mut state = self.state.write().await;
        let entity_type = match state.definitions.get(&id) {
            Some(definition) => definition.entity_type,
            None => return Ok(false),
        };
        state.clear_defaults(entity_type, id);
        if let Some(definition) = state.definitions.get_mut(&id) {
            definition.is_default = true;
            definition.updated_at = Utc::now();
        }
        Ok(true)
    }

    async fn set_active(&self, id: DefinitionId, active: bool) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.definitions.get_mut(&id) {
            Some(definition) => {
                definition.is_active = active;
                definition.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_step(&self, step: &WorkflowStep) -> Result<()> {
        let mut state = self.state.write().await;
        let duplicate = state.steps.values().any(|s| {
            s.workflow_definition_id == step.workflow_definition_id && s.step_order == step.step_order
        });
        if duplicate {
            return Err(EngineError::Validation(format!(
                "Definition {} already has a step at order {}",
                step.workflow_definition_id, step.step_order
            )));
        }
        state.steps.insert(step.id, step.clone());
        Ok(())
    }

    async fn list_steps(&self, definition_id: DefinitionId) -> Result<Vec<WorkflowStep>> {
        let state = self.state.read().await;
        let mut steps: Vec<_> = state
            .steps
            .values()
            .filter(|s| s.workflow_definition_id == definition_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.step_order);
        Ok(steps)
    }

    async fn get_step(&self, id: StepId) -> Result<Option<WorkflowStep>> {
        Ok(self.state.read().await.steps.get(&id).cloned())
    }
}

#[async_trait]
impl InstanceStore for InMemoryStore {
    async fn insert_instance(&self, instance: &WorkflowInstance) -> Result<()> {
        self.state.write().await.instances.insert(instance.id, instance.clone());
        Ok(())
    }

    async fn update_instance(&self, instance: &WorkflowInstance) -> Result<()> {
        let mut state = self.state.write().await;
        match state.instances.get_mut(&instance.id) {
            Some(existing) => {
                *existing = instance.clone();
                Ok(())
            }
            None => Err(EngineError::InstanceNotFound(instance.id)),
        }
    }

    async fn get_instance(&self, id: InstanceId) -> Result<Option<WorkflowInstance>> {
        Ok(self.state.read().await.instances.get(&id).cloned())
    }

    async fn find_instance_for_entity(&self, entity_type: EntityType, entity_id: &str) -> Result<Option<WorkflowInstance>> {
        Ok(self
            .state
            .read()
            .await
            .instances
            .values()
            .filter(|i| i.entity_type == entity_type && i.entity_id == entity_id)
            .max_by_key(|i| i.initiated_at)
            .cloned())
    }

    async fn list_active_instances(&self) -> Result<Vec<WorkflowInstance>> {
        let state = self.state.read().await;
        let mut instances: Vec<_> = state
            .instances
            .values()
            .filter(|i| !i.is_terminal())
            .cloned()
            .collect();
        instances.sort_by_key(|i| i.initiated_at);
        Ok(instances)
    }

    async fn insert_request(&self, request: &ApprovalRequest) -> Result<()> {
        self.state.write().await.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<ApprovalRequest>> {
        Ok(self.state.read().await.requests.get(&id).cloned())
    }

    async fn list_requests(&self, instance_id: InstanceId) -> Result<Vec<ApprovalRequest>> {
        let state = self.state.read().await;
        let mut requests: Vec<_> = state
            .requests
            .values()
            .filter(|r| r.workflow_instance_id == instance_id)
            .cloned()
            .collect();
        sort_requests(&mut requests);
        Ok(requests)
    }

    async fn list_pending_requests(&self) -> Result<Vec<ApprovalRequest>> {
        let state = self.state.read().await;
        let mut requests: Vec<_> = state
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending)
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    async fn decide_request(&self, id: RequestId, decision: &RequestDecision) -> Result<bool> {
        if !decision.status.is_decided() {
            return Err(EngineError::Validation("A decision must move a request out of pending".to_string()));
        }

        let mut state = self.state.write().await;
        match state.requests.get_mut(&id) {
            Some(request) if request.status == RequestStatus::Pending => {
                request.apply_decision(decision);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(EngineError::RequestNotFound(id)),
        }
    }

    async fn skip_pending_requests(&self, instance_id: InstanceId, at: DateTime<Utc>) -> Result<usize> {
        let decision = skip_decision(at);
        let mut state = self.state.write().await;
        let mut swept = 0;
        for request in state.requests.values_mut() {
            if request.workflow_instance_id == instance_id && request.status == RequestStatus::Pending {
                request.apply_decision(&decision);
                swept += 1;
            }
        }
        Ok(swept)
    }

    async fn record_reminder(&self, id: RequestId, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.requests.get_mut(&id) {
            Some(request) if request.status == RequestStatus::Pending => {
                request.reminder_count += 1;
                request.reminder_sent_at = Some(at);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(EngineError::RequestNotFound(id)),
        }
    }

    async fn append_history(&self, entry: &ApprovalHistoryEntry) -> Result<()> {
        self.state
            .write()
            .await
            .history
            .entry(entry.workflow_instance_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn list_history(&self, instance_id: InstanceId) -> Result<Vec<ApprovalHistoryEntry>> {
        Ok(self
            .state
            .read()
            .await
            .history
            .get(&instance_id)
            .cloned()
            .unwrap_or_default())
    }
}
