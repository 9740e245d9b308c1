//! Definition registry: reusable workflow templates per entity type

use crate::config::DefinitionSeed;
use crate::error::{EngineError, Result};
use crate::store::DefinitionStore;
use approval_types::*;
use std::sync::Arc;

/// Admin-facing access to definitions and their steps
///
/// Step sequences are taken as supplied: the registry rejects duplicate or
/// zero `step_order` values but never renumbers or fills gaps. Gapped
/// sequences are refused when a workflow starts.
pub struct DefinitionRegistry {
    store: Arc<dyn DefinitionStore>,
}

impl DefinitionRegistry {
    pub fn new(store: Arc<dyn DefinitionStore>) -> Self {
        Self { store }
    }

    /// The active default definition for an entity type
    pub async fn get_default(&self, entity_type: EntityType) -> Result<WorkflowDefinition> {
        self.store
            .get_default_definition(entity_type)
            .await?
            .ok_or_else(|| EngineError::DefinitionNotFound(format!("no active default for entity type '{}'", entity_type)))
    }

    pub async fn get(&self, id: DefinitionId) -> Result<WorkflowDefinition> {
        self.store
            .get_definition(id)
            .await?
            .ok_or_else(|| EngineError::DefinitionNotFound(id.to_string()))
    }

    pub async fn list(&self, entity_type: Option<EntityType>) -> Result<Vec<WorkflowDefinition>> {
        self.store.list_definitions(entity_type).await
    }

    /// Create a definition; a new default replaces the previous one atomically
    pub async fn create(&self, new_definition: NewWorkflowDefinition) -> Result<WorkflowDefinition> {
        if new_definition.name.trim().is_empty() {
            return Err(EngineError::Validation("Definition name is required".to_string()));
        }

        let definition = new_definition.into_definition();
        self.store.create_definition(&definition).await?;

        log::info!(
            "Registered {} workflow '{}' for {} (default: {})",
            definition.workflow_type, definition.name, definition.entity_type, definition.is_default
        );
        Ok(definition)
    }

    pub async fn add_step(&self, definition_id: DefinitionId, new_step: NewWorkflowStep) -> Result<WorkflowStep> {
        if new_step.step_order == 0 {
            return Err(EngineError::Validation("step_order is 1-based".to_string()));
        }
        if new_step.approver_value.trim().is_empty() {
            return Err(EngineError::Validation("approver_value is required".to_string()));
        }
        if let Some(0) = new_step.auto_approve_after_hours {
            return Err(EngineError::Validation("auto_approve_after_hours must be at least 1".to_string()));
        }

        // existence check so a missing definition reads the same from every store
        self.get(definition_id).await?;

        let step = new_step.into_step(definition_id);
        self.store.insert_step(&step).await?;

        log::debug!(
            "Added step {} ({}:{}) to definition {}",
            step.step_order, step.approver_type, step.approver_value, definition_id
        );
        Ok(step)
    }

    pub async fn steps(&self, definition_id: DefinitionId) -> Result<Vec<WorkflowStep>> {
        self.store.list_steps(definition_id).await
    }

    pub async fn get_step(&self, step_id: StepId) -> Result<Option<WorkflowStep>> {
        self.store.get_step(step_id).await
    }

    pub async fn set_default(&self, definition_id: DefinitionId) -> Result<()> {
        if !self.store.set_default(definition_id).await? {
            return Err(EngineError::DefinitionNotFound(definition_id.to_string()));
        }
        log::info!("Definition {} is now the default for its entity type", definition_id);
        Ok(())
    }

    pub async fn set_active(&self, definition_id: DefinitionId, active: bool) -> Result<()> {
        if !self.store.set_active(definition_id, active).await? {
            return Err(EngineError::DefinitionNotFound(definition_id.to_string()));
        }
        Ok(())
    }

    /// Create the seeded definitions that don't exist yet, matched by entity type and name
    pub async fn seed(&self, seeds: &[DefinitionSeed]) -> Result<Vec<WorkflowDefinition>> {
        let mut created = Vec::new();

        for seed in seeds {
            let existing = self.store.list_definitions(Some(seed.entity_type)).await?;
            if existing.iter().any(|d| d.name == seed.name) {
                log::debug!("Definition '{}' for {} already present, skipping seed", seed.name, seed.entity_type);
                continue;
            }

            let definition = self.create(seed.to_new_definition()).await?;
            for step in &seed.steps {
                self.add_step(definition.id, step.clone()).await?;
            }
            created.push(definition);
        }

        if !created.is_empty() {
            log::info!("Seeded {} workflow definitions", created.len());
        }
        Ok(created)
    }
}
