//! One-shot administrative actions, printed as JSON on stdout

use anyhow::{anyhow, bail, Context, Result};
use approval_engine::{
    ApprovalHistoryEntry, ApprovalRequest, DefinitionId, DefinitionRegistry, EntityType, InstanceId,
    RequestId, WorkflowDefinition, WorkflowEngine, WorkflowInstance, WorkflowStep,
};
use serde::Serialize;

#[derive(Serialize)]
struct DefinitionView {
    #[serde(flatten)]
    definition: WorkflowDefinition,
    steps: Vec<WorkflowStep>,
}

#[derive(Serialize)]
struct EntityView {
    instance: WorkflowInstance,
    requests: Vec<ApprovalRequest>,
    history: Vec<ApprovalHistoryEntry>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn require_actor(actor: Option<String>) -> Result<String> {
    actor
        .filter(|a| !a.trim().is_empty())
        .context("--actor (or APPROVALS_ACTOR) is required for this action")
}

fn parse_entity_type(value: &str) -> Result<EntityType> {
    value
        .parse::<EntityType>()
        .with_context(|| format!("Unknown entity type '{}'", value))
}

pub async fn list_definitions(registry: &DefinitionRegistry) -> Result<()> {
    let mut views = Vec::new();
    for definition in registry.list(None).await? {
        let steps = registry.steps(definition.id).await?;
        views.push(DefinitionView { definition, steps });
    }
    log::info!("{} workflow definitions", views.len());
    print_json(&views)
}

pub async fn pending_for(engine: &WorkflowEngine, email: &str) -> Result<()> {
    let requests = engine.pending_approvals_for_user(email).await?;
    log::info!("{} pending approvals for {}", requests.len(), email);
    print_json(&requests)
}

pub async fn show_entity(engine: &WorkflowEngine, entity_type: &str, entity_id: &str) -> Result<()> {
    let entity_type = parse_entity_type(entity_type)?;
    let Some(instance) = engine.get_entity_workflow(entity_type, entity_id).await? else {
        bail!("No workflow found for {} {}", entity_type, entity_id);
    };

    let view = EntityView {
        requests: engine.list_requests(instance.id).await?,
        history: engine.history(instance.id).await?,
        instance,
    };
    print_json(&view)
}

pub async fn start(
    engine: &WorkflowEngine,
    entity_type: &str,
    entity_id: &str,
    actor: String,
    definition: Option<&str>,
    notes: Option<String>,
) -> Result<()> {
    let entity_type = parse_entity_type(entity_type)?;
    let definition_id = definition
        .map(|id| DefinitionId::from_string(id).map_err(|e| anyhow!(e)))
        .transpose()?;

    let instance = engine
        .start_workflow(entity_type, entity_id, &actor, definition_id, notes)
        .await?;
    print_json(&instance)
}

pub async fn approve(engine: &WorkflowEngine, request_id: &str, actor: String, comment: Option<String>) -> Result<()> {
    let request_id = RequestId::from_string(request_id).map_err(|e| anyhow!(e))?;
    let instance = engine.approve(request_id, &actor, comment).await?;
    print_json(&instance)
}

pub async fn reject(engine: &WorkflowEngine, request_id: &str, actor: String, reason: Option<String>) -> Result<()> {
    let request_id = RequestId::from_string(request_id).map_err(|e| anyhow!(e))?;
    let reason = reason.context("--comment with a rejection reason is required")?;
    let instance = engine.reject(request_id, &actor, &reason).await?;
    print_json(&instance)
}

pub async fn cancel(engine: &WorkflowEngine, instance_id: &str, actor: String, reason: Option<String>) -> Result<()> {
    let instance_id = InstanceId::from_string(instance_id).map_err(|e| anyhow!(e))?;
    let instance = engine.cancel_workflow(instance_id, &actor, reason).await?;
    print_json(&instance)
}
