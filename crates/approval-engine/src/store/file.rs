//! File-based store with atomic operations
//!
//! Each record is a JSON document; writes are staged in `.tmp/` and renamed
//! into place. Requests live in one directory per status and a decision is a
//! rename out of `requests/pending/`, so exactly one concurrent decider wins.

use super::{skip_decision, sort_requests, DefinitionStore, InstanceStore};
use crate::error::{EngineError, Result};
use crate::paths::{StoreLayout, REQUEST_STATES};
use approval_types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Definition as persisted, steps embedded. `workflow_type` stays a string
/// until load so unknown values surface as `InvalidWorkflowType`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DefinitionDocument {
    id: DefinitionId,
    name: String,
    #[serde(default)]
    description: Option<String>,
    entity_type: EntityType,
    workflow_type: String,
    is_active: bool,
    is_default: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    steps: Vec<WorkflowStep>,
}

impl DefinitionDocument {
    fn new(definition: &WorkflowDefinition) -> Self {
        Self {
            id: definition.id,
            name: definition.name.clone(),
            description: definition.description.clone(),
            entity_type: definition.entity_type,
            workflow_type: definition.workflow_type.as_str().to_string(),
            is_active: definition.is_active,
            is_default: definition.is_default,
            created_at: definition.created_at,
            updated_at: definition.updated_at,
            steps: Vec::new(),
        }
    }

    fn definition(&self) -> Result<WorkflowDefinition> {
        let workflow_type = self.workflow_type.parse::<WorkflowType>().map_err(|e| {
            EngineError::InvalidWorkflowType(format!("definition {}: {}", self.id, e))
        })?;

        Ok(WorkflowDefinition {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            entity_type: self.entity_type,
            workflow_type,
            is_active: self.is_active,
            is_default: self.is_default,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Store persisting every record as JSON under a data root
pub struct FileStore {
    layout: StoreLayout,
    // serializes read-modify-write of definition documents
    definitions_lock: Mutex<()>,
    history_lock: Mutex<()>,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let layout = StoreLayout::new(root);

        for dir in layout.all_dirs() {
            fs::create_dir_all(&dir)?;
        }

        Ok(Self {
            layout,
            definitions_lock: Mutex::new(()),
            history_lock: Mutex::new(()),
        })
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Write via a staged temp file and rename so readers never see partial JSON
    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| EngineError::Storage(format!("Failed to serialize {}: {}", path.display(), e)))?;

        let staged = self.layout.tmp_dir().join(format!("{}.json", uuid::Uuid::new_v4()));
        fs::write(&staged, json)?;
        fs::rename(&staged, path)?;
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| EngineError::Storage(format!("Failed to deserialize {}: {}", path.display(), e)))
    }

    fn json_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("json") {
                files.push(path);
            }
        }
        Ok(files)
    }

    fn read_all<T: DeserializeOwned>(&self, dir: &Path) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for path in self.json_files(dir)? {
            // a file can be renamed away between listing and reading
            if let Some(record) = self.read_json(&path)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn documents(&self) -> Result<Vec<DefinitionDocument>> {
        self.read_all(&self.layout.definitions_dir())
    }

    fn document(&self, id: &DefinitionId) -> Result<Option<DefinitionDocument>> {
        self.read_json(&self.layout.definition_file(id))
    }

    /// Clear `is_default` on every other definition of the entity type. Caller holds `definitions_lock`
    fn clear_defaults(&self, entity_type: EntityType, keep: DefinitionId) -> Result<()> {
        for mut document in self.documents()? {
            if document.entity_type == entity_type && document.id != keep && document.is_default {
                document.is_default = false;
                document.updated_at = Utc::now();
                self.write_json(&self.layout.definition_file(&document.id), &document)?;
                log::info!("Cleared default flag on definition {}", document.id);
            }
        }
        Ok(())
    }

    /// Read a request from a specific status directory; the directory wins over the stored field
    fn read_request(&self, status: RequestStatus, id: &RequestId) -> Result<Option<ApprovalRequest>> {
        let request: Option<ApprovalRequest> = self.read_json(&self.layout.request_file(status, id))?;
        Ok(request.map(|mut r| {
            r.status = status;
            r
        }))
    }

    fn find_request(&self, id: &RequestId) -> Result<Option<ApprovalRequest>> {
        for status in REQUEST_STATES {
            if let Some(request) = self.read_request(status, id)? {
                return Ok(Some(request));
            }
        }
        Ok(None)
    }

    fn requests_in(&self, status: RequestStatus) -> Result<Vec<ApprovalRequest>> {
        let mut requests: Vec<ApprovalRequest> = self.read_all(&self.layout.request_state_dir(status))?;
        for request in &mut requests {
            request.status = status;
        }
        Ok(requests)
    }

    fn instances(&self) -> Result<Vec<WorkflowInstance>> {
        self.read_all(&self.layout.instances_dir())
    }
}

#[async_trait]
impl DefinitionStore for FileStore {
    async fn create_definition(&self, definition: &WorkflowDefinition) -> Result<()> {
        let _guard = self.definitions_lock.lock().await;

        let path = self.layout.definition_file(&definition.id);
        if path.exists() {
            return Err(EngineError::Storage(format!("Definition {} already exists", definition.id)));
        }

        if definition.is_default {
            self.clear_defaults(definition.entity_type, definition.id)?;
        }
        self.write_json(&path, &DefinitionDocument::new(definition))?;

        log::info!("Created workflow definition {} ({})", definition.id, definition.name);
        Ok(())
    }

    async fn get_definition(&self, id: DefinitionId) -> Result<Option<WorkflowDefinition>> {
        self.document(&id)?.map(|d| d.definition()).transpose()
    }

    async fn get_default_definition(&self, entity_type: EntityType) -> Result<Option<WorkflowDefinition>> {
        self.documents()?
            .into_iter()
            .find(|d| d.entity_type == entity_type && d.is_default && d.is_active)
            .map(|d| d.definition())
            .transpose()
    }

    async fn list_definitions(&self, entity_type: Option<EntityType>) -> Result<Vec<WorkflowDefinition>> {
        let mut definitions = self
            .documents()?
            .into_iter()
            .filter(|d| entity_type.map_or(true, |t| d.entity_type == t))
            .map(|d| d.definition())
            .collect::<Result<Vec<_>>>()?;
        definitions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(definitions)
    }

    async fn set_default(&self, id: DefinitionId) -> Result<bool> {
        let _guard = self.definitions_lock.lock().await;

        let Some(mut document) = self.document(&id)? else {
            return Ok(false);
        };
        self.clear_defaults(document.entity_type, id)?;
        document.is_default = true;
        document.updated_at = Utc::now();
        self.write_json(&self.layout.definition_file(&id), &document)?;
        Ok(true)
    }

    async fn set_active(&self, id: DefinitionId, active: bool) -> Result<bool> {
        let _guard = self.definitions_lock.lock().await;

        let Some(mut document) = self.document(&id)? else {
            return Ok(false);
        };
        document.is_active = active;
        document.updated_at = Utc::now();
        self.write_json(&self.layout.definition_file(&id), &document)?;
        Ok(true)
    }

    async fn insert_step(&self, step: &WorkflowStep) -> Result<()> {
        let _guard = self.definitions_lock.lock().await;

        let mut document = self
            .document(&step.workflow_definition_id)?
            .ok_or_else(|| EngineError::DefinitionNotFound(step.workflow_definition_id.to_string()))?;

        if document.steps.iter().any(|s| s.step_order == step.step_order) {
            return Err(EngineError::Validation(format!(
                "Definition {} already has a step at order {}",
                step.workflow_definition_id, step.step_order
            )));
        }

        document.steps.push(step.clone());
        document.steps.sort_by_key(|s| s.step_order);
        document.updated_at = Utc::now();
        self.write_json(&self.layout.definition_file(&document.id), &document)
    }

    async fn list_steps(&self, definition_id: DefinitionId) -> Result<Vec<WorkflowStep>> {
        let mut steps = self.document(&definition_id)?.map(|d| d.steps).unwrap_or_default();
        steps.sort_by_key(|s| s.step_order);
        Ok(steps)
    }

    async fn get_step(&self, id: StepId) -> Result<Option<WorkflowStep>> {
        Ok(self
            .documents()?
            .into_iter()
            .flat_map(|d| d.steps)
            .find(|s| s.id == id))
    }
}

#[async_trait]
impl InstanceStore for FileStore {
    async fn insert_instance(&self, instance: &WorkflowInstance) -> Result<()> {
        self.write_json(&self.layout.instance_file(&instance.id), instance)
    }

    async fn update_instance(&self, instance: &WorkflowInstance) -> Result<()> {
        let path = self.layout.instance_file(&instance.id);
        if !path.exists() {
            return Err(EngineError::InstanceNotFound(instance.id));
        }
        self.write_json(&path, instance)
    }

    async fn get_instance(&self, id: InstanceId) -> Result<Option<WorkflowInstance>> {
        self.read_json(&self.layout.instance_file(&id))
    }

    async fn find_instance_for_entity(&self, entity_type: EntityType, entity_id: &str) -> Result<Option<WorkflowInstance>> {
        Ok(self
            .instances()?
            .into_iter()
            .filter(|i| i.entity_type == entity_type && i.entity_id == entity_id)
            .max_by_key(|i| i.initiated_at))
    }

    async fn list_active_instances(&self) -> Result<Vec<WorkflowInstance>> {
        let mut instances: Vec<_> = self
            .instances()?
            .into_iter()
            .filter(|i| !i.is_terminal())
            .collect();
        instances.sort_by_key(|i| i.initiated_at);
        Ok(instances)
    }

    async fn insert_request(&self, request: &ApprovalRequest) -> Result<()> {
        self.write_json(&self.layout.request_file(request.status, &request.id), request)
    }

    async fn get_request(&self, id: RequestId) -> Result<Option<ApprovalRequest>> {
        self.find_request(&id)
    }

    async fn list_requests(&self, instance_id: InstanceId) -> Result<Vec<ApprovalRequest>> {
        let mut requests = Vec::new();
        for status in REQUEST_STATES {
            requests.extend(
                self.requests_in(status)?
                    .into_iter()
                    .filter(|r| r.workflow_instance_id == instance_id),
            );
        }
        sort_requests(&mut requests);
        Ok(requests)
    }

    async fn list_pending_requests(&self) -> Result<Vec<ApprovalRequest>> {
        let mut requests = self.requests_in(RequestStatus::Pending)?;
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    async fn decide_request(&self, id: RequestId, decision: &RequestDecision) -> Result<bool> {
        if !decision.status.is_decided() {
            return Err(EngineError::Validation("A decision must move a request out of pending".to_string()));
        }

        let pending_path = self.layout.request_file(RequestStatus::Pending, &id);
        let Some(mut request) = self.read_request(RequestStatus::Pending, &id)? else {
            return match self.find_request(&id)? {
                Some(_) => Ok(false),
                None => Err(EngineError::RequestNotFound(id)),
            };
        };

        // the rename is the compare-and-swap: only one caller can move the pending file
        let decided_path = self.layout.request_file(decision.status, &id);
        match fs::rename(&pending_path, &decided_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("Request {} was decided concurrently", id);
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        request.apply_decision(decision);
        self.write_json(&decided_path, &request)?;
        Ok(true)
    }

    async fn skip_pending_requests(&self, instance_id: InstanceId, at: DateTime<Utc>) -> Result<usize> {
        let decision = skip_decision(at);
        let mut swept = 0;
        for request in self.requests_in(RequestStatus::Pending)? {
            if request.workflow_instance_id == instance_id && self.decide_request(request.id, &decision).await? {
                swept += 1;
            }
        }
        Ok(swept)
    }

    async fn record_reminder(&self, id: RequestId, at: DateTime<Utc>) -> Result<bool> {
        let Some(mut request) = self.read_request(RequestStatus::Pending, &id)? else {
            return match self.find_request(&id)? {
                Some(_) => Ok(false),
                None => Err(EngineError::RequestNotFound(id)),
            };
        };

        request.reminder_count += 1;
        request.reminder_sent_at = Some(at);
        self.write_json(&self.layout.request_file(RequestStatus::Pending, &id), &request)?;
        Ok(true)
    }

    async fn append_history(&self, entry: &ApprovalHistoryEntry) -> Result<()> {
        let _guard = self.history_lock.lock().await;

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.layout.history_file(&entry.workflow_instance_id))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    async fn list_history(&self, instance_id: InstanceId) -> Result<Vec<ApprovalHistoryEntry>> {
        let content = match fs::read_to_string(self.layout.history_file(&instance_id)) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(EngineError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_creation() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path()).unwrap();

        // Verify directory structure was created
        for dir in store.layout().all_dirs() {
            assert!(dir.exists(), "Directory {:?} should exist", dir);
        }
        assert!(temp_dir.path().join("requests").join("pending").exists());
    }

    #[tokio::test]
    async fn test_unknown_workflow_type_surfaces_on_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path()).unwrap();

        let definition = NewWorkflowDefinition::new("Legacy", EntityType::Project, WorkflowType::Sequential)
            .into_definition();
        store.create_definition(&definition).await.unwrap();

        // Simulate a row written by an older deployment
        let path = store.layout().definition_file(&definition.id);
        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, content.replace("\"sequential\"", "\"majority\"")).unwrap();

        let result = store.get_definition(definition.id).await;
        assert!(matches!(result, Err(EngineError::InvalidWorkflowType(_))));
    }

    #[tokio::test]
    async fn test_insert_step_requires_definition() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path()).unwrap();

        let step = NewWorkflowStep::user(1, "alice@x").into_step(DefinitionId::new());
        let result = store.insert_step(&step).await;
        assert!(matches!(result, Err(EngineError::DefinitionNotFound(_))));
    }

    #[tokio::test]
    async fn test_history_appends_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path()).unwrap();
        let instance_id = InstanceId::new();

        store
            .append_history(&ApprovalHistoryEntry::new(instance_id, HistoryAction::Initiated, "carol@x"))
            .await
            .unwrap();
        store
            .append_history(&ApprovalHistoryEntry::new(instance_id, HistoryAction::Cancelled, "carol@x"))
            .await
            .unwrap();

        let history = store.list_history(instance_id).await.unwrap();
        let actions: Vec<_> = history.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![HistoryAction::Initiated, HistoryAction::Cancelled]);
        assert!(store.list_history(InstanceId::new()).await.unwrap().is_empty());
    }
}
