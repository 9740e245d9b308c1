//! Configuration management for the approval engine

use crate::constants::{DEFAULT_MAX_REMINDERS, DEFAULT_REMINDER_INTERVAL_HOURS, DEFAULT_SWEEP_INTERVAL_SECS};
use crate::error::{EngineError, Result};
use approval_types::{EntityType, NewWorkflowDefinition, NewWorkflowStep, WorkflowType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalsConfig {
    pub storage: StorageConfig,

    #[serde(default)]
    pub sweeper: SweeperConfig,

    /// Role name -> member emails, used to resolve `role` steps
    #[serde(default)]
    pub roles: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub webhook: Option<WebhookConfig>,

    /// Definitions created on startup when missing
    #[serde(default)]
    pub definitions: Vec<DefinitionSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(alias = "path")]  // Accept both 'data_dir' and 'path'
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// 0 disables reminders
    #[serde(default = "default_reminder_interval_hours")]
    pub reminder_interval_hours: u32,

    #[serde(default = "default_max_reminders")]
    pub max_reminders: u32,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            reminder_interval_hours: default_reminder_interval_hours(),
            max_reminders: default_max_reminders(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,

    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,
}

/// A definition template with its steps, as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionSeed {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub entity_type: EntityType,
    pub workflow_type: WorkflowType,
    #[serde(default)]
    pub is_default: bool,
    pub steps: Vec<NewWorkflowStep>,
}

impl DefinitionSeed {
    pub fn to_new_definition(&self) -> NewWorkflowDefinition {
        NewWorkflowDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            entity_type: self.entity_type,
            workflow_type: self.workflow_type,
            is_active: true,
            is_default: self.is_default,
        }
    }
}

// Default functions
fn default_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

fn default_reminder_interval_hours() -> u32 {
    DEFAULT_REMINDER_INTERVAL_HOURS
}

fn default_max_reminders() -> u32 {
    DEFAULT_MAX_REMINDERS
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

impl ApprovalsConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_json_str(&content)
    }

    /// Load configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(EngineError::Config("Storage data_dir is required".to_string()));
        }

        if self.sweeper.interval_secs == 0 {
            return Err(EngineError::Config(
                "Sweeper interval_secs must be greater than zero".to_string()
            ));
        }

        if let Some(webhook) = &self.webhook {
            if webhook.url.is_empty() {
                return Err(EngineError::Config("Webhook url is required when webhook is configured".to_string()));
            }
            if !webhook.url.starts_with("http://") && !webhook.url.starts_with("https://") {
                return Err(EngineError::Config(format!("Webhook url must be http(s): {}", webhook.url)));
            }
        }

        for (role, members) in &self.roles {
            if role.is_empty() {
                return Err(EngineError::Config("Role name is required".to_string()));
            }
            if members.iter().any(|m| m.trim().is_empty()) {
                return Err(EngineError::Config(format!("Role '{}' has an empty member entry", role)));
            }
        }

        let mut defaults = HashSet::new();
        for seed in &self.definitions {
            validate_seed(seed)?;
            if seed.is_default && !defaults.insert(seed.entity_type) {
                return Err(EngineError::Config(format!(
                    "More than one default definition for entity type '{}'", seed.entity_type
                )));
            }
        }

        Ok(())
    }
}

fn validate_seed(seed: &DefinitionSeed) -> Result<()> {
    if seed.name.trim().is_empty() {
        return Err(EngineError::Config("Definition name is required".to_string()));
    }

    if seed.steps.is_empty() {
        return Err(EngineError::Config(format!(
            "Definition '{}' requires at least one step", seed.name
        )));
    }

    let mut orders: Vec<u32> = seed.steps.iter().map(|s| s.step_order).collect();
    orders.sort_unstable();
    for (index, order) in orders.iter().enumerate() {
        if *order != index as u32 + 1 {
            return Err(EngineError::Config(format!(
                "Definition '{}' step orders must be contiguous from 1, got {:?}", seed.name, orders
            )));
        }
    }

    if let Some(step) = seed.steps.iter().find(|s| s.approver_value.trim().is_empty()) {
        return Err(EngineError::Config(format!(
            "Definition '{}' step {} approver_value is required", seed.name, step.step_order
        )));
    }

    Ok(())
}
