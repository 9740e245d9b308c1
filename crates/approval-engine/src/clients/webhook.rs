//! Webhook client posting workflow events as JSON

use crate::config::WebhookConfig;
use crate::error::{EngineError, Result};
use crate::observer::{EventKind, WorkflowObserver};
use approval_types::{ApprovalRequest, WorkflowInstance};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::json;
use std::time::Duration;

pub struct WebhookNotifier {
    url: String,
    http_client: HttpClient,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            url: config.url.clone(),
            http_client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, event: EventKind, instance: &WorkflowInstance, request: Option<&ApprovalRequest>) -> Result<()> {
        let payload = json!({
            "event": event,
            "instance": instance,
            "request": request,
        });

        let response = self.http_client.post(&self.url).json(&payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(EngineError::ServiceUnavailable(format!(
                "Webhook rejected {} event with {}: {}",
                event, status, error_text
            )));
        }

        log::debug!("Delivered {} event for instance {} to webhook", event, instance.id);
        Ok(())
    }
}

#[async_trait]
impl WorkflowObserver for WebhookNotifier {
    async fn approval_pending(&self, instance: &WorkflowInstance, request: &ApprovalRequest) -> Result<()> {
        self.post(EventKind::ApprovalPending, instance, Some(request)).await
    }

    async fn reminder_due(&self, instance: &WorkflowInstance, request: &ApprovalRequest) -> Result<()> {
        self.post(EventKind::ReminderDue, instance, Some(request)).await
    }

    async fn workflow_completed(&self, instance: &WorkflowInstance) -> Result<()> {
        self.post(EventKind::WorkflowCompleted, instance, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_from_config() {
        let config = WebhookConfig {
            url: "http://localhost:9/hooks/approvals".to_string(),
            timeout_secs: 5,
        };
        let notifier = WebhookNotifier::new(&config).unwrap();
        assert_eq!(notifier.url(), "http://localhost:9/hooks/approvals");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        let config = WebhookConfig {
            url: "http://127.0.0.1:9/hooks".to_string(),
            timeout_secs: 1,
        };
        let notifier = WebhookNotifier::new(&config).unwrap();
        let instance = WorkflowInstance {
            id: approval_types::InstanceId::new(),
            workflow_definition_id: approval_types::DefinitionId::new(),
            entity_type: approval_types::EntityType::Contract,
            entity_id: "c-7".to_string(),
            status: approval_types::InstanceStatus::Approved,
            current_step: 0,
            initiated_by: "carol@x".to_string(),
            initiated_at: chrono::Utc::now(),
            completed_at: Some(chrono::Utc::now()),
            notes: None,
        };

        assert!(notifier.workflow_completed(&instance).await.is_err());
    }
}
