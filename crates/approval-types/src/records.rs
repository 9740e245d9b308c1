//! Records of the approval data model

use crate::ids::*;
use crate::status::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reusable approval template for one entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: DefinitionId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub entity_type: EntityType,
    pub workflow_type: WorkflowType,
    pub is_active: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub entity_type: EntityType,
    pub workflow_type: WorkflowType,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_default: bool,
}

fn default_true() -> bool {
    true
}

impl NewWorkflowDefinition {
    pub fn new(name: impl Into<String>, entity_type: EntityType, workflow_type: WorkflowType) -> Self {
        Self {
            name: name.into(),
            description: None,
            entity_type,
            workflow_type,
            is_active: true,
            is_default: false,
        }
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Materialize into a stored definition with a fresh id
    pub fn into_definition(self) -> WorkflowDefinition {
        let now = Utc::now();
        WorkflowDefinition {
            id: DefinitionId::new(),
            name: self.name,
            description: self.description,
            entity_type: self.entity_type,
            workflow_type: self.workflow_type,
            is_active: self.is_active,
            is_default: self.is_default,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One position in a definition's approver chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: StepId,
    pub workflow_definition_id: DefinitionId,
    /// 1-based, unique within the definition
    pub step_order: u32,
    pub approver_type: ApproverType,
    pub approver_value: String,
    pub is_optional: bool,
    /// Pending requests for this step are approved by the sweeper once this many hours pass
    pub auto_approve_after_hours: Option<u32>,
}

/// Input for adding a step to a definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkflowStep {
    pub step_order: u32,
    pub approver_type: ApproverType,
    pub approver_value: String,
    #[serde(default, alias = "optional")]
    pub is_optional: bool,
    #[serde(default)]
    pub auto_approve_after_hours: Option<u32>,
}

impl NewWorkflowStep {
    pub fn new(step_order: u32, approver_type: ApproverType, approver_value: impl Into<String>) -> Self {
        Self {
            step_order,
            approver_type,
            approver_value: approver_value.into(),
            is_optional: false,
            auto_approve_after_hours: None,
        }
    }

    pub fn user(step_order: u32, email: impl Into<String>) -> Self {
        Self::new(step_order, ApproverType::User, email)
    }

    pub fn role(step_order: u32, role: impl Into<String>) -> Self {
        Self::new(step_order, ApproverType::Role, role)
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    pub fn auto_approve_after(mut self, hours: u32) -> Self {
        self.auto_approve_after_hours = Some(hours);
        self
    }

    pub fn into_step(self, definition_id: DefinitionId) -> WorkflowStep {
        WorkflowStep {
            id: StepId::new(),
            workflow_definition_id: definition_id,
            step_order: self.step_order,
            approver_type: self.approver_type,
            approver_value: self.approver_value,
            is_optional: self.is_optional,
            auto_approve_after_hours: self.auto_approve_after_hours,
        }
    }
}

/// One run of a definition against a specific entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: InstanceId,
    pub workflow_definition_id: DefinitionId,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub status: InstanceStatus,
    /// Live step order; only meaningful for sequential workflows (0 otherwise)
    pub current_step: u32,
    pub initiated_by: String,
    pub initiated_at: DateTime<Utc>,
    /// Set exactly once, on the terminal transition
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl WorkflowInstance {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move into a terminal status, stamping `completed_at`
    pub fn finish(&mut self, status: InstanceStatus, at: DateTime<Utc>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.completed_at = Some(at);
    }
}

/// The actionable unit offered to one approver for one step of one instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: RequestId,
    pub workflow_instance_id: InstanceId,
    pub step_id: StepId,
    pub step_order: u32,
    /// Resolved identity, or a `role:<name>` placeholder when a role has several or no members
    pub approver_email: String,
    /// Identities allowed to act on the request, snapshotted at activation
    #[serde(default)]
    pub eligible_approvers: Vec<String>,
    pub status: RequestStatus,
    #[serde(default)]
    pub decided_by: Option<String>,
    pub decision_at: Option<DateTime<Utc>>,
    pub decision_comment: Option<String>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub reminder_count: u32,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRequest {
    /// Whether `email` is the addressee or one of the snapshotted role members
    pub fn is_addressed_to(&self, email: &str) -> bool {
        self.approver_email.eq_ignore_ascii_case(email)
            || self
                .eligible_approvers
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(email))
    }

    pub fn apply_decision(&mut self, decision: &RequestDecision) {
        self.status = decision.status;
        self.decided_by = Some(decision.actor.clone());
        self.decision_at = Some(decision.decided_at);
        self.decision_comment = decision.comment.clone();
    }
}

/// A terminal decision on a pending request, applied with compare-and-swap semantics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDecision {
    pub status: RequestStatus,
    pub actor: String,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// Append-only audit trail entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalHistoryEntry {
    pub id: HistoryEntryId,
    pub workflow_instance_id: InstanceId,
    pub action: HistoryAction,
    pub actor_email: String,
    pub step_id: Option<StepId>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalHistoryEntry {
    pub fn new(workflow_instance_id: InstanceId, action: HistoryAction, actor_email: impl Into<String>) -> Self {
        Self {
            id: HistoryEntryId::new(),
            workflow_instance_id,
            action,
            actor_email: actor_email.into(),
            step_id: None,
            comment: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_step(mut self, step_id: StepId) -> Self {
        self.step_id = Some(step_id);
        self
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_for(approver: &str, eligible: &[&str]) -> ApprovalRequest {
        ApprovalRequest {
            id: RequestId::new(),
            workflow_instance_id: InstanceId::new(),
            step_id: StepId::new(),
            step_order: 1,
            approver_email: approver.to_string(),
            eligible_approvers: eligible.iter().map(|s| s.to_string()).collect(),
            status: RequestStatus::Pending,
            decided_by: None,
            decision_at: None,
            decision_comment: None,
            reminder_sent_at: None,
            reminder_count: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_addressed_to_direct_approver() {
        let request = request_for("Alice@Example.com", &["Alice@Example.com"]);
        assert!(request.is_addressed_to("alice@example.com"));
        assert!(!request.is_addressed_to("bob@example.com"));
    }

    #[test]
    fn test_addressed_to_role_member() {
        let request = request_for("role:finance", &["dana@example.com", "erin@example.com"]);
        assert!(request.is_addressed_to("erin@example.com"));
        assert!(!request.is_addressed_to("role:sales"));
    }

    #[test]
    fn test_new_definition_defaults_active() {
        let json = r#"{"name": "Invoice sign-off", "entity_type": "invoice", "workflow_type": "sequential"}"#;
        let parsed: NewWorkflowDefinition = serde_json::from_str(json).unwrap();
        assert!(parsed.is_active);
        assert!(!parsed.is_default);
    }

    #[test]
    fn test_step_accepts_optional_alias() {
        let json = r#"{"step_order": 2, "approver_type": "client", "approver_value": "client@acme.test", "optional": true}"#;
        let parsed: NewWorkflowStep = serde_json::from_str(json).unwrap();
        assert!(parsed.is_optional);
        assert_eq!(parsed.auto_approve_after_hours, None);
    }

    #[test]
    fn test_finish_stamps_completion() {
        let mut instance = WorkflowInstance {
            id: InstanceId::new(),
            workflow_definition_id: DefinitionId::new(),
            entity_type: EntityType::Invoice,
            entity_id: "42".to_string(),
            status: InstanceStatus::InProgress,
            current_step: 1,
            initiated_by: "carol@x".to_string(),
            initiated_at: Utc::now(),
            completed_at: None,
            notes: None,
        };
        let now = Utc::now();
        instance.finish(InstanceStatus::Cancelled, now);
        assert!(instance.is_terminal());
        assert_eq!(instance.completed_at, Some(now));
    }
}
