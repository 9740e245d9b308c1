//! Hooks fired after the engine commits a transition

use crate::error::Result;
use approval_types::{ApprovalRequest, WorkflowInstance};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ApprovalPending,
    ReminderDue,
    WorkflowCompleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApprovalPending => "approval_pending",
            Self::ReminderDue => "reminder_due",
            Self::WorkflowCompleted => "workflow_completed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives notifications about live requests and finished workflows
///
/// Calls happen after the state change is stored and outside the instance
/// lock. Errors are logged by the engine and never undo the transition.
#[async_trait]
pub trait WorkflowObserver: Send + Sync {
    /// A request became live and waits for its approver
    async fn approval_pending(&self, instance: &WorkflowInstance, request: &ApprovalRequest) -> Result<()>;

    /// A request is still pending and its approver should be nudged
    async fn reminder_due(&self, instance: &WorkflowInstance, request: &ApprovalRequest) -> Result<()> {
        self.approval_pending(instance, request).await
    }

    /// The instance reached approved, rejected or cancelled
    async fn workflow_completed(&self, instance: &WorkflowInstance) -> Result<()>;
}

/// A committed transition waiting to be handed to observers
#[derive(Debug, Clone)]
pub(crate) struct Notification {
    pub kind: EventKind,
    pub instance: WorkflowInstance,
    pub request: Option<ApprovalRequest>,
}

impl Notification {
    pub fn pending(instance: &WorkflowInstance, request: &ApprovalRequest) -> Self {
        Self {
            kind: EventKind::ApprovalPending,
            instance: instance.clone(),
            request: Some(request.clone()),
        }
    }

    pub fn reminder(instance: &WorkflowInstance, request: &ApprovalRequest) -> Self {
        Self {
            kind: EventKind::ReminderDue,
            instance: instance.clone(),
            request: Some(request.clone()),
        }
    }

    pub fn completed(instance: &WorkflowInstance) -> Self {
        Self {
            kind: EventKind::WorkflowCompleted,
            instance: instance.clone(),
            request: None,
        }
    }

    pub async fn deliver(&self, observer: &dyn WorkflowObserver) -> Result<()> {
        match (self.kind, &self.request) {
            (EventKind::ApprovalPending, Some(request)) => observer.approval_pending(&self.instance, request).await,
            (EventKind::ReminderDue, Some(request)) => observer.reminder_due(&self.instance, request).await,
            (EventKind::WorkflowCompleted, _) => observer.workflow_completed(&self.instance).await,
            (_, None) => Ok(()),
        }
    }
}
