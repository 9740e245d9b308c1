//! Materializes approval requests for steps the engine has made live

use crate::error::Result;
use crate::resolver::ApproverResolver;
use approval_types::*;
use chrono::Utc;
use std::sync::Arc;

pub struct RequestDispatcher {
    resolver: Arc<dyn ApproverResolver>,
}

impl RequestDispatcher {
    pub fn new(resolver: Arc<dyn ApproverResolver>) -> Self {
        Self { resolver }
    }

    /// Build (but don't persist) the pending request for `step`
    pub async fn materialize(&self, instance_id: InstanceId, step: &WorkflowStep) -> Result<ApprovalRequest> {
        let resolved = self.resolver.resolve(step).await?;

        Ok(ApprovalRequest {
            id: RequestId::new(),
            workflow_instance_id: instance_id,
            step_id: step.id,
            step_order: step.step_order,
            approver_email: resolved.approver_email,
            eligible_approvers: resolved.eligible_approvers,
            status: RequestStatus::Pending,
            decided_by: None,
            decision_at: None,
            decision_comment: None,
            reminder_sent_at: None,
            reminder_count: 0,
            created_at: Utc::now(),
        })
    }

    pub async fn materialize_all(&self, instance_id: InstanceId, steps: &[WorkflowStep]) -> Result<Vec<ApprovalRequest>> {
        let mut requests = Vec::with_capacity(steps.len());
        for step in steps {
            requests.push(self.materialize(instance_id, step).await?);
        }
        Ok(requests)
    }
}
