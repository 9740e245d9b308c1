//! Escalation sweeper for pending approval requests
//!
//! Periodically scans pending requests: those whose step carries an
//! auto-approve deadline are approved on behalf of the system once it
//! passes, the rest get reminders at a fixed interval up to a cap. Every
//! action goes through the engine, so a sweep racing a human decision (or
//! another sweeper) ends up counted as already processed.

use crate::config::SweeperConfig;
use crate::constants::SYSTEM_ACTOR;
use crate::engine::WorkflowEngine;
use crate::error::{EngineError, Result};
use approval_types::{ApprovalRequest, StepId, WorkflowStep};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub auto_approved: usize,
    pub reminders_sent: usize,
    pub already_processed: usize,
    pub failed: usize,
}

impl SweepReport {
    pub fn actions(&self) -> usize {
        self.auto_approved + self.reminders_sent
    }
}

pub struct EscalationSweeper {
    engine: Arc<WorkflowEngine>,
    interval: Duration,
    reminder_interval: Option<ChronoDuration>,
    max_reminders: u32,
}

impl EscalationSweeper {
    pub fn new(engine: Arc<WorkflowEngine>, config: &SweeperConfig) -> Self {
        let reminder_interval = match config.reminder_interval_hours {
            0 => None,
            hours => Some(ChronoDuration::hours(i64::from(hours))),
        };

        Self {
            engine,
            interval: Duration::from_secs(config.interval_secs),
            reminder_interval,
            max_reminders: config.max_reminders,
        }
    }

    /// Sweep forever at the configured interval
    pub async fn start(self: Arc<Self>) {
        info!("Starting escalation sweeper (every {:?})", self.interval);

        loop {
            match self.sweep_once(Utc::now()).await {
                Ok(report) if report.actions() > 0 || report.failed > 0 => info!(
                    "Sweep: {} auto-approved, {} reminders, {} already processed, {} failed ({} scanned)",
                    report.auto_approved, report.reminders_sent, report.already_processed, report.failed, report.scanned
                ),
                Ok(report) => debug!("Sweep found nothing due ({} pending)", report.scanned),
                Err(e) => error!("Escalation sweep failed: {}", e),
            }
            sleep(self.interval).await;
        }
    }

    /// Run a single pass as if the clock read `now`
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut pending = self.engine.pending_requests().await?;
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let mut report = SweepReport {
            scanned: pending.len(),
            ..SweepReport::default()
        };
        let mut steps: HashMap<StepId, Option<WorkflowStep>> = HashMap::new();

        for request in &pending {
            let step = match steps.get(&request.step_id) {
                Some(step) => step.clone(),
                None => {
                    let step = match self.engine.get_step(request.step_id).await {
                        Ok(step) => step,
                        Err(e) => {
                            error!("Failed to load step for request {}: {}", request.id, e);
                            report.failed += 1;
                            continue;
                        }
                    };
                    steps.insert(request.step_id, step.clone());
                    step
                }
            };

            if let Some(hours) = auto_approve_due(step.as_ref(), request, now) {
                let comment = Some(format!("Auto-approved after {} hours without a decision", hours));
                match self.engine.approve(request.id, SYSTEM_ACTOR, comment).await {
                    Ok(instance) => {
                        info!("Auto-approved request {} (instance {} now {})", request.id, instance.id, instance.status);
                        report.auto_approved += 1;
                    }
                    Err(e) => record_failure(&mut report, request, "auto-approve", e),
                }
                continue;
            }

            if self.reminder_due(request, now) {
                match self.engine.send_reminder(request.id, now).await {
                    Ok(updated) => {
                        debug!("Reminder {} sent for request {}", updated.reminder_count, request.id);
                        report.reminders_sent += 1;
                    }
                    Err(e) => record_failure(&mut report, request, "reminder", e),
                }
            }
        }

        Ok(report)
    }

    fn reminder_due(&self, request: &ApprovalRequest, now: DateTime<Utc>) -> bool {
        let Some(interval) = self.reminder_interval else {
            return false;
        };
        if request.reminder_count >= self.max_reminders {
            return false;
        }
        let last = request.reminder_sent_at.unwrap_or(request.created_at);
        now - last >= interval
    }
}

/// Hours of the step's auto-approve deadline when it has passed for `request`
///
/// A deadline beyond the representable calendar is never due.
fn auto_approve_due(step: Option<&WorkflowStep>, request: &ApprovalRequest, now: DateTime<Utc>) -> Option<u32> {
    let hours = step?.auto_approve_after_hours?;
    let deadline = request
        .created_at
        .checked_add_signed(ChronoDuration::hours(i64::from(hours)))?;
    (now >= deadline).then_some(hours)
}

fn record_failure(report: &mut SweepReport, request: &ApprovalRequest, action: &str, e: EngineError) {
    if e.is_already_processed() {
        debug!("Request {} was decided before the {} landed", request.id, action);
        report.already_processed += 1;
    } else {
        error!("Failed to {} request {}: {}", action, request.id, e);
        report.failed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approval_types::*;

    fn pending_request(created_at: DateTime<Utc>) -> ApprovalRequest {
        ApprovalRequest {
            id: RequestId::new(),
            workflow_instance_id: InstanceId::new(),
            step_id: StepId::new(),
            step_order: 1,
            approver_email: "alice@x".to_string(),
            eligible_approvers: vec!["alice@x".to_string()],
            status: RequestStatus::Pending,
            decided_by: None,
            decision_at: None,
            decision_comment: None,
            reminder_sent_at: None,
            reminder_count: 0,
            created_at,
        }
    }

    #[test]
    fn test_auto_approve_deadline() {
        let created = Utc::now();
        let request = pending_request(created);
        let step = NewWorkflowStep::user(1, "alice@x").auto_approve_after(4).into_step(DefinitionId::new());

        assert_eq!(auto_approve_due(Some(&step), &request, created + ChronoDuration::hours(3)), None);
        assert_eq!(auto_approve_due(Some(&step), &request, created + ChronoDuration::hours(4)), Some(4));

        let manual = NewWorkflowStep::user(1, "alice@x").into_step(DefinitionId::new());
        assert_eq!(auto_approve_due(Some(&manual), &request, created + ChronoDuration::days(30)), None);
        assert_eq!(auto_approve_due(None, &request, created + ChronoDuration::days(30)), None);
    }

    #[test]
    fn test_unreachable_deadline_is_never_due() {
        let request = pending_request(Utc::now());
        let step = NewWorkflowStep::user(1, "alice@x")
            .auto_approve_after(u32::MAX)
            .into_step(DefinitionId::new());

        assert_eq!(auto_approve_due(Some(&step), &request, Utc::now()), None);
        assert_eq!(auto_approve_due(Some(&step), &request, DateTime::<Utc>::MAX_UTC), None);
    }
}
