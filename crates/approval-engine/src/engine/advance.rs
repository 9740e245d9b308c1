//! Advancement rules per workflow type
//!
//! Decisions are computed from a snapshot of the instance's steps and
//! requests before anything is written, so an inconsistent snapshot fails
//! the call without touching stored state.

use crate::error::{EngineError, Result};
use approval_types::*;

/// What the engine must do after a request was approved
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// More approvals are outstanding
    Wait,
    /// Sequential only: make the next step live
    ActivateStep(WorkflowStep),
    /// Every required approval is in
    Complete,
}

/// Decide the next move of an in-progress instance
///
/// `steps` must be the definition's steps ordered by `step_order` and
/// `requests` every request of the instance, including the one just approved.
pub fn decide(
    workflow_type: WorkflowType,
    instance: &WorkflowInstance,
    steps: &[WorkflowStep],
    requests: &[ApprovalRequest],
) -> Result<Advance> {
    match workflow_type {
        WorkflowType::AnyOne => Ok(decide_any_one(requests)),
        WorkflowType::Parallel => decide_parallel(instance, steps, requests),
        WorkflowType::Sequential => decide_sequential(instance, steps, requests),
    }
}

fn decide_any_one(requests: &[ApprovalRequest]) -> Advance {
    if requests.iter().any(|r| r.status == RequestStatus::Approved) {
        Advance::Complete
    } else {
        Advance::Wait
    }
}

/// Completion waits on required steps only; a pending optional request does not hold it up.
/// Rejecting any request, optional or not, rejects the instance before this runs.
/// A definition made only of optional steps completes on its first approval
fn decide_parallel(instance: &WorkflowInstance, steps: &[WorkflowStep], requests: &[ApprovalRequest]) -> Result<Advance> {
    let required: Vec<&WorkflowStep> = steps.iter().filter(|s| !s.is_optional).collect();

    if required.is_empty() {
        return Ok(decide_any_one(requests));
    }

    for step in required {
        let request = requests.iter().find(|r| r.step_id == step.id).ok_or_else(|| {
            EngineError::Inconsistent(format!(
                "instance {} has no request for required step {}",
                instance.id, step.step_order
            ))
        })?;

        if request.status != RequestStatus::Approved {
            return Ok(Advance::Wait);
        }
    }

    Ok(Advance::Complete)
}

/// Optional steps are not skipped in sequential mode; each one still waits for its approver
fn decide_sequential(instance: &WorkflowInstance, steps: &[WorkflowStep], requests: &[ApprovalRequest]) -> Result<Advance> {
    let current = steps
        .iter()
        .find(|s| s.step_order == instance.current_step)
        .ok_or_else(|| {
            EngineError::Inconsistent(format!(
                "instance {} points at step {} which its definition does not have",
                instance.id, instance.current_step
            ))
        })?;

    let request = requests
        .iter()
        .rev()
        .find(|r| r.step_id == current.id)
        .ok_or_else(|| {
            EngineError::Inconsistent(format!(
                "instance {} has no request for its current step {}",
                instance.id, current.step_order
            ))
        })?;

    if request.status != RequestStatus::Approved {
        return Ok(Advance::Wait);
    }

    match steps.iter().find(|s| s.step_order == current.step_order + 1) {
        Some(next) => Ok(Advance::ActivateStep(next.clone())),
        None => Ok(Advance::Complete),
    }
}

/// Check a definition's steps before an instance is created for it
pub fn validate_steps(definition_id: DefinitionId, steps: &[WorkflowStep]) -> Result<()> {
    if steps.is_empty() {
        return Err(EngineError::NoStepsConfigured(definition_id));
    }

    for (index, step) in steps.iter().enumerate() {
        let expected = index as u32 + 1;
        if step.step_order != expected {
            return Err(EngineError::InvalidStepSequence(
                definition_id,
                format!("expected step {} but found step {}", expected, step.step_order),
            ));
        }
    }

    Ok(())
}
