//! Approver resolution: step approver references -> notifiable identities

use crate::constants::ROLE_PLACEHOLDER_PREFIX;
use crate::error::Result;
use approval_types::{ApproverType, WorkflowStep};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Who a request is addressed to, fixed when the step becomes live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedApprover {
    pub approver_email: String,
    pub eligible_approvers: Vec<String>,
}

/// Role membership lookup
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn members(&self, role: &str) -> Result<Vec<String>>;
}

#[async_trait]
pub trait ApproverResolver: Send + Sync {
    async fn resolve(&self, step: &WorkflowStep) -> Result<ResolvedApprover>;
}

/// Role directory from a fixed map, usually the `roles` config section
#[derive(Debug, Clone, Default)]
pub struct StaticRoleDirectory {
    roles: BTreeMap<String, Vec<String>>,
}

impl StaticRoleDirectory {
    pub fn new(roles: BTreeMap<String, Vec<String>>) -> Self {
        Self { roles }
    }
}

#[async_trait]
impl RoleDirectory for StaticRoleDirectory {
    async fn members(&self, role: &str) -> Result<Vec<String>> {
        Ok(self.roles.get(role).cloned().unwrap_or_default())
    }
}

/// Resolves user and client steps verbatim and role steps through a directory.
/// Role membership is snapshotted, so later membership changes don't move live requests
pub struct DirectoryApproverResolver {
    roles: Arc<dyn RoleDirectory>,
}

impl DirectoryApproverResolver {
    pub fn new(roles: Arc<dyn RoleDirectory>) -> Self {
        Self { roles }
    }
}

#[async_trait]
impl ApproverResolver for DirectoryApproverResolver {
    async fn resolve(&self, step: &WorkflowStep) -> Result<ResolvedApprover> {
        match step.approver_type {
            ApproverType::User | ApproverType::Client => Ok(ResolvedApprover {
                approver_email: step.approver_value.clone(),
                eligible_approvers: vec![step.approver_value.clone()],
            }),
            ApproverType::Role => {
                let mut members = self.roles.members(&step.approver_value).await?;
                members.sort();
                members.dedup();

                let approver_email = match members.as_slice() {
                    [only] => only.clone(),
                    [] => {
                        log::warn!(
                            "Role '{}' for step {} has no members; request will only be reachable by id",
                            step.approver_value, step.step_order
                        );
                        role_placeholder(&step.approver_value)
                    }
                    _ => role_placeholder(&step.approver_value),
                };

                Ok(ResolvedApprover {
                    approver_email,
                    eligible_approvers: members,
                })
            }
        }
    }
}

pub fn role_placeholder(role: &str) -> String {
    format!("{}{}", ROLE_PLACEHOLDER_PREFIX, role)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approval_types::{DefinitionId, NewWorkflowStep};

    fn resolver(roles: &[(&str, &[&str])]) -> DirectoryApproverResolver {
        let map = roles
            .iter()
            .map(|(role, members)| (role.to_string(), members.iter().map(|m| m.to_string()).collect()))
            .collect();
        DirectoryApproverResolver::new(Arc::new(StaticRoleDirectory::new(map)))
    }

    #[tokio::test]
    async fn test_user_and_client_copied_verbatim() {
        let resolver = resolver(&[]);
        let step = NewWorkflowStep::user(1, "alice@x").into_step(DefinitionId::new());
        let resolved = resolver.resolve(&step).await.unwrap();
        assert_eq!(resolved.approver_email, "alice@x");
        assert_eq!(resolved.eligible_approvers, vec!["alice@x".to_string()]);

        let step = NewWorkflowStep::new(2, ApproverType::Client, "buyer@client.test").into_step(DefinitionId::new());
        assert_eq!(resolver.resolve(&step).await.unwrap().approver_email, "buyer@client.test");
    }

    #[tokio::test]
    async fn test_single_member_role_resolves_to_member() {
        let resolver = resolver(&[("controller", &["dana@x"])]);
        let step = NewWorkflowStep::role(1, "controller").into_step(DefinitionId::new());
        let resolved = resolver.resolve(&step).await.unwrap();
        assert_eq!(resolved.approver_email, "dana@x");
    }

    #[tokio::test]
    async fn test_multi_member_role_keeps_placeholder() {
        let resolver = resolver(&[("finance", &["erin@x", "dana@x", "erin@x"])]);
        let step = NewWorkflowStep::role(1, "finance").into_step(DefinitionId::new());
        let resolved = resolver.resolve(&step).await.unwrap();
        assert_eq!(resolved.approver_email, "role:finance");
        assert_eq!(resolved.eligible_approvers, vec!["dana@x".to_string(), "erin@x".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_role_keeps_placeholder() {
        let resolver = resolver(&[]);
        let step = NewWorkflowStep::role(1, "legal").into_step(DefinitionId::new());
        let resolved = resolver.resolve(&step).await.unwrap();
        assert_eq!(resolved.approver_email, "role:legal");
        assert!(resolved.eligible_approvers.is_empty());
    }
}
