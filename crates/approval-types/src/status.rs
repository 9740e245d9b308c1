//! Closed enums of the approval data model
//! No string-based state management - stored strings are parsed into these on load

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Returned when a stored string does not name a known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// Business entity kinds that can be routed through an approval workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Proposal,
    Invoice,
    Contract,
    Deliverable,
    Project,
}

string_enum!(EntityType, "entity type", {
    Proposal => "proposal",
    Invoice => "invoice",
    Contract => "contract",
    Deliverable => "deliverable",
    Project => "project",
});

/// Completion semantics of a workflow definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    /// Steps become live one at a time, in `step_order`
    Sequential,
    /// All steps live at once; every required step must approve
    Parallel,
    /// All steps live at once; the first approval wins
    AnyOne,
}

string_enum!(WorkflowType, "workflow type", {
    Sequential => "sequential",
    Parallel => "parallel",
    AnyOne => "any_one",
});

/// How a step's `approver_value` is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverType {
    User,
    Role,
    Client,
}

string_enum!(ApproverType, "approver type", {
    User => "user",
    Role => "role",
    Client => "client",
});

/// Lifecycle of a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    InProgress,
    Approved,
    Rejected,
    Cancelled,
}

string_enum!(InstanceStatus, "instance status", {
    Pending => "pending",
    InProgress => "in_progress",
    Approved => "approved",
    Rejected => "rejected",
    Cancelled => "cancelled",
});

impl InstanceStatus {
    /// Approved, rejected and cancelled instances never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled)
    }
}

/// Lifecycle of a single approval request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Skipped,
}

string_enum!(RequestStatus, "request status", {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
    Skipped => "skipped",
});

impl RequestStatus {
    pub fn is_decided(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// What an audit trail entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Initiated,
    Approved,
    Rejected,
    Cancelled,
    ReminderSent,
}

string_enum!(HistoryAction, "history action", {
    Initiated => "initiated",
    Approved => "approved",
    Rejected => "rejected",
    Cancelled => "cancelled",
    ReminderSent => "reminder_sent",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_type_wire_names() {
        assert_eq!(WorkflowType::AnyOne.as_str(), "any_one");
        assert_eq!(serde_json::to_string(&WorkflowType::AnyOne).unwrap(), "\"any_one\"");
        assert_eq!("any_one".parse::<WorkflowType>().unwrap(), WorkflowType::AnyOne);
    }

    #[test]
    fn test_unknown_workflow_type() {
        let err = "round_robin".parse::<WorkflowType>().unwrap_err();
        assert_eq!(err.value, "round_robin");
        assert!(err.to_string().contains("workflow type"));
    }

    #[test]
    fn test_display_matches_serde() {
        for status in InstanceStatus::ALL {
            let json = serde_json::to_string(status).unwrap();
            assert_eq!(json, format!("\"{}\"", status));
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!InstanceStatus::Pending.is_terminal());
        assert!(!InstanceStatus::InProgress.is_terminal());
        assert!(InstanceStatus::Approved.is_terminal());
        assert!(InstanceStatus::Rejected.is_terminal());
        assert!(InstanceStatus::Cancelled.is_terminal());
    }
}
