//! Approval Engine Library
//!
//! Drives business entities (proposals, invoices, contracts, deliverables,
//! projects) through configurable approver chains with sequential, parallel
//! or first-approval-wins completion.

pub mod config;
pub mod clients;
pub mod constants;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod history;
pub mod observer;
pub mod paths;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod sweeper;

// Re-export main types for easy access
pub use config::ApprovalsConfig;
pub use error::{EngineError, Result};

pub use clients::WebhookNotifier;
pub use engine::WorkflowEngine;
pub use observer::{EventKind, WorkflowObserver};
pub use registry::DefinitionRegistry;
pub use resolver::{ApproverResolver, DirectoryApproverResolver, RoleDirectory, StaticRoleDirectory};
pub use store::{DefinitionStore, FileStore, InMemoryStore, InstanceStore};
pub use sweeper::{EscalationSweeper, SweepReport};

// Data model
pub use approval_types::*;
