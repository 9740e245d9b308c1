//! Append-only audit trail of workflow transitions
//!
//! History is never the source of truth for state, so a failed append is
//! logged and swallowed instead of failing the transition that caused it.

use crate::error::Result;
use crate::store::InstanceStore;
use approval_types::{ApprovalHistoryEntry, InstanceId};
use std::sync::Arc;

pub struct HistoryLogger {
    store: Arc<dyn InstanceStore>,
}

impl HistoryLogger {
    pub fn new(store: Arc<dyn InstanceStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, entry: ApprovalHistoryEntry) {
        if let Err(e) = self.store.append_history(&entry).await {
            log::error!(
                "Failed to append '{}' history for instance {}: {}",
                entry.action, entry.workflow_instance_id, e
            );
        }
    }

    /// Timeline of an instance, oldest first
    pub async fn timeline(&self, instance_id: InstanceId) -> Result<Vec<ApprovalHistoryEntry>> {
        self.store.list_history(instance_id).await
    }
}
