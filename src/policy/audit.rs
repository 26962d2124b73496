//! Append-only audit trail of policy decisions.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Allowed,
    Denied,
    Confirmed,
    Rejected,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Allowed => "allowed",
            AuditStatus::Denied => "denied",
            AuditStatus::Confirmed => "confirmed",
            AuditStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub action: String,
    pub resource: String,
    pub status: AuditStatus,
    pub details: Value,
}

/// Shared between concurrent runs; appends take the lock, reads copy out.
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        task_id: Option<&str>,
        action: &str,
        resource: &str,
        status: AuditStatus,
        details: Value,
    ) {
        info!("Audit: {action} {resource} -> {}", status.as_str());
        let entry = AuditEntry {
            timestamp: Utc::now(),
            task_id: task_id.map(str::to_string),
            action: action.to_string(),
            resource: resource.to_string(),
            status,
            details,
        };
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
    }

    /// All entries in chronological order.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn entries_for_task(&self, task_id: &str) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|e| e.task_id.as_deref() == Some(task_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
