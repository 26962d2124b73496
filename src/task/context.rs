use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::plan::Plan;
use crate::error::ErrorKind;

/// One failing step, as recorded by the executor's error handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub step: u32,
    pub action: String,
    pub error: String,
    pub kind: ErrorKind,
}

/// Per-run state: observations keyed by step number, error records, and
/// free-form metadata such as recorded confirmations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub task_id: String,
    pub goal: String,
    /// Number of the step currently (or last) being executed. 0 before the first step.
    pub current_step: u32,
    pub observations: BTreeMap<u32, Value>,
    pub errors: Vec<ErrorRecord>,
    pub metadata: Map<String, Value>,
    pub started_at: DateTime<Utc>,
}

impl ExecutionContext {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            task_id: format!("task_{}", uuid::Uuid::new_v4().simple()),
            goal: goal.into(),
            current_step: 0,
            observations: BTreeMap::new(),
            errors: Vec::new(),
            metadata: Map::new(),
            started_at: Utc::now(),
        }
    }

    pub fn for_plan(plan: &Plan) -> Self {
        Self::new(plan.goal.clone())
    }

    pub fn observe(&mut self, step: u32, observation: Value) {
        self.observations.insert(step, observation);
    }

    pub fn observation(&self, step: u32) -> Option<&Value> {
        self.observations.get(&step)
    }

    /// Appends `value` to the array stored under `key`, creating it if needed.
    pub fn push_metadata(&mut self, key: &str, value: Value) {
        let entry = self
            .metadata
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match entry {
            Value::Array(items) => items.push(value),
            other => *other = Value::Array(vec![other.take(), value]),
        }
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Cancelled,
}

/// Terminal record of a run, produced exactly once by `Executor::execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub plan: Plan,
    pub context: ExecutionContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub summary: String,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}
