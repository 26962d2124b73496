use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ErrorKind;

/// Lifecycle of a single step.
///
/// `Pending → Running → {Success | Failed | Skipped}`. `Running` only exists
/// while the executor is awaiting the tool; every step leaves `execute`
/// in `Pending` or a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Failed | StepStatus::Skipped)
    }
}

/// One unit of work in a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// 1-indexed, equal to the step's position in the plan.
    pub step: u32,
    /// Tool name or reserved pseudo-action.
    pub action: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Tool output, opaque to the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(step: u32, action: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            step,
            action: action.into(),
            description: String::new(),
            arguments,
            status: StepStatus::Pending,
            error: None,
            error_kind: None,
            result: None,
            duration_ms: 0,
            timestamp: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Clears everything an execution may have written.
    fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.error = None;
        self.error_kind = None;
        self.result = None;
        self.duration_ms = 0;
        self.timestamp = None;
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan has no steps")]
    Empty,

    #[error("step numbering is incorrect at position {position} (found step {found})")]
    NonContiguous { position: u32, found: u32 },

    #[error("step {step} has an empty action")]
    EmptyAction { step: u32 },
}

/// An ordered list of steps working towards a goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_min: Option<u64>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(goal: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            goal: goal.into(),
            steps,
            summary: None,
            estimated_tokens: None,
            estimated_duration_min: None,
            created_at: Utc::now(),
        }
    }

    /// Parses a plan document produced by the planning service.
    ///
    /// Execution fields are never trusted from the document: every step
    /// starts `pending`. The plan is validated before it is returned.
    pub fn from_document(raw: &str) -> anyhow::Result<Self> {
        let mut plan: Plan = serde_json::from_str(raw)?;
        for step in &mut plan.steps {
            step.reset();
        }
        plan.validate()?;
        Ok(plan)
    }

    /// Checks that steps are numbered `1..=N` in sequence order.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::Empty);
        }
        for (i, step) in self.steps.iter().enumerate() {
            let position = i as u32 + 1;
            if step.step != position {
                return Err(PlanError::NonContiguous {
                    position,
                    found: step.step,
                });
            }
            if step.action.trim().is_empty() {
                return Err(PlanError::EmptyAction { step: step.step });
            }
        }
        Ok(())
    }

    pub fn step(&self, number: u32) -> Option<&Step> {
        self.steps.iter().find(|s| s.step == number)
    }

    /// True when every step ended in `success` or `skipped`.
    pub fn all_succeeded(&self) -> bool {
        self.steps
            .iter()
            .all(|s| matches!(s.status, StepStatus::Success | StepStatus::Skipped))
    }

    pub fn count_with_status(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}
