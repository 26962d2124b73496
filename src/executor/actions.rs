//! Reserved actions handled by the executor itself, never by a tool.

use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::info;

use crate::error::{ToolError, ToolResult};
use crate::task::ExecutionContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoAction {
    /// Succeeds at once with `{confirmed: true}`.
    Confirm,
    /// Acknowledges a question for the human; the answer arrives out of band.
    AskUser,
    /// Sleeps for `seconds`.
    Wait,
}

impl PseudoAction {
    pub const NAMES: [&'static str; 3] = ["confirm_action", "ask_user", "wait"];

    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "confirm_action" => Some(PseudoAction::Confirm),
            "ask_user" => Some(PseudoAction::AskUser),
            "wait" => Some(PseudoAction::Wait),
            _ => None,
        }
    }

    pub fn is_reserved(name: &str) -> bool {
        Self::parse(name).is_some()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PseudoAction::Confirm => "confirm_action",
            PseudoAction::AskUser => "ask_user",
            PseudoAction::Wait => "wait",
        }
    }

    pub async fn perform(
        &self,
        step: u32,
        args: &Map<String, Value>,
        context: &mut ExecutionContext,
    ) -> ToolResult<Value> {
        match self {
            PseudoAction::Confirm => {
                let message = args.get("message").and_then(Value::as_str).unwrap_or("");
                context.push_metadata(
                    "confirmations",
                    json!({
                        "step": step,
                        "action": self.as_str(),
                        "message": message,
                        "confirmed": true,
                    }),
                );
                Ok(json!({ "confirmed": true }))
            }
            PseudoAction::AskUser => {
                let question = args.get("question").and_then(Value::as_str).unwrap_or("");
                info!("[{}] question for the user: {question}", context.task_id);
                Ok(json!({ "acknowledged": true, "question": question, "response": null }))
            }
            PseudoAction::Wait => {
                let (seconds, duration) = wait_seconds(args)?;
                tokio::time::sleep(duration).await;
                Ok(json!({ "waited_seconds": seconds }))
            }
        }
    }
}

fn wait_seconds(args: &Map<String, Value>) -> ToolResult<(f64, Duration)> {
    let value = args
        .get("seconds")
        .filter(|v| !v.is_null())
        .ok_or_else(|| ToolError::MissingArgument("seconds".to_string()))?;
    value
        .as_f64()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok().map(|d| (secs, d)))
        .ok_or_else(|| {
            ToolError::invalid(
                "seconds",
                format!("expected a non-negative number of seconds, got {value}"),
            )
        })
}
