use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::error::{ToolError, ToolResult};
use crate::policy::ConfirmationHandler;
use crate::sandbox::SandboxRuntime;
use crate::tools::{opt_str_arg, str_arg, ParamType, Tool, ToolContext, ToolParameter};

// ── run_command ──────────────────────────────────────────

/// Runs a shell command in a throwaway sandbox container.
///
/// A command that exits non-zero is still a successful invocation; the
/// result carries `status: "failed"` and the exit code.
pub struct RunCommandTool {
    sandbox: Arc<SandboxRuntime>,
}

impl RunCommandTool {
    pub fn new(sandbox: Arc<SandboxRuntime>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command in an isolated container with memory, CPU and time limits"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required(
                "command",
                ParamType::String,
                "Shell command to execute (e.g. 'ls -la' or 'python script.py')",
            ),
            ToolParameter::optional(
                "working_dir",
                ParamType::String,
                "Working directory inside the container",
            )
            .with_default(json!(self.sandbox.config().working_dir)),
            ToolParameter::optional(
                "input_data",
                ParamType::String,
                "Standard input for the command",
            ),
        ]
    }

    async fn invoke(&self, args: &Map<String, Value>, ctx: &ToolContext) -> ToolResult<Value> {
        let command = str_arg(args, "command")?;
        if command.trim().is_empty() {
            return Err(ToolError::invalid("command", "must not be empty"));
        }
        let working_dir = opt_str_arg(args, "working_dir");
        let input = opt_str_arg(args, "input_data").filter(|s| !s.is_empty());

        info!("[{}] step {}: run_command {command}", ctx.task_id, ctx.step);
        let output = self
            .sandbox
            .run_command_within(command, working_dir, input, ctx.timeout)
            .await?;
        if !output.success() {
            warn!(
                "Command exited with {}: {command}\n{}",
                output.exit_code,
                output.stderr.trim_end()
            );
        }

        Ok(json!({
            "status": if output.success() { "success" } else { "failed" },
            "returncode": output.exit_code,
            "stdout": output.stdout,
            "stderr": output.stderr,
            "command": command,
        }))
    }

    /// The sandbox enforces the deadline and removes the container first.
    fn enforces_timeout(&self) -> bool {
        true
    }
}

// ── ask_human ────────────────────────────────────────────

/// Puts a question to the human through the confirmation channel.
pub struct AskHumanTool {
    channel: Option<Arc<dyn ConfirmationHandler>>,
}

impl AskHumanTool {
    pub fn new(channel: Option<Arc<dyn ConfirmationHandler>>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl Tool for AskHumanTool {
    fn name(&self) -> &str {
        "ask_human"
    }

    fn description(&self) -> &str {
        "Ask the human for confirmation or a yes/no decision"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::required("question", ParamType::String, "Question for the human")]
    }

    async fn invoke(&self, args: &Map<String, Value>, ctx: &ToolContext) -> ToolResult<Value> {
        let question = str_arg(args, "question")?;
        if question.trim().is_empty() {
            return Err(ToolError::invalid("question", "must not be empty"));
        }
        let channel = self.channel.as_ref().ok_or_else(|| {
            ToolError::Execution(
                "No confirmation channel available, cannot ask the human".to_string(),
            )
        })?;

        info!("[{}] asking human: {question}", ctx.task_id);
        let response = channel.confirm(question).await;

        Ok(json!({
            "status": "success",
            "question": question,
            "response": response,
        }))
    }
}
