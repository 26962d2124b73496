use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use super::builtin::{
    AskHumanTool, FileDeleteTool, FileListTool, FileMoveTool, FileReadTool, FileWriteTool,
    RunCommandTool, TextReplaceTool, TextSearchTool,
};
use super::Tool;
use crate::executor::PseudoAction;
use crate::policy::ConfirmationHandler;
use crate::sandbox::SandboxRuntime;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("'{0}' is a reserved action name")]
    Reserved(String),
    #[error("a tool named '{0}' is already registered")]
    Duplicate(String),
}

/// Action name → tool lookup, built once at startup.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in tool.
    ///
    /// `run_command` goes through `sandbox`; `ask_human` fails at
    /// invocation time when no `confirmation` channel is given.
    pub fn with_builtins(
        sandbox: Arc<SandboxRuntime>,
        confirmation: Option<Arc<dyn ConfirmationHandler>>,
    ) -> Self {
        let builtins: Vec<Arc<dyn Tool>> = vec![
            Arc::new(FileReadTool),
            Arc::new(FileWriteTool),
            Arc::new(FileListTool),
            Arc::new(FileMoveTool),
            Arc::new(FileDeleteTool),
            Arc::new(TextSearchTool),
            Arc::new(TextReplaceTool),
            Arc::new(RunCommandTool::new(sandbox)),
            Arc::new(AskHumanTool::new(confirmation)),
        ];
        let mut registry = Self::new();
        for tool in builtins {
            // Built-in names are fixed and distinct.
            let _ = registry.register(tool);
        }
        registry
    }

    /// Adds a tool. Names of pseudo-actions and already registered tools
    /// are rejected.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if PseudoAction::is_reserved(&name) {
            return Err(RegistryError::Reserved(name));
        }
        if self.tools.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        debug!("Registered tool {name}");
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Capability list for the planner, one entry per tool, sorted by name.
    pub fn capabilities(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|tool| {
                json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "input_schema": tool.input_schema(),
                })
            })
            .collect()
    }
}
