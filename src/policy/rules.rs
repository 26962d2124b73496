//! Declarative policy document: folder rules, tool rules and global limits.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    None,
    Read,
    ReadWrite,
}

impl AccessLevel {
    pub fn allows_read(&self) -> bool {
        matches!(self, AccessLevel::Read | AccessLevel::ReadWrite)
    }

    pub fn allows_write(&self) -> bool {
        matches!(self, AccessLevel::ReadWrite)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderRule {
    pub path: PathBuf,
    #[serde(default = "default_access")]
    pub access: AccessLevel,
    #[serde(default)]
    pub allow_delete: bool,
    #[serde(default)]
    pub require_confirmation: bool,
}

fn default_access() -> AccessLevel {
    AccessLevel::Read
}

impl FolderRule {
    pub fn new(path: impl Into<PathBuf>, access: AccessLevel) -> Self {
        Self {
            path: path.into(),
            access,
            allow_delete: false,
            require_confirmation: false,
        }
    }

    pub fn allow_delete(mut self, allow: bool) -> Self {
        self.allow_delete = allow;
        self
    }

    pub fn require_confirmation(mut self, require: bool) -> Self {
        self.require_confirmation = require;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRule {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub require_confirmation: bool,
    /// Calls per minute; 0 means unlimited.
    #[serde(default)]
    pub rate_limit: u32,
    /// Argument name → regex the (string) argument must match in full.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl Default for ToolRule {
    fn default() -> Self {
        Self {
            enabled: true,
            require_confirmation: false,
            rate_limit: 0,
            parameters: HashMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_tokens() -> u64 {
    100_000
}

fn default_max_execution_time() -> u64 {
    3600
}

/// The full policy. Read-only once loaded; `PolicyEngine::reload` swaps
/// in a new one wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default = "default_max_tokens")]
    pub max_tokens_per_task: u64,
    #[serde(default = "default_max_execution_time")]
    pub max_execution_time_seconds: u64,
    #[serde(default)]
    pub allow_network: bool,
    #[serde(default)]
    pub folders: Vec<FolderRule>,
    #[serde(default)]
    pub tools: HashMap<String, ToolRule>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_tokens_per_task: default_max_tokens(),
            max_execution_time_seconds: default_max_execution_time(),
            allow_network: false,
            folders: Vec::new(),
            tools: HashMap::new(),
        }
    }
}

impl Policy {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read policy file {}: {e}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let expanded = shellexpand::env(content)?;
        let policy: Policy = toml::from_str(&expanded)?;
        Ok(policy)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn with_folder(mut self, rule: FolderRule) -> Self {
        self.folders.push(rule);
        self
    }

    pub fn with_tool(mut self, name: impl Into<String>, rule: ToolRule) -> Self {
        self.tools.insert(name.into(), rule);
        self
    }

    pub fn tool_rule(&self, name: &str) -> Option<&ToolRule> {
        self.tools.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
max_tokens_per_task = 50000
max_execution_time_seconds = 600
allow_network = true

[[folders]]
path = "/home/user/projects"
access = "read_write"
allow_delete = true

[[folders]]
path = "/home/user/projects/secrets"
access = "none"

[[folders]]
path = "/etc"

[tools.run_command]
require_confirmation = true
rate_limit = 10
parameters = { command = "ls.*" }

[tools.file_delete]
enabled = false
"#;

    #[test]
    fn test_parse_policy_file() {
        let policy = Policy::from_toml_str(SAMPLE).unwrap();
        assert_eq!(policy.folders.len(), 3);
        assert_eq!(policy.folders[0].access, AccessLevel::ReadWrite);
        assert!(policy.folders[0].allow_delete);
        assert_eq!(policy.folders[1].access, AccessLevel::None);
        // access defaults to read
        assert_eq!(policy.folders[2].access, AccessLevel::Read);
        assert!(!policy.folders[2].require_confirmation);

        let rc = policy.tool_rule("run_command").unwrap();
        assert!(rc.enabled);
        assert!(rc.require_confirmation);
        assert_eq!(rc.rate_limit, 10);
        assert_eq!(rc.parameters["command"], "ls.*");
        assert!(!policy.tool_rule("file_delete").unwrap().enabled);

        assert_eq!(policy.max_tokens_per_task, 50000);
        assert_eq!(policy.max_execution_time_seconds, 600);
        assert!(policy.allow_network);
    }

    #[test]
    fn test_empty_policy_defaults() {
        let policy = Policy::from_toml_str("").unwrap();
        assert!(policy.folders.is_empty());
        assert!(policy.tools.is_empty());
        assert_eq!(policy.max_tokens_per_task, 100_000);
        assert_eq!(policy.max_execution_time_seconds, 3600);
        assert!(!policy.allow_network);
        assert_eq!(policy, Policy::default());
    }

    #[test]
    fn test_invalid_access_level_rejected() {
        let raw = "[[folders]]\npath = \"/tmp\"\naccess = \"everything\"\n";
        assert!(Policy::from_toml_str(raw).is_err());
    }

    #[test]
    fn test_env_expansion_in_paths() {
        std::env::set_var("COWORK_POLICY_TEST_ROOT", "/srv/data");
        let raw = "[[folders]]\npath = \"${COWORK_POLICY_TEST_ROOT}/in\"\n";
        let policy = Policy::from_toml_str(raw).unwrap();
        assert_eq!(policy.folders[0].path, PathBuf::from("/srv/data/in"));
    }

    #[test]
    fn test_toml_roundtrip_preserves_rules() {
        let policy = Policy::default()
            .with_folder(FolderRule::new("/data", AccessLevel::ReadWrite).allow_delete(true))
            .with_tool("run_command", ToolRule { rate_limit: 3, ..ToolRule::default() });
        let text = policy.to_toml_string().unwrap();
        assert_eq!(Policy::from_toml_str(&text).unwrap(), policy);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Policy::load("/nonexistent/policy.toml").unwrap_err();
        assert!(err.to_string().contains("Cannot read policy file"));
    }

    #[test]
    fn test_access_level_ordering() {
        assert!(AccessLevel::ReadWrite > AccessLevel::Read);
        assert!(AccessLevel::Read.allows_read());
        assert!(!AccessLevel::Read.allows_write());
        assert!(!AccessLevel::None.allows_read());
    }

    #[test]
    fn test_sample_policy_parses() {
        let policy = Policy::from_toml_str(include_str!("../../config/policy.toml")).unwrap();
        assert_eq!(policy.folders.len(), 3);
        assert!(policy.folders[1].allow_delete);
        assert_eq!(policy.tool_rule("run_command").unwrap().rate_limit, 10);
        assert!(!policy.allow_network);
    }
}
