use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::audit::{AuditLog, AuditStatus};
use super::confirm::ConfirmationHandler;
use super::path;
use super::rules::{AccessLevel, FolderRule, Policy};

/// Sliding window used for tool rate limits.
const RATE_WINDOW: Duration = Duration::from_secs(60);

/// What kind of operation is being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Read,
    Write,
    Delete,
    ToolUse,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Read => "read",
            ActionKind::Write => "write",
            ActionKind::Delete => "delete",
            ActionKind::ToolUse => "tool_use",
        }
    }
}

/// A filesystem resource a tool is about to touch.
///
/// The `*Tree` forms cover a path and everything below it: every folder
/// rule nested under the path must allow the operation as well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceAccess {
    Read(PathBuf),
    Write(PathBuf),
    Delete(PathBuf),
    ReadTree(PathBuf),
    WriteTree(PathBuf),
    DeleteTree(PathBuf),
}

impl ResourceAccess {
    pub fn kind(&self) -> ActionKind {
        match self {
            ResourceAccess::Read(_) | ResourceAccess::ReadTree(_) => ActionKind::Read,
            ResourceAccess::Write(_) | ResourceAccess::WriteTree(_) => ActionKind::Write,
            ResourceAccess::Delete(_) | ResourceAccess::DeleteTree(_) => ActionKind::Delete,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            ResourceAccess::Read(p)
            | ResourceAccess::Write(p)
            | ResourceAccess::Delete(p)
            | ResourceAccess::ReadTree(p)
            | ResourceAccess::WriteTree(p)
            | ResourceAccess::DeleteTree(p) => p,
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(
            self,
            ResourceAccess::ReadTree(_)
                | ResourceAccess::WriteTree(_)
                | ResourceAccess::DeleteTree(_)
        )
    }
}

/// Outcome of the pre-invocation gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Allowed,
    Denied(String),
    /// Allowed only if a human approves the given prompt.
    NeedsConfirmation(String),
}

/// Answers access questions against the loaded [`Policy`] and records
/// every decision in the audit log.
///
/// Rule tables are held behind an `Arc` snapshot: evaluation clones the
/// `Arc` and never holds the lock, and `reload` swaps the whole policy.
pub struct PolicyEngine {
    policy: RwLock<Arc<Policy>>,
    confirmation: Option<Arc<dyn ConfirmationHandler>>,
    audit: AuditLog,
    calls: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl PolicyEngine {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy: RwLock::new(Arc::new(policy)),
            confirmation: None,
            audit: AuditLog::new(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_confirmation(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirmation = Some(handler);
        self
    }

    /// Current policy snapshot.
    pub fn policy(&self) -> Arc<Policy> {
        self.policy
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replaces the policy in one step. In-flight decisions keep the
    /// snapshot they started with.
    pub fn reload(&self, policy: Policy) {
        *self
            .policy
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(policy);
        debug!("Policy reloaded");
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn allow_network(&self) -> bool {
        self.policy().allow_network
    }

    pub fn max_execution_time(&self) -> Duration {
        Duration::from_secs(self.policy().max_execution_time_seconds)
    }

    // ── Folder rules ─────────────────────────────────────

    /// Longest-prefix folder rule covering `target`, if any.
    pub fn folder_rule(&self, target: &Path) -> Option<FolderRule> {
        let policy = self.policy();
        let resolved = path::resolve(target);
        policy
            .folders
            .iter()
            .filter_map(|rule| {
                let rule_path = path::resolve(&rule.path);
                resolved
                    .starts_with(&rule_path)
                    .then(|| (path::depth(&rule_path), rule))
            })
            .max_by_key(|(depth, _)| *depth)
            .map(|(_, rule)| rule.clone())
    }

    /// Rules strictly below `target`; they override it for their subtrees.
    pub fn nested_rules(&self, target: &Path) -> Vec<FolderRule> {
        let policy = self.policy();
        let resolved = path::resolve(target);
        policy
            .folders
            .iter()
            .filter(|rule| {
                let rule_path = path::resolve(&rule.path);
                rule_path != resolved && rule_path.starts_with(&resolved)
            })
            .cloned()
            .collect()
    }

    pub fn access_level(&self, target: &Path) -> AccessLevel {
        self.folder_rule(target)
            .map(|rule| rule.access)
            .unwrap_or(AccessLevel::None)
    }

    pub fn can_read(&self, target: impl AsRef<Path>) -> bool {
        self.access_level(target.as_ref()).allows_read()
    }

    pub fn can_write(&self, target: impl AsRef<Path>) -> bool {
        self.access_level(target.as_ref()).allows_write()
    }

    /// Needs both `read_write` access and `allow_delete` on the matching rule.
    pub fn can_delete(&self, target: impl AsRef<Path>) -> bool {
        self.folder_rule(target.as_ref())
            .map(|rule| rule.access.allows_write() && rule.allow_delete)
            .unwrap_or(false)
    }

    /// `can_read` for `target` and every rule nested below it.
    pub fn can_read_tree(&self, target: impl AsRef<Path>) -> bool {
        let target = target.as_ref();
        self.can_read(target)
            && self
                .nested_rules(target)
                .iter()
                .all(|rule| rule.access.allows_read())
    }

    pub fn can_write_tree(&self, target: impl AsRef<Path>) -> bool {
        let target = target.as_ref();
        self.can_write(target)
            && self
                .nested_rules(target)
                .iter()
                .all(|rule| rule.access.allows_write())
    }

    pub fn can_delete_tree(&self, target: impl AsRef<Path>) -> bool {
        let target = target.as_ref();
        self.can_delete(target)
            && self
                .nested_rules(target)
                .iter()
                .all(|rule| rule.access.allows_write() && rule.allow_delete)
    }

    // ── Tool rules ───────────────────────────────────────

    /// Tools without an explicit rule are enabled.
    pub fn can_use_tool(&self, name: &str) -> bool {
        self.policy()
            .tool_rule(name)
            .map(|rule| rule.enabled)
            .unwrap_or(true)
    }

    /// `resource` is a path for `Write`/`Delete` and a tool name for `ToolUse`.
    pub fn requires_confirmation(&self, kind: ActionKind, resource: &str) -> bool {
        match kind {
            ActionKind::Write | ActionKind::Delete => self
                .folder_rule(Path::new(resource))
                .map(|rule| rule.require_confirmation)
                .unwrap_or(false),
            ActionKind::ToolUse => self
                .policy()
                .tool_rule(resource)
                .map(|rule| rule.require_confirmation)
                .unwrap_or(false),
            ActionKind::Read => false,
        }
    }

    /// Asks the configured handler. Without a handler the answer is no.
    pub async fn request_confirmation(&self, message: &str) -> bool {
        match &self.confirmation {
            Some(handler) => handler.confirm(message).await,
            None => {
                warn!("No confirmation handler available, refusing: {message}");
                false
            }
        }
    }

    // ── Gate ─────────────────────────────────────────────

    /// Decides whether `tool` may run with `args`, touching `accesses`.
    ///
    /// Checks run in order: tool enabled, parameter constraints, each
    /// resource against the folder rules, then the rate limit. The first
    /// failure denies. Confirmation prompts are collected from the tool
    /// rule and from any write/delete target whose rule asks for one.
    pub fn authorize(
        &self,
        task_id: Option<&str>,
        tool: &str,
        args: &Map<String, Value>,
        accesses: &[ResourceAccess],
    ) -> Authorization {
        let policy = self.policy();
        let rule = policy.tool_rule(tool);

        if !rule.map(|r| r.enabled).unwrap_or(true) {
            return self.deny(
                task_id,
                ActionKind::ToolUse,
                tool,
                tool,
                "tool is disabled by policy",
            );
        }

        if let Some(rule) = rule {
            for (param, pattern) in &rule.parameters {
                let Some(value) = args.get(param) else {
                    continue;
                };
                let text = value
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| value.to_string());
                if !constraint_matches(pattern, &text) {
                    let reason =
                        format!("argument '{param}' does not satisfy constraint '{pattern}'");
                    return self.deny(task_id, ActionKind::ToolUse, tool, tool, &reason);
                }
            }
        }

        let mut prompts = Vec::new();
        for access in accesses {
            let target = access.path();
            let resource = target.display().to_string();
            let allowed = match access {
                ResourceAccess::Read(_) => self.can_read(target),
                ResourceAccess::Write(_) => self.can_write(target),
                ResourceAccess::Delete(_) => self.can_delete(target),
                ResourceAccess::ReadTree(_) => self.can_read_tree(target),
                ResourceAccess::WriteTree(_) => self.can_write_tree(target),
                ResourceAccess::DeleteTree(_) => self.can_delete_tree(target),
            };
            if !allowed {
                let scope = if access.is_tree() { " (or below it)" } else { "" };
                let reason = format!(
                    "{} access to {resource}{scope} is not permitted",
                    access.kind().as_str()
                );
                return self.deny(task_id, access.kind(), &resource, tool, &reason);
            }
            let nested_confirmation = access.is_tree()
                && access.kind() != ActionKind::Read
                && self
                    .nested_rules(target)
                    .iter()
                    .any(|rule| rule.require_confirmation);
            if nested_confirmation || self.requires_confirmation(access.kind(), &resource) {
                prompts.push(format!("{} {resource}", access.kind().as_str()));
            }
            self.audit.record(
                task_id,
                access.kind().as_str(),
                &resource,
                AuditStatus::Allowed,
                json!({ "tool": tool }),
            );
        }

        if let Some(limit) = rule.map(|r| r.rate_limit).filter(|limit| *limit > 0) {
            if !self.admit_call(tool, limit) {
                let reason = format!("rate limit of {limit} calls per minute exceeded");
                return self.deny(task_id, ActionKind::ToolUse, tool, tool, &reason);
            }
        }

        if rule.map(|r| r.require_confirmation).unwrap_or(false) {
            prompts.insert(0, format!("run tool '{tool}'"));
        }

        self.audit.record(
            task_id,
            ActionKind::ToolUse.as_str(),
            tool,
            AuditStatus::Allowed,
            json!({ "confirmation_required": !prompts.is_empty() }),
        );

        if prompts.is_empty() {
            Authorization::Allowed
        } else {
            Authorization::NeedsConfirmation(format!("Allow {}?", prompts.join(", ")))
        }
    }

    /// Asks for confirmation and records the answer.
    pub async fn confirm(&self, task_id: Option<&str>, tool: &str, prompt: &str) -> bool {
        let confirmed = self.request_confirmation(prompt).await;
        let status = if confirmed {
            AuditStatus::Confirmed
        } else {
            AuditStatus::Rejected
        };
        self.audit.record(
            task_id,
            ActionKind::ToolUse.as_str(),
            tool,
            status,
            json!({ "prompt": prompt }),
        );
        confirmed
    }

    fn deny(
        &self,
        task_id: Option<&str>,
        kind: ActionKind,
        resource: &str,
        tool: &str,
        reason: &str,
    ) -> Authorization {
        self.audit.record(
            task_id,
            kind.as_str(),
            resource,
            AuditStatus::Denied,
            json!({ "tool": tool, "reason": reason }),
        );
        Authorization::Denied(reason.to_string())
    }

    fn admit_call(&self, tool: &str, limit: u32) -> bool {
        let mut calls = self
            .calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let window = calls.entry(tool.to_string()).or_default();
        let now = Instant::now();
        while window
            .front()
            .is_some_and(|at| now.duration_since(*at) >= RATE_WINDOW)
        {
            window.pop_front();
        }
        if window.len() >= limit as usize {
            return false;
        }
        window.push_back(now);
        true
    }
}

/// Full-match regex check; an invalid pattern never matches.
fn constraint_matches(pattern: &str, value: &str) -> bool {
    match Regex::new(&format!("^(?:{pattern})$")) {
        Ok(re) => re.is_match(value),
        Err(e) => {
            warn!("Invalid parameter constraint '{pattern}': {e}");
            false
        }
    }
}
