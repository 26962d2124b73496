//! Access policy: which folders may be read, written or deleted, which
//! tools may run, and what needs a human's approval first.

pub mod audit;
pub mod confirm;
pub mod engine;
pub mod path;
pub mod rules;

pub use audit::{AuditEntry, AuditLog, AuditStatus};
pub use confirm::{ConfirmationHandler, FixedConfirmation, FnConfirmation, LineConfirmation};
pub use engine::{ActionKind, Authorization, PolicyEngine, ResourceAccess};
pub use rules::{AccessLevel, FolderRule, Policy, ToolRule};
