//! What happens after a step fails.

use std::sync::Arc;

use crate::config::ContinuationMode;
use crate::error::ErrorKind;
use crate::task::{ExecutionContext, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    Continue,
    Stop,
}

/// Decides, after a failed step, whether the run goes on.
///
/// Called once per failure, after the error record has been appended to
/// the context. Cancellation and the run deadline stop the run without
/// consulting the policy.
pub trait ContinuationPolicy: Send + Sync {
    fn decide(&self, step: &Step, kind: ErrorKind, context: &ExecutionContext) -> Continuation;
}

/// Errors that mean the plan itself is wrong; retrying cannot help.
pub fn is_fatal(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnknownTool | ErrorKind::MissingArgument | ErrorKind::InvalidArgument
    )
}

/// Stops at the first failure.
pub struct StopOnError;

impl ContinuationPolicy for StopOnError {
    fn decide(&self, _step: &Step, _kind: ErrorKind, _context: &ExecutionContext) -> Continuation {
        Continuation::Stop
    }
}

/// Stops on fatal kinds, keeps going past anything else.
pub struct ContinueUnlessFatal;

impl ContinuationPolicy for ContinueUnlessFatal {
    fn decide(&self, _step: &Step, kind: ErrorKind, _context: &ExecutionContext) -> Continuation {
        if is_fatal(kind) {
            Continuation::Stop
        } else {
            Continuation::Continue
        }
    }
}

pub fn from_mode(mode: ContinuationMode) -> Arc<dyn ContinuationPolicy> {
    match mode {
        ContinuationMode::StopOnError => Arc::new(StopOnError),
        ContinuationMode::ContinueUnlessFatal => Arc::new(ContinueUnlessFatal),
    }
}
