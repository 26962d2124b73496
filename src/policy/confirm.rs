//! Confirmation channel supplied by the hosting application.

use std::io::Write;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::Mutex;

/// Asks a human to approve an action.
///
/// Implementations may answer immediately (tests, scripted policies) or
/// suspend until an interactive prompt or remote round-trip completes.
#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    async fn confirm(&self, message: &str) -> bool;
}

/// Adapts a plain closure into a confirmation handler.
pub struct FnConfirmation<F>(pub F);

#[async_trait]
impl<F> ConfirmationHandler for FnConfirmation<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    async fn confirm(&self, message: &str) -> bool {
        (self.0)(message)
    }
}

/// Answers every prompt the same way.
pub struct FixedConfirmation(pub bool);

#[async_trait]
impl ConfirmationHandler for FixedConfirmation {
    async fn confirm(&self, _message: &str) -> bool {
        self.0
    }
}

/// Prompts on stderr and reads one answer line; anything but y/yes is a no.
///
/// The reader is shared across prompts. A prompt abandoned mid-read leaves
/// pending input in the reader, so the next prompt gets the next line.
pub struct LineConfirmation<R> {
    input: Mutex<R>,
}

impl<R> LineConfirmation<R> {
    pub fn new(input: R) -> Self {
        Self {
            input: Mutex::new(input),
        }
    }
}

#[async_trait]
impl<R> ConfirmationHandler for LineConfirmation<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn confirm(&self, message: &str) -> bool {
        let mut input = self.input.lock().await;
        eprint!("{message} [y/N] ");
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        match input.read_line(&mut answer).await {
            Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}
