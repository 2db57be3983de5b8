//! The tag-scanning collaborator: how the engagement reaches the holder's NFC tag.
//!
//! The platform owns the NFC radio and the "hold your device" prompt. It presents each detected
//! tag to a [TagInteraction] and keeps scanning for as long as the interaction asks it to retry.
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::engagement::EngagementError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TagError {
    #[error("tag was removed from the field")]
    TagLost,
    #[error("tag I/O failed: {0}")]
    Io(String),
}

/// A tag currently in the field.
#[async_trait]
pub trait TagHandle: Send + Sync + fmt::Debug {
    /// Send one command APDU and wait for its response APDU (payload and status word).
    async fn transceive(&self, command: Vec<u8>) -> Result<Vec<u8>, TagError>;

    /// Stop talking to the tag so the user can take the device away. Calling it again is a
    /// no-op.
    async fn release(&self);
}

pub type SharedTag = Arc<dyn TagHandle>;

/// Where tag round-trips run. Platform tag primitives may block for a whole command/response,
/// so callers can route them onto a runtime that is not driving UI work.
#[derive(Debug, Clone, Default)]
pub enum ExecutionContext {
    /// On the task driving the engagement.
    #[default]
    Current,
    /// Spawned on the given runtime.
    Runtime(tokio::runtime::Handle),
}

impl ExecutionContext {
    pub async fn run<F, T>(&self, task: F) -> Result<T, TagError>
    where
        F: Future<Output = Result<T, TagError>> + Send + 'static,
        T: Send + 'static,
    {
        match self {
            ExecutionContext::Current => task.await,
            ExecutionContext::Runtime(handle) => handle
                .spawn(task)
                .await
                .map_err(|e| TagError::Io(format!("tag task did not complete: {e}")))?,
        }
    }
}

/// Invoked by the scanner once per tag presentment. `Ok(None)` asks the scanner to keep
/// scanning; `Ok(Some(_))` ends the scan with that value.
#[async_trait]
pub trait TagInteraction<T>: Send + Sync {
    async fn on_tag(&self, tag: SharedTag) -> Result<Option<T>, EngagementError>;
}

#[derive(Debug, Error)]
pub enum ScanError {
    /// The user dismissed the prompt.
    #[error("the scan prompt was dismissed")]
    Dismissed,
    /// The scanner gave up on the NFC radio.
    #[error(transparent)]
    Tag(#[from] TagError),
    /// The interaction failed; the scan stops and the error is passed through.
    #[error(transparent)]
    Interaction(#[from] EngagementError),
}

#[async_trait]
pub trait TagScanner: Send + Sync {
    /// Show `prompt` and present tags to `interaction` until it produces a value, the user
    /// dismisses the prompt, or the radio fails. Tag round-trips made by the interaction run on
    /// `context`; platform scanning work can be placed there as well. Timeout
    /// policy belongs to the scanner.
    async fn scan<T: Send + 'static>(
        &self,
        prompt: &str,
        interaction: &dyn TagInteraction<T>,
        context: &ExecutionContext,
    ) -> Result<T, ScanError>;
}
