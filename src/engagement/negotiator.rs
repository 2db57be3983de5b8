//! Runs the handover exchange against one tag presentment.
use std::sync::Arc;

use thiserror::Error;
use tokio::time::Instant;

use crate::definitions::{ConnectionMethod, HandoverOutcome};
use crate::engagement::EngagementObserver;
use crate::nfc::{DisplayBytesAsHex, HandoverCodec, ReaderApduError, ReaderApduHandoverDriver, ReaderApduProgress};
use crate::tag::{ExecutionContext, SharedTag, TagError};

/// Why a tag interaction produced no outcome.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error(transparent)]
    Tag(#[from] TagError),
    #[error(transparent)]
    Apdu(#[from] ReaderApduError),
    #[error("the holder offered no usable connection method")]
    NoConnectionMethods,
}

pub struct HandoverNegotiator<'a> {
    codec: &'a dyn HandoverCodec,
    context: &'a ExecutionContext,
    observer: Arc<dyn EngagementObserver>,
}

impl<'a> HandoverNegotiator<'a> {
    pub fn new(
        codec: &'a dyn HandoverCodec,
        context: &'a ExecutionContext,
        observer: Arc<dyn EngagementObserver>,
    ) -> Self {
        Self {
            codec,
            context,
            observer,
        }
    }

    /// Exchange APDUs with `tag` until the handover completes.
    ///
    /// `candidates` are offered if the tag turns out to do negotiated handover. Any failure,
    /// including a handover without connection methods, is reported to the observer and yields
    /// `None` so the caller can wait for the next presentment.
    pub async fn negotiate(
        &self,
        tag: &SharedTag,
        candidates: &[ConnectionMethod],
        detected_at: Instant,
    ) -> Option<HandoverOutcome> {
        match self.try_negotiate(tag, candidates, detected_at).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                self.observer.negotiation_failed(&e);
                None
            }
        }
    }

    pub async fn try_negotiate(
        &self,
        tag: &SharedTag,
        candidates: &[ConnectionMethod],
        detected_at: Instant,
    ) -> Result<HandoverOutcome, NegotiationError> {
        let (mut driver, mut command) = ReaderApduHandoverDriver::new(self.codec, candidates.to_vec());
        loop {
            tracing::trace!("C-APDU: {}", DisplayBytesAsHex::from(command.as_slice()));
            let target = tag.clone();
            let response = self
                .context
                .run(async move { target.transceive(command).await })
                .await?;
            tracing::trace!("R-APDU: {}", DisplayBytesAsHex::from(response.as_slice()));
            match driver.process_rapdu(&response)? {
                ReaderApduProgress::InProgress(next) => command = next,
                ReaderApduProgress::Done(handover) => {
                    let handover = *handover;
                    if handover.decoded.connection_methods.is_empty() {
                        return Err(NegotiationError::NoConnectionMethods);
                    }
                    return Ok(HandoverOutcome {
                        kind: handover.kind,
                        connection_methods: handover.decoded.connection_methods,
                        encoded_device_engagement: handover.decoded.encoded_device_engagement,
                        handover_select: handover.handover_select,
                        handover_request: handover.handover_request,
                        elapsed: detected_at.elapsed(),
                    });
                }
            }
        }
    }
}
