//! The reader-side engagement state machine.
//!
//! ```text
//! Idle -> Warming -> AwaitingTag -> Negotiating -> Selecting -> Reconciling -> Done
//!                         ^              |
//!                         +--------------+ no outcome, wait for the next tap
//! ```
//!
//! Every non-terminal state can move to `Aborted`. Whatever the exit path, every warmed transport
//! that was not adopted is closed before [EngagementSession::engage] returns.
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::definitions::{ConnectionMethod, HandoverKind};
use crate::engagement::negotiator::HandoverNegotiator;
use crate::engagement::selector::{select_connection_method, ConnectionMethodSelector};
use crate::engagement::{EngagementConfig, EngagementError, EngagementObserver, TracingObserver};
use crate::nfc::HandoverCodec;
use crate::tag::{ExecutionContext, ScanError, SharedTag, TagInteraction, TagScanner};
use crate::transport::{
    Role, SharedTransport, TransportFactory, TransportOptions, TransportReconciler,
    WarmedTransports, WarmupManager,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EngagementState {
    Idle,
    Warming,
    AwaitingTag,
    Negotiating,
    Selecting,
    Reconciling,
    Done,
    Aborted,
}

impl EngagementState {
    pub fn is_terminal(self) -> bool {
        matches!(self, EngagementState::Done | EngagementState::Aborted)
    }
}

/// What a successful engagement hands to the caller, who now owns the transport.
#[derive(Debug)]
pub struct EngagementResult {
    pub transport: SharedTransport,
    pub connection_method: ConnectionMethod,
    pub handover_kind: HandoverKind,
    /// Encoded `DeviceEngagement`, as received.
    pub encoded_device_engagement: Vec<u8>,
    /// Handover Select message, as received.
    pub handover_select: Vec<u8>,
    /// Handover Request message sent to the holder, for negotiated handover.
    pub handover_request: Option<Vec<u8>>,
    /// From tag detection until the handover completed.
    pub tag_interaction_duration: Duration,
}

pub struct EngagementSession<S> {
    scanner: S,
    codec: Arc<dyn HandoverCodec>,
    observer: Arc<dyn EngagementObserver>,
}

impl<S: TagScanner> EngagementSession<S> {
    pub fn new(scanner: S, codec: Arc<dyn HandoverCodec>) -> Self {
        Self {
            scanner,
            codec,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn EngagementObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn scanner(&self) -> &S {
        &self.scanner
    }

    /// Run one engagement as the mdoc reader.
    ///
    /// Transports for `negotiated_handover_candidates` are warmed up while the user is prompted
    /// to tap. Returns `Ok(None)` when the prompt is dismissed or no connection method is
    /// selected. Errors are only returned when there is nothing left to retry: the selected
    /// transport cannot be created, or the scanner reports a fatal tag failure.
    pub async fn engage(
        &self,
        prompt: &str,
        options: &TransportOptions,
        factory: &dyn TransportFactory,
        selector: &dyn ConnectionMethodSelector,
        negotiated_handover_candidates: &[ConnectionMethod],
        context: ExecutionContext,
    ) -> Result<Option<EngagementResult>, EngagementError> {
        self.run(
            prompt,
            Role::MdocReader,
            options,
            factory,
            selector,
            negotiated_handover_candidates,
            &context,
        )
        .await
    }

    /// [EngagementSession::engage] with settings taken from `config`, running tag I/O on the
    /// current task.
    pub async fn engage_with_config(
        &self,
        config: &EngagementConfig,
        factory: &dyn TransportFactory,
        selector: &dyn ConnectionMethodSelector,
    ) -> Result<Option<EngagementResult>, EngagementError> {
        self.run(
            &config.prompt,
            config.role,
            &config.transport_options,
            factory,
            selector,
            &config.negotiated_handover_candidates,
            &ExecutionContext::Current,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        prompt: &str,
        role: Role,
        options: &TransportOptions,
        factory: &dyn TransportFactory,
        selector: &dyn ConnectionMethodSelector,
        candidates: &[ConnectionMethod],
        context: &ExecutionContext,
    ) -> Result<Option<EngagementResult>, EngagementError> {
        let state = StateTracker::new(self.observer.clone());

        state.transition(EngagementState::Warming);
        let warmed = WarmupManager::new(factory, self.observer.clone()).start(candidates, role, options);
        let offered = warmed.methods();
        state.transition(EngagementState::AwaitingTag);

        let interaction = Interaction {
            offered,
            warmed: tokio::sync::Mutex::new(warmed),
            negotiator: HandoverNegotiator::new(self.codec.as_ref(), context, self.observer.clone()),
            selector,
            reconciler: TransportReconciler::new(factory, role, options, self.observer.clone()),
            observer: self.observer.as_ref(),
            state: &state,
        };
        let scanned = self.scanner.scan(prompt, &interaction, context).await;

        interaction.warmed.lock().await.close_all().await;

        let result = match scanned {
            Ok(Engagement::Engaged(result)) => {
                state.transition(EngagementState::Done);
                return Ok(Some(result));
            }
            Ok(Engagement::Declined) | Err(ScanError::Dismissed) => Ok(None),
            Err(ScanError::Tag(e)) => Err(e.into()),
            Err(ScanError::Interaction(e)) => Err(e),
        };
        state.transition(EngagementState::Aborted);
        result
    }
}

enum Engagement {
    Engaged(EngagementResult),
    Declined,
}

struct StateTracker {
    current: Mutex<EngagementState>,
    observer: Arc<dyn EngagementObserver>,
}

impl StateTracker {
    fn new(observer: Arc<dyn EngagementObserver>) -> Self {
        Self {
            current: Mutex::new(EngagementState::Idle),
            observer,
        }
    }

    /// Terminal states are sticky.
    fn transition(&self, to: EngagementState) {
        let from = {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            let from = *current;
            if from.is_terminal() || from == to {
                return;
            }
            *current = to;
            from
        };
        self.observer.state_changed(from, to);
    }
}

/// The per-tap callback handed to the scanner. Owns the warmed transports for the duration of
/// the scan.
struct Interaction<'a> {
    offered: Vec<ConnectionMethod>,
    warmed: tokio::sync::Mutex<WarmedTransports>,
    negotiator: HandoverNegotiator<'a>,
    selector: &'a dyn ConnectionMethodSelector,
    reconciler: TransportReconciler<'a>,
    observer: &'a dyn EngagementObserver,
    state: &'a StateTracker,
}

impl Interaction<'_> {
    async fn decline(&self, tag: &SharedTag) {
        self.state.transition(EngagementState::Aborted);
        self.warmed.lock().await.close_all().await;
        tag.release().await;
    }
}

#[async_trait]
impl TagInteraction<Engagement> for Interaction<'_> {
    async fn on_tag(&self, tag: SharedTag) -> Result<Option<Engagement>, EngagementError> {
        let detected_at = Instant::now();
        self.state.transition(EngagementState::Negotiating);
        let Some(outcome) = self
            .negotiator
            .negotiate(&tag, &self.offered, detected_at)
            .await
        else {
            self.state.transition(EngagementState::AwaitingTag);
            return Ok(None);
        };
        self.observer.outcome_reached(&outcome);

        self.state.transition(EngagementState::Selecting);
        let selected = match select_connection_method(&outcome.selectable_methods(), self.selector).await {
            Ok(Some(method)) => method,
            Ok(None) => {
                self.decline(&tag).await;
                return Ok(Some(Engagement::Declined));
            }
            Err(e) => {
                self.decline(&tag).await;
                return Err(e);
            }
        };

        self.state.transition(EngagementState::Reconciling);
        let transport = {
            let mut warmed = self.warmed.lock().await;
            self.reconciler
                .reconcile(&selected, &mut warmed, Some(tag))
                .await?
        };
        Ok(Some(Engagement::Engaged(EngagementResult {
            transport,
            connection_method: selected,
            handover_kind: outcome.kind,
            encoded_device_engagement: outcome.encoded_device_engagement,
            handover_select: outcome.handover_select,
            handover_request: outcome.handover_request,
            tag_interaction_duration: outcome.elapsed,
        })))
    }
}
