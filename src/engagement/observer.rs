//! Hooks into the progress of an engagement.
use crate::definitions::{ConnectionMethod, HandoverOutcome};
use crate::engagement::negotiator::NegotiationError;
use crate::engagement::session::EngagementState;
use crate::transport::TransportError;

/// Every method has a no-op default so implementors only pick the events they need.
#[allow(unused_variables)]
pub trait EngagementObserver: Send + Sync {
    fn state_changed(&self, from: EngagementState, to: EngagementState) {}

    /// A warmup candidate was dropped because its transport could not be created.
    fn candidate_dropped(&self, method: &ConnectionMethod, error: &TransportError) {}

    fn advertise_failed(&self, method: &ConnectionMethod, error: &TransportError) {}

    /// A tag interaction ended without an outcome; scanning continues.
    fn negotiation_failed(&self, error: &NegotiationError) {}

    fn outcome_reached(&self, outcome: &HandoverOutcome) {}

    /// `fresh` is set when the transport was created after selection rather than warmed up.
    fn transport_adopted(&self, method: &ConnectionMethod, fresh: bool) {}

    fn transport_closed(&self, method: &ConnectionMethod) {}
}

/// Reports every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl EngagementObserver for TracingObserver {
    fn state_changed(&self, from: EngagementState, to: EngagementState) {
        tracing::debug!("engagement: {from:?} -> {to:?}");
    }

    fn candidate_dropped(&self, method: &ConnectionMethod, error: &TransportError) {
        tracing::warn!("dropping warmup candidate {method}: {error}");
    }

    fn advertise_failed(&self, method: &ConnectionMethod, error: &TransportError) {
        tracing::warn!("{method} did not advertise: {error}");
    }

    fn negotiation_failed(&self, error: &NegotiationError) {
        tracing::info!("no handover from this tag, keep scanning: {error}");
    }

    fn outcome_reached(&self, outcome: &HandoverOutcome) {
        tracing::info!(
            "{:?} handover in {}ms offering {} method(s)",
            outcome.kind,
            outcome.elapsed.as_millis(),
            outcome.connection_methods.len()
        );
    }

    fn transport_adopted(&self, method: &ConnectionMethod, fresh: bool) {
        if fresh {
            tracing::info!("created transport for {method} after selection");
        } else {
            tracing::info!("adopted warmed transport for {method}");
        }
    }

    fn transport_closed(&self, method: &ConnectionMethod) {
        tracing::debug!("closed transport for {method}");
    }
}
