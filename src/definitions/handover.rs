//! The result of the tag-level handover exchange.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::definitions::ConnectionMethod;

/// How the holder's tag decided the data-transfer channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandoverKind {
    /// The connection methods are fixed in the holder's Handover Select message.
    Static,
    /// The reader offered candidates in a Handover Request and the holder answered with its
    /// chosen subset.
    Negotiated,
}

/// Produced once per successful tag interaction. Immutable; the byte payloads are opaque to this
/// crate and are forwarded untouched to the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandoverOutcome {
    pub kind: HandoverKind,
    /// Candidate methods, as decoded from the handover payload. Never empty.
    pub connection_methods: Vec<ConnectionMethod>,
    /// Encoded `DeviceEngagement` of the holder.
    pub encoded_device_engagement: Vec<u8>,
    /// Raw Handover Select NDEF message.
    pub handover_select: Vec<u8>,
    /// Raw Handover Request NDEF message sent by the reader; only present for negotiated
    /// handover.
    pub handover_request: Option<Vec<u8>>,
    /// Time from tag detection to this outcome being produced.
    pub elapsed: Duration,
}

impl HandoverOutcome {
    /// Candidate methods with dual-mode BLE entries split so every entry names exactly one
    /// channel.
    pub fn selectable_methods(&self) -> Vec<ConnectionMethod> {
        ConnectionMethod::disambiguate(self.connection_methods.iter().cloned())
    }
}
