//! Transports: the live, connectable objects bound to one [ConnectionMethod].
//!
//! Creating a transport is synchronous and cheap; advertising and connecting are asynchronous.
//! A [SharedTransport] is owned by exactly one party at a time: the [warmup::WarmedTransports]
//! set during the engagement, then whoever receives the engagement result.
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::definitions::ConnectionMethod;
use crate::tag::SharedTag;

pub mod memory;
pub mod reconcile;
pub mod warmup;

pub use reconcile::TransportReconciler;
pub use warmup::{WarmedTransport, WarmedTransports, WarmupManager};

/// Which side of the data-transfer session the transport plays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Mdoc,
    #[default]
    MdocReader,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportOptions {
    /// Prefer L2CAP over GATT for BLE data transfer.
    #[serde(default)]
    pub ble_use_l2cap: bool,
}

/// Lifecycle of a transport. States only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportState {
    Created,
    Advertising,
    Connecting,
    Connected,
    Closed,
}

impl TransportState {
    pub fn can_transition_to(self, next: TransportState) -> bool {
        next > self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("unable to create a transport for {method}: {reason}")]
    CreationFailed {
        method: ConnectionMethod,
        reason: String,
    },
    #[error("advertising {method} failed: {reason}")]
    AdvertiseFailed {
        method: ConnectionMethod,
        reason: String,
    },
    #[error("connecting {method} failed: {reason}")]
    ConnectFailed {
        method: ConnectionMethod,
        reason: String,
    },
    #[error("transport cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        from: TransportState,
        to: TransportState,
    },
    #[error("transport for {0} cannot take over the NFC tag")]
    TagHandoffUnsupported(ConnectionMethod),
}

#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    fn connection_method(&self) -> &ConnectionMethod;

    fn state(&self) -> TransportState;

    /// Make the transport discoverable by the holder.
    async fn advertise(&self) -> Result<(), TransportError>;

    async fn connect(&self) -> Result<(), TransportError>;

    /// Release every resource held by the transport. The engagement closes each transport it
    /// owns at most once.
    async fn close(&self);

    /// Whether the transport carries its data over the NFC tag that was used for engagement.
    fn supports_tag_handoff(&self) -> bool {
        false
    }

    /// Hand the engagement tag over to the transport, which then owns releasing it.
    fn attach_tag(&self, tag: SharedTag) -> Result<(), TransportError> {
        let _ = tag;
        Err(TransportError::TagHandoffUnsupported(
            self.connection_method().clone(),
        ))
    }
}

pub type SharedTransport = Arc<dyn Transport>;

pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        method: &ConnectionMethod,
        role: Role,
        options: &TransportOptions,
    ) -> Result<SharedTransport, TransportError>;
}
