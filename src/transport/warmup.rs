//! Pre-emptive transport creation.
//!
//! Warmup starts transports for the negotiated-handover candidates before any tag is seen, so the
//! holder can connect the moment a method is picked. The [WarmedTransports] set owns what was
//! started until each transport is either adopted or closed.
use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;

use crate::definitions::ConnectionMethod;
use crate::engagement::EngagementObserver;
use crate::transport::{Role, SharedTransport, TransportError, TransportFactory, TransportOptions};

pub struct WarmupManager<'f> {
    factory: &'f dyn TransportFactory,
    observer: Arc<dyn EngagementObserver>,
}

impl<'f> WarmupManager<'f> {
    pub fn new(factory: &'f dyn TransportFactory, observer: Arc<dyn EngagementObserver>) -> Self {
        Self { factory, observer }
    }

    /// Create a transport per distinct candidate and start advertising each in the background.
    ///
    /// Returns as soon as the transports exist. Candidates whose transport cannot be created are
    /// left out of the returned set.
    pub fn start(
        &self,
        candidates: &[ConnectionMethod],
        role: Role,
        options: &TransportOptions,
    ) -> WarmedTransports {
        let mut entries = Vec::new();
        for method in ConnectionMethod::dedup(candidates.iter().cloned()) {
            match self.factory.create(&method, role, options) {
                Ok(transport) => {
                    let advertise = spawn_advertise(transport.clone(), self.observer.clone());
                    let mut entry = WarmedTransport::new(transport, self.observer.clone());
                    entry.advertise = Some(advertise);
                    entries.push(entry);
                }
                Err(e) => self.observer.candidate_dropped(&method, &e),
            }
        }
        WarmedTransports { entries }
    }
}

fn spawn_advertise(
    transport: SharedTransport,
    observer: Arc<dyn EngagementObserver>,
) -> JoinHandle<Result<(), TransportError>> {
    tokio::spawn(async move {
        let result = transport.advertise().await;
        if let Err(e) = &result {
            observer.advertise_failed(transport.connection_method(), e);
        }
        result
    })
}

/// A transport this engagement still owns, with its background advertise task.
///
/// Until it is adopted or closed the entry is responsible for the transport: dropping it
/// schedules the close on the current runtime.
pub struct WarmedTransport {
    transport: SharedTransport,
    advertise: Option<JoinHandle<Result<(), TransportError>>>,
    observer: Arc<dyn EngagementObserver>,
    owned: bool,
}

impl WarmedTransport {
    /// Take ownership of `transport`, for instance one created after selection.
    pub fn new(transport: SharedTransport, observer: Arc<dyn EngagementObserver>) -> Self {
        Self {
            transport,
            advertise: None,
            observer,
            owned: true,
        }
    }

    pub fn transport(&self) -> &SharedTransport {
        &self.transport
    }

    pub fn connection_method(&self) -> &ConnectionMethod {
        self.transport.connection_method()
    }

    /// The error of an advertise task that has already finished unsuccessfully. An advertise
    /// still in flight is not waited for.
    pub async fn advertise_failure(&mut self) -> Option<TransportError> {
        if !self.advertise.as_ref().is_some_and(JoinHandle::is_finished) {
            return None;
        }
        match self.advertise.take()?.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(e) => Some(TransportError::AdvertiseFailed {
                method: self.connection_method().clone(),
                reason: e.to_string(),
            }),
        }
    }

    /// Hand the transport over to the caller, who becomes responsible for closing it. A running
    /// advertise task is left running.
    pub fn adopt(mut self) -> SharedTransport {
        self.owned = false;
        self.transport.clone()
    }

    /// Close the transport on a task of its own, so the close completes even if the returned
    /// handle is dropped.
    pub fn spawn_close(mut self) -> JoinHandle<()> {
        self.owned = false;
        if let Some(advertise) = self.advertise.take() {
            advertise.abort();
        }
        tokio::spawn(close_transport(self.transport.clone(), self.observer.clone()))
    }

    pub async fn close(self) {
        let method = self.connection_method().clone();
        if let Err(e) = self.spawn_close().await {
            tracing::error!("closing transport for {method} did not complete: {e}");
        }
    }
}

async fn close_transport(transport: SharedTransport, observer: Arc<dyn EngagementObserver>) {
    transport.close().await;
    observer.transport_closed(transport.connection_method());
}

impl std::fmt::Debug for WarmedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmedTransport")
            .field("transport", &self.transport)
            .field("advertise", &self.advertise)
            .field("owned", &self.owned)
            .finish_non_exhaustive()
    }
}

impl Drop for WarmedTransport {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        if let Some(advertise) = self.advertise.take() {
            advertise.abort();
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(close_transport(self.transport.clone(), self.observer.clone()));
            }
            Err(_) => tracing::error!(
                "transport for {} dropped outside a runtime, unable to close it",
                self.connection_method()
            ),
        }
    }
}

/// The transports warmed up for one engagement.
///
/// Dropping the set closes whatever is still in it, see [WarmedTransport].
#[derive(Debug, Default)]
pub struct WarmedTransports {
    entries: Vec<WarmedTransport>,
}

impl WarmedTransports {
    /// Methods with a live transport, in candidate order.
    pub fn methods(&self) -> Vec<ConnectionMethod> {
        self.entries
            .iter()
            .map(|e| e.connection_method().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove the transport for `method`, if one was warmed up.
    pub fn take(&mut self, method: &ConnectionMethod) -> Option<WarmedTransport> {
        let index = self
            .entries
            .iter()
            .position(|e| e.connection_method() == method)?;
        Some(self.entries.remove(index))
    }

    /// Close every transport still in the set.
    pub async fn close_all(&mut self) {
        self.close_where(|_| true).await
    }

    /// Close every transport except the one for `kept`, which stays in the set.
    pub async fn close_all_except(&mut self, kept: &ConnectionMethod) {
        self.close_where(|method| method != kept).await
    }

    /// The closes run on their own tasks: cancelling the caller does not interrupt them.
    async fn close_where(&mut self, mut closing: impl FnMut(&ConnectionMethod) -> bool) {
        let (closed, remaining) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition::<Vec<_>, _>(|e| closing(e.connection_method()));
        self.entries = remaining;
        let handles = closed.into_iter().map(WarmedTransport::spawn_close);
        for result in join_all(handles).await {
            if let Err(e) = result {
                tracing::error!("closing a warmed transport did not complete: {e}");
            }
        }
    }
}
