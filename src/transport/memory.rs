//! In-process transports that never touch a radio.
//!
//! Useful for exercising an engagement end to end: every transport a [MemoryTransportFactory]
//! creates is kept so that its lifecycle can be inspected afterwards.
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::definitions::ConnectionMethod;
use crate::tag::SharedTag;
use crate::transport::{
    Role, SharedTransport, Transport, TransportError, TransportFactory, TransportOptions,
    TransportState,
};

#[derive(Debug)]
pub struct MemoryTransport {
    id: Uuid,
    method: ConnectionMethod,
    role: Role,
    options: TransportOptions,
    advertise_delay: Option<Duration>,
    fail_advertise: bool,
    close_delay: Option<Duration>,
    close_count: AtomicUsize,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: TransportState,
    tag: Option<SharedTag>,
}

impl MemoryTransport {
    pub fn new(method: ConnectionMethod, role: Role, options: TransportOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            role,
            options,
            advertise_delay: None,
            fail_advertise: false,
            close_delay: None,
            close_count: AtomicUsize::new(0),
            inner: Mutex::new(Inner {
                state: TransportState::Created,
                tag: None,
            }),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Number of times [Transport::close] was called.
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    pub fn attached_tag(&self) -> Option<SharedTag> {
        self.lock().tag.clone()
    }

    /// Whether `transport` is this instance.
    pub fn is(&self, transport: &SharedTransport) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(transport), self as *const Self)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, to: TransportState) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if !inner.state.can_transition_to(to) {
            return Err(TransportError::InvalidTransition {
                from: inner.state,
                to,
            });
        }
        tracing::trace!("memory transport {} ({}): {:?} -> {to:?}", self.id, self.method, inner.state);
        inner.state = to;
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn connection_method(&self) -> &ConnectionMethod {
        &self.method
    }

    fn state(&self) -> TransportState {
        self.lock().state
    }

    async fn advertise(&self) -> Result<(), TransportError> {
        if let Some(delay) = self.advertise_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_advertise {
            return Err(TransportError::AdvertiseFailed {
                method: self.method.clone(),
                reason: "advertising refused".to_string(),
            });
        }
        self.transition(TransportState::Advertising)
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.transition(TransportState::Connecting)?;
        self.transition(TransportState::Connected)
    }

    async fn close(&self) {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
        let tag = {
            let mut inner = self.lock();
            inner.state = TransportState::Closed;
            inner.tag.take()
        };
        if let Some(tag) = tag {
            tag.release().await;
        }
    }

    fn supports_tag_handoff(&self) -> bool {
        matches!(self.method, ConnectionMethod::Nfc(_))
    }

    fn attach_tag(&self, tag: SharedTag) -> Result<(), TransportError> {
        if !self.supports_tag_handoff() {
            return Err(TransportError::TagHandoffUnsupported(self.method.clone()));
        }
        self.lock().tag = Some(tag);
        Ok(())
    }
}

/// Creates [MemoryTransport]s and remembers each of them.
#[derive(Debug, Default)]
pub struct MemoryTransportFactory {
    failing_creation: HashSet<ConnectionMethod>,
    failing_advertise: HashSet<ConnectionMethod>,
    slow_close: HashMap<ConnectionMethod, Duration>,
    advertise_delay: Option<Duration>,
    created: Mutex<Vec<Arc<MemoryTransport>>>,
}

impl MemoryTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse to create transports for `method`.
    pub fn fail_creation_for(mut self, method: ConnectionMethod) -> Self {
        self.failing_creation.insert(method);
        self
    }

    /// Transports created for `method` fail to advertise.
    pub fn fail_advertise_for(mut self, method: ConnectionMethod) -> Self {
        self.failing_advertise.insert(method);
        self
    }

    /// Closing transports created for `method` takes `delay`.
    pub fn slow_close_for(mut self, method: ConnectionMethod, delay: Duration) -> Self {
        self.slow_close.insert(method, delay);
        self
    }

    /// Advertising takes `delay` before it settles.
    pub fn with_advertise_delay(mut self, delay: Duration) -> Self {
        self.advertise_delay = Some(delay);
        self
    }

    /// Every transport created so far, in creation order.
    pub fn created(&self) -> Vec<Arc<MemoryTransport>> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn created_for(&self, method: &ConnectionMethod) -> Vec<Arc<MemoryTransport>> {
        self.created()
            .into_iter()
            .filter(|t| &t.method == method)
            .collect()
    }
}

impl TransportFactory for MemoryTransportFactory {
    fn create(
        &self,
        method: &ConnectionMethod,
        role: Role,
        options: &TransportOptions,
    ) -> Result<SharedTransport, TransportError> {
        if self.failing_creation.contains(method) {
            return Err(TransportError::CreationFailed {
                method: method.clone(),
                reason: "no such radio".to_string(),
            });
        }
        let mut transport = MemoryTransport::new(method.clone(), role, options.clone());
        transport.advertise_delay = self.advertise_delay;
        transport.fail_advertise = self.failing_advertise.contains(method);
        transport.close_delay = self.slow_close.get(method).copied();
        let transport = Arc::new(transport);
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(transport.clone());
        Ok(transport)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::NfcOptions;

    fn ble() -> ConnectionMethod {
        ConnectionMethod::ble_central_client(Uuid::new_v4())
    }

    #[tokio::test]
    async fn lifecycle() {
        let factory = MemoryTransportFactory::new();
        let method = ble();
        let transport = factory
            .create(&method, Role::MdocReader, &TransportOptions::default())
            .unwrap();
        assert_eq!(transport.state(), TransportState::Created);
        transport.advertise().await.unwrap();
        assert_eq!(transport.state(), TransportState::Advertising);
        transport.connect().await.unwrap();
        assert_eq!(transport.state(), TransportState::Connected);
        transport.close().await;
        assert_eq!(transport.state(), TransportState::Closed);
        assert!(transport.connect().await.is_err());

        let created = factory.created_for(&method);
        assert_eq!(created.len(), 1);
        assert!(created[0].is(&transport));
        assert_eq!(created[0].close_count(), 1);
    }

    #[tokio::test]
    async fn configured_failures() {
        let failing = ble();
        let refusing = ble();
        let factory = MemoryTransportFactory::new()
            .fail_creation_for(failing.clone())
            .fail_advertise_for(refusing.clone());
        let options = TransportOptions::default();
        assert!(matches!(
            factory.create(&failing, Role::MdocReader, &options),
            Err(TransportError::CreationFailed { .. })
        ));
        let transport = factory.create(&refusing, Role::MdocReader, &options).unwrap();
        assert!(matches!(
            transport.advertise().await,
            Err(TransportError::AdvertiseFailed { .. })
        ));
        assert_eq!(factory.created().len(), 1);
    }

    #[test]
    fn only_nfc_takes_the_tag() {
        let options = TransportOptions::default();
        let nfc = MemoryTransport::new(
            ConnectionMethod::Nfc(NfcOptions::default()),
            Role::MdocReader,
            options.clone(),
        );
        let ble = MemoryTransport::new(ble(), Role::MdocReader, options);
        assert!(nfc.supports_tag_handoff());
        assert!(!ble.supports_tag_handoff());
    }
}
