//! Turns the selected connection method into the one transport handed to the caller.
use std::sync::Arc;

use crate::definitions::ConnectionMethod;
use crate::engagement::{EngagementError, EngagementObserver};
use crate::tag::SharedTag;
use crate::transport::{
    Role, SharedTransport, TransportFactory, TransportOptions, WarmedTransport, WarmedTransports,
};

pub struct TransportReconciler<'a> {
    factory: &'a dyn TransportFactory,
    role: Role,
    options: &'a TransportOptions,
    observer: Arc<dyn EngagementObserver>,
}

impl<'a> TransportReconciler<'a> {
    pub fn new(
        factory: &'a dyn TransportFactory,
        role: Role,
        options: &'a TransportOptions,
        observer: Arc<dyn EngagementObserver>,
    ) -> Self {
        Self {
            factory,
            role,
            options,
            observer,
        }
    }

    /// Resolve `selected` to a transport.
    ///
    /// A warmed transport for `selected` is adopted as is, unless its advertising already failed.
    /// Every other warmed transport is closed before this returns, whether or not a transport is
    /// produced. Until the result is handed out, every transport involved stays owned by
    /// `warmed` or by a [WarmedTransport], so cancelling the call still closes them. Without an adoptable transport a new one is created through the factory and
    /// returned in [crate::transport::TransportState::Created].
    ///
    /// When `tag` is given it is attached to the result if the transport can carry data over it,
    /// and released otherwise.
    pub async fn reconcile(
        &self,
        selected: &ConnectionMethod,
        warmed: &mut WarmedTransports,
        tag: Option<SharedTag>,
    ) -> Result<SharedTransport, EngagementError> {
        // the match stays in the set, and so stays owned, while the others close
        warmed.close_all_except(selected).await;

        let mut adopted = None;
        if let Some(mut entry) = warmed.take(selected) {
            match entry.advertise_failure().await {
                None => adopted = Some(entry),
                Some(e) => {
                    tracing::info!("not adopting {selected}, advertising failed: {e}");
                    entry.close().await;
                }
            }
        }

        let fresh = adopted.is_none();
        let entry = match adopted {
            Some(entry) => entry,
            None => match self.factory.create(selected, self.role, self.options) {
                Ok(transport) => WarmedTransport::new(transport, self.observer.clone()),
                Err(e) => {
                    if let Some(tag) = tag {
                        tag.release().await;
                    }
                    return Err(EngagementError::TransportCreation(e));
                }
            },
        };

        if let Some(tag) = tag {
            if entry.transport().supports_tag_handoff() {
                if let Err(e) = entry.transport().attach_tag(tag.clone()) {
                    entry.close().await;
                    tag.release().await;
                    return Err(EngagementError::TagHandoff(e));
                }
            } else {
                tag.release().await;
            }
        }
        self.observer.transport_adopted(selected, fresh);
        Ok(entry.adopt())
    }
}
