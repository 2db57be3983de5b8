//! Choosing one connection method out of those the holder offered.
use async_trait::async_trait;

use crate::definitions::ConnectionMethod;
use crate::engagement::EngagementError;

/// Usually backed by a user-facing choice.
#[async_trait]
pub trait ConnectionMethodSelector: Send + Sync {
    /// Pick one of `methods`, or `None` to abandon the engagement.
    async fn select(&self, methods: &[ConnectionMethod]) -> Option<ConnectionMethod>;
}

/// Always takes the first offered method.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstOffered;

#[async_trait]
impl ConnectionMethodSelector for FirstOffered {
    async fn select(&self, methods: &[ConnectionMethod]) -> Option<ConnectionMethod> {
        methods.first().cloned()
    }
}

/// Picks by transport type, most preferred first. Methods of a type that is not listed are never
/// picked; ties keep the holder's order.
#[derive(Debug, Clone, Default)]
pub struct PreferenceSelector {
    transport_types: Vec<u64>,
}

impl PreferenceSelector {
    /// `transport_types` as in [ConnectionMethod::transport_type].
    pub fn new(transport_types: impl IntoIterator<Item = u64>) -> Self {
        Self {
            transport_types: transport_types.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ConnectionMethodSelector for PreferenceSelector {
    async fn select(&self, methods: &[ConnectionMethod]) -> Option<ConnectionMethod> {
        self.transport_types.iter().find_map(|transport_type| {
            methods
                .iter()
                .find(|m| m.transport_type() == *transport_type)
                .cloned()
        })
    }
}

/// A single candidate is chosen without consulting `selector`. A selection outside `methods` is
/// an error.
pub async fn select_connection_method(
    methods: &[ConnectionMethod],
    selector: &dyn ConnectionMethodSelector,
) -> Result<Option<ConnectionMethod>, EngagementError> {
    match methods {
        [] => Ok(None),
        [only] => Ok(Some(only.clone())),
        _ => match selector.select(methods).await {
            None => Ok(None),
            Some(method) if methods.contains(&method) => Ok(Some(method)),
            Some(method) => Err(EngagementError::SelectionNotOffered(method)),
        },
    }
}
