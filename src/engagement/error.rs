use thiserror::Error;

use crate::definitions::ConnectionMethod;
use crate::tag::TagError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum EngagementError {
    /// No warmed transport could be adopted and creating one for the selected method failed.
    #[error("unable to create a transport for the selected connection method: {0}")]
    TransportCreation(#[source] TransportError),
    #[error("unable to hand the tag over to the transport: {0}")]
    TagHandoff(#[source] TransportError),
    #[error(transparent)]
    Tag(#[from] TagError),
    /// The selector answered with a method the holder did not offer.
    #[error("connection method {0} was not offered by the holder")]
    SelectionNotOffered(ConnectionMethod),
}
