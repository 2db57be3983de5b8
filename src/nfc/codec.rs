//! The seam between the APDU exchange and the NDEF record layer.
//!
//! Building and parsing the NDEF messages of a handover (TNEP service records, Handover Request,
//! Handover Select, the embedded `DeviceEngagement`) is not done by this crate. The reader driver
//! hands each complete NDEF message to a [HandoverCodec] and treats what comes back as decoded
//! values plus opaque bytes.
use crate::definitions::ConnectionMethod;

/// What a Handover Select message decodes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedHandover {
    pub encoded_device_engagement: Vec<u8>,
    pub connection_methods: Vec<ConnectionMethod>,
}

pub trait HandoverCodec: Send + Sync {
    /// Decode the Handover Select read from a static-handover tag.
    fn decode_static_handover_select(&self, message: &[u8]) -> anyhow::Result<DecodedHandover>;

    /// Build the TNEP service select message answering the holder's service parameter record.
    fn service_select(&self, service_parameter: &[u8]) -> anyhow::Result<Vec<u8>>;

    /// Check the TNEP status message the holder writes after service selection.
    fn check_service_status(&self, status: &[u8]) -> anyhow::Result<()>;

    /// Build the Handover Request offering `offered` to the holder.
    fn handover_request(&self, offered: &[ConnectionMethod]) -> anyhow::Result<Vec<u8>>;

    /// Decode the Handover Select the holder sends back in response to `handover_request`.
    fn decode_negotiated_handover_select(
        &self,
        message: &[u8],
        handover_request: &[u8],
    ) -> anyhow::Result<DecodedHandover>;
}
