//! Reader-side device engagement over NFC for ISO/IEC 18013-5 mobile documents.
//!
//! An mdoc reader taps the holder's device, learns how the holder wants to transfer data
//! (static or negotiated NFC handover), and ends up with one live transport for the chosen
//! [definitions::ConnectionMethod]. To keep the tap short, transports for the reader's own
//! candidates are warmed up before any tag is seen and adopted when the holder picks one.
//!
//! The crate is split in layers:
//!
//! - [definitions]: connection methods and the handover outcome.
//! - [nfc]: ISO 7816-4 APDUs and a sans-IO driver for the Type 4 Tag handover exchange.
//! - [transport]: the transport abstraction, warmup and reconciliation of warmed transports.
//! - [tag]: the platform's tag scanner and tag handles.
//! - [engagement]: the session tying the above together.
//!
//! The NDEF record layer and the platform radios are collaborators supplied by the caller, see
//! [nfc::HandoverCodec], [tag::TagScanner] and [transport::TransportFactory].
pub mod definitions;
pub mod engagement;
pub mod nfc;
pub mod tag;
pub mod transport;
