//! Reader-side NFC engagement: ISO 7816-4 APDUs and the Type 4 Tag handover exchange.
pub mod apdu;
pub mod codec;
pub mod reader;
mod util;

pub use codec::{DecodedHandover, HandoverCodec};
pub use reader::{Capabilities, ReaderApduError, ReaderApduHandoverDriver, ReaderApduProgress, ReaderHandover};
pub use util::{DisplayBytesAsHex, IntoRaw, KnownOrRaw};
