pub mod connection_method;
pub mod handover;

pub use connection_method::{
    BleOptions, CentralClientMode, ConnectionMethod, NfcOptions, PeripheralServerMode,
    WifiAwareOptions,
};
pub use handover::{HandoverKind, HandoverOutcome};
