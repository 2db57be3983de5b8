//! Orchestration of a reader-side NFC engagement, from warmup to the adopted transport.
pub mod config;
pub mod error;
pub mod negotiator;
pub mod observer;
pub mod selector;
pub mod session;

pub use config::EngagementConfig;
pub use error::EngagementError;
pub use negotiator::{HandoverNegotiator, NegotiationError};
pub use observer::{EngagementObserver, TracingObserver};
pub use selector::{select_connection_method, ConnectionMethodSelector, FirstOffered, PreferenceSelector};
pub use session::{EngagementResult, EngagementSession, EngagementState};
