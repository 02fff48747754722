//! Call signaling and negotiation for Peerline voice/video calls.
//!
//! Two parties that cannot reach each other directly negotiate a direct
//! media connection using a shared document store as the only signaling
//! channel: the caller stores an offer on a call record, the callee stores
//! an answer, and both sides trickle ICE candidates through two append-only
//! sub-collections until the media engine finds a working path.
//!
//! # Architecture
//!
//! - [`CallRecord`] / [`CandidateRecord`]: the wire records other clients
//!   must honor for interoperability
//! - [`CallPhase`] & [`CallTransition`]: the monotonic call state machine
//! - [`SignalChannel`]: typed pub/sub over the document store
//! - [`Session`]: the per-call arena owning the media connection and the
//!   negotiation guard state
//! - [`NegotiationEngine`]: offer/answer creation and remote-state
//!   application
//! - [`IceGatherer`]: trickle-ICE publication with bounded retry
//! - [`QualityMonitor`]: periodic link-quality classification
//! - [`CallController`]: the façade the UI drives

mod channel;
mod controller;
mod error;
mod gatherer;
mod negotiation;
mod quality;
mod record;
mod session;
mod state;

#[cfg(test)]
pub(crate) mod testutil;

pub use channel::{CallWatch, CandidateWatch, IncomingWatch, SignalChannel};
pub use controller::{CallController, LocalUser};
pub use error::CallError;
pub use gatherer::IceGatherer;
pub use negotiation::{NegotiationEngine, RecordOutcome};
pub use quality::{QualityMonitor, classify_rtt};
pub use record::{CallRecord, CandidateRecord};
pub use session::{RemoteDescription, Session};
pub use state::{CallPhase, CallTransition, InvalidTransition};
