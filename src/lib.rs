//! Call negotiation core for the Peerline chat application.
//!
//! Everything conventional about the chat application (message lists,
//! contacts, auth) lives elsewhere; this crate is the part that takes real
//! engineering: negotiating a direct audio/video connection between two
//! peers whose only shared channel is a slow, asynchronous document store.
//!
//! # Architecture
//!
//! - [`store`]: the document-store contract used as the signaling relay,
//!   plus an in-memory implementation.
//! - [`media`]: the peer-to-peer media engine contract and the production
//!   WebRTC adapter.
//! - [`calls`]: the call core — wire records, state machine, negotiation
//!   engine, trickle-ICE gatherer, quality monitor, and the
//!   [`calls::CallController`] façade the UI talks to.
//! - [`types`]: shared vocabulary (ids, status, quality levels) and the
//!   UI-facing event stream.

pub mod calls;
pub mod config;
pub mod media;
pub mod store;
pub mod types;

pub use calls::{CallController, CallError};
pub use config::CallConfig;
pub use types::call::{CallId, CallStatus, MediaKind, QualityLevel};
pub use types::events::CallEvent;
