//! The peer-to-peer media engine the call core drives.
//!
//! The core never implements ICE/DTLS/SRTP itself; it drives an engine's
//! session-description and candidate API through the [`MediaEngine`] /
//! [`MediaConnection`] contract. [`WebRtcEngine`] is the production
//! adapter.

pub mod engine;
pub mod webrtc;

pub use engine::{
    CandidatePairStats, IceCandidate, MediaConfig, MediaConnection, MediaEngine, MediaError,
    SdpKind, SessionDescription, TrackKind, TransportEvent, TransportStats,
};
pub use self::webrtc::WebRtcEngine;
