//! Media engine contract: session descriptions, candidates, transport
//! events, and statistics.

use crate::types::call::MediaKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Engine configuration: the pool of public relay/reflection servers and
/// the candidate-pool size hint.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub ice_servers: Vec<String>,
    pub ice_candidate_pool_size: u8,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                "stun:stun1.l.google.com:19302".to_string(),
                "stun:stun2.l.google.com:19302".to_string(),
            ],
            ice_candidate_pool_size: 10,
        }
    }
}

/// Whether a description proposes a configuration or chooses one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description as stored on the call record: `{ "type", "sdp" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// One network-reachability descriptor plus the metadata needed to apply it
/// to a peer connection. Field names are the candidate-record wire contract
/// (the browser `RTCIceCandidate.toJSON()` shape).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}

/// Kind of a single media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Engine-side transport notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// A candidate pair succeeded; media can flow.
    Connected,
    /// Connectivity was lost (the engine may still recover).
    Disconnected,
    /// Connectivity failed permanently.
    Failed,
    /// The connection was closed.
    Closed,
    /// A remote media track arrived.
    RemoteTrack(TrackKind),
}

/// Statistics of one candidate pair at sampling time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidatePairStats {
    /// Whether this is the succeeded pair carrying the call.
    pub succeeded: bool,
    pub round_trip_time: Option<Duration>,
}

/// A snapshot of the transport's statistics.
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub pairs: Vec<CandidatePairStats>,
}

impl TransportStats {
    /// Round-trip time of the succeeded candidate pair, if one was measured
    /// this sample.
    pub fn succeeded_rtt(&self) -> Option<Duration> {
        self.pairs
            .iter()
            .filter(|pair| pair.succeeded)
            .filter_map(|pair| pair.round_trip_time)
            .last()
    }
}

#[derive(Debug, Error)]
pub enum MediaError {
    /// Camera/microphone unavailable or denied. Fatal to starting a call.
    #[error("media acquisition failed: {0}")]
    Acquisition(String),

    /// Malformed or incompatible description/candidate. Fatal to the call.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection closed")]
    Closed,
}

/// Factory for media connections with local media already acquired and
/// attached.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Acquire local media for `kind` and open a connection around it.
    /// Acquisition failure is reported as [`MediaError::Acquisition`] and
    /// must leave nothing to release.
    async fn connect(&self, kind: MediaKind) -> Result<Arc<dyn MediaConnection>, MediaError>;
}

/// One live peer connection.
///
/// The streams returned by the `take_*` methods are single-consumer: the
/// first caller takes ownership, later calls return `None`.
#[async_trait]
pub trait MediaConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;

    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MediaError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaError>;

    /// Apply a remote candidate. Applying the same candidate twice must not
    /// error.
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError>;

    /// Locally discovered candidates, in discovery order.
    async fn take_local_candidates(&self) -> Option<mpsc::UnboundedReceiver<IceCandidate>>;

    /// Connection-state and remote-track notifications.
    async fn take_transport_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Flip local outbound track enablement. Purely local, no signaling
    /// side effect, never suspends. Returns the effective state (`false`
    /// when the connection carries no such track).
    fn set_outbound_enabled(&self, kind: TrackKind, enabled: bool) -> bool;

    /// Sample transport statistics.
    async fn stats(&self) -> Result<TransportStats, MediaError>;

    /// Close the connection and release local media. Idempotent.
    async fn close(&self) -> Result<(), MediaError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_succeeded_rtt_ignores_unsucceeded_pairs() {
        let stats = TransportStats {
            pairs: vec![
                CandidatePairStats {
                    succeeded: false,
                    round_trip_time: Some(Duration::from_millis(10)),
                },
                CandidatePairStats {
                    succeeded: true,
                    round_trip_time: Some(Duration::from_millis(80)),
                },
            ],
        };
        assert_eq!(stats.succeeded_rtt(), Some(Duration::from_millis(80)));
    }

    #[test]
    fn test_succeeded_rtt_none_when_no_pair_succeeded() {
        let stats = TransportStats {
            pairs: vec![CandidatePairStats {
                succeeded: false,
                round_trip_time: Some(Duration::from_millis(10)),
            }],
        };
        assert_eq!(stats.succeeded_rtt(), None);
        assert_eq!(TransportStats::default().succeeded_rtt(), None);
    }

    #[test]
    fn test_description_wire_shape() {
        let desc = SessionDescription::offer("v=0\r\n");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["sdp"], "v=0\r\n");

        let back: SessionDescription = serde_json::from_value(json).unwrap();
        assert_eq!(back, desc);
    }

    #[test]
    fn test_candidate_wire_shape() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 UDP 2130706431 192.168.1.1 8888 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
            username_fragment: Some("abc123".into()),
        };
        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
        assert_eq!(json["usernameFragment"], "abc123");

        // Optional metadata may be absent on the wire.
        let sparse: IceCandidate =
            serde_json::from_str(r#"{"candidate":"candidate:2 1 UDP 1 10.0.0.1 9 typ host"}"#)
                .unwrap();
        assert_eq!(sparse.sdp_mid, None);
        assert_eq!(sparse.sdp_m_line_index, None);
    }
}
