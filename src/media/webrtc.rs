//! Production media engine over the `webrtc` crate.
//!
//! The adapter owns one `RTCPeerConnection` per call, attaches local
//! outbound tracks for the requested media kind, and bridges the crate's
//! callback style to the channel-based [`MediaConnection`] contract the
//! call core consumes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::{Mutex, mpsc};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine as RtcMediaEngine};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

use crate::media::engine::{
    CandidatePairStats, IceCandidate, MediaConfig, MediaConnection, MediaEngine, MediaError,
    SdpKind, SessionDescription, TrackKind, TransportEvent, TransportStats,
};
use crate::types::call::MediaKind;

/// [`MediaEngine`] backed by the `webrtc` crate.
pub struct WebRtcEngine {
    config: MediaConfig,
}

impl WebRtcEngine {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    async fn connect(&self, kind: MediaKind) -> Result<Arc<dyn MediaConnection>, MediaError> {
        let conn = WebRtcConnection::open(&self.config, kind).await?;
        Ok(Arc::new(conn) as Arc<dyn MediaConnection>)
    }
}

/// One live `RTCPeerConnection` with its local tracks attached.
pub struct WebRtcConnection {
    pc: Arc<RTCPeerConnection>,
    has_video: bool,
    audio_enabled: AtomicBool,
    video_enabled: AtomicBool,
    closed: AtomicBool,
    /// Candidate stream handed to the gatherer (taken once).
    candidate_rx: Mutex<Option<mpsc::UnboundedReceiver<IceCandidate>>>,
    /// Transport event stream handed to the controller (taken once).
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl WebRtcConnection {
    async fn open(config: &MediaConfig, kind: MediaKind) -> Result<Self, MediaError> {
        let api = create_api()?;

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }],
            ice_candidate_pool_size: config.ice_candidate_pool_size,
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| MediaError::Transport(e.to_string()))?,
        );

        // Attach local outbound tracks. Capture feeds samples into these
        // from outside the call core; failing to attach them is the
        // media-acquisition fault of this engine.
        let audio_track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            "peerline".to_owned(),
        ));
        pc.add_track(Arc::clone(&audio_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| MediaError::Acquisition(e.to_string()))?;

        if kind.is_video() {
            let video_track = Arc::new(TrackLocalStaticRTP::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    ..Default::default()
                },
                "video".to_owned(),
                "peerline".to_owned(),
            ));
            pc.add_track(Arc::clone(&video_track) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| MediaError::Acquisition(e.to_string()))?;
        }

        let (candidate_tx, candidate_rx) = mpsc::unbounded_channel();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let tx = candidate_tx.clone();
            Box::pin(async move {
                if let Some(c) = candidate {
                    match c.to_json() {
                        Ok(init) => {
                            let _ = tx.send(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_m_line_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            });
                        }
                        Err(e) => warn!("Failed to serialize local candidate: {}", e),
                    }
                }
            })
        }));

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let announced_connected = Arc::new(AtomicBool::new(false));
        let state_tx = event_tx.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let tx = state_tx.clone();
            let announced = announced_connected.clone();
            Box::pin(async move {
                debug!("ICE connection state: {:?}", state);
                let event = match state {
                    RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                        if announced.swap(true, Ordering::SeqCst) {
                            return;
                        }
                        TransportEvent::Connected
                    }
                    RTCIceConnectionState::Disconnected => TransportEvent::Disconnected,
                    RTCIceConnectionState::Failed => TransportEvent::Failed,
                    RTCIceConnectionState::Closed => TransportEvent::Closed,
                    _ => return,
                };
                let _ = tx.send(event);
            })
        }));

        let track_tx = event_tx.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = track_tx.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    _ => return,
                };
                let _ = tx.send(TransportEvent::RemoteTrack(kind));
            })
        }));

        Ok(Self {
            pc,
            has_video: kind.is_video(),
            audio_enabled: AtomicBool::new(true),
            video_enabled: AtomicBool::new(kind.is_video()),
            closed: AtomicBool::new(false),
            candidate_rx: Mutex::new(Some(candidate_rx)),
            event_rx: Mutex::new(Some(event_rx)),
        })
    }

    /// Whether the local outbound track of `kind` is currently enabled.
    /// Consulted by whatever feeds captured samples into the tracks.
    pub fn outbound_enabled(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Audio => self.audio_enabled.load(Ordering::SeqCst),
            TrackKind::Video => self.has_video && self.video_enabled.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl MediaConnection for WebRtcConnection {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| MediaError::Negotiation(e.to_string()))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| MediaError::Negotiation(e.to_string()))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        let desc = to_rtc_description(desc)?;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(|e| MediaError::Negotiation(e.to_string()))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        let desc = to_rtc_description(desc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| MediaError::Negotiation(e.to_string()))
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(|e| MediaError::Negotiation(e.to_string()))
    }

    async fn take_local_candidates(&self) -> Option<mpsc::UnboundedReceiver<IceCandidate>> {
        self.candidate_rx.lock().await.take()
    }

    async fn take_transport_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.event_rx.lock().await.take()
    }

    fn set_outbound_enabled(&self, kind: TrackKind, enabled: bool) -> bool {
        match kind {
            TrackKind::Audio => {
                self.audio_enabled.store(enabled, Ordering::SeqCst);
                enabled
            }
            TrackKind::Video => {
                if !self.has_video {
                    return false;
                }
                self.video_enabled.store(enabled, Ordering::SeqCst);
                enabled
            }
        }
    }

    async fn stats(&self) -> Result<TransportStats, MediaError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MediaError::Closed);
        }
        let report = self.pc.get_stats().await;
        let mut pairs = Vec::new();
        for stat in report.reports.values() {
            if let StatsReportType::CandidatePair(pair) = stat {
                pairs.push(CandidatePairStats {
                    succeeded: pair.nominated,
                    round_trip_time: (pair.current_round_trip_time > 0.0)
                        .then(|| Duration::from_secs_f64(pair.current_round_trip_time)),
                });
            }
        }
        Ok(TransportStats { pairs })
    }

    async fn close(&self) -> Result<(), MediaError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.pc
            .close()
            .await
            .map_err(|e| MediaError::Transport(e.to_string()))
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, MediaError> {
    let result = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    result.map_err(|e| MediaError::Negotiation(e.to_string()))
}

fn create_api() -> Result<webrtc::api::API, MediaError> {
    let mut media_engine = RtcMediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| MediaError::Transport(e.to_string()))?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(|e| MediaError::Transport(e.to_string()))?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}
