use crate::media::MediaConfig;
use std::time::Duration;

/// Configuration for the call core.
#[derive(Clone, Debug)]
pub struct CallConfig {
    /// STUN/TURN server URLs handed to the media engine.
    pub ice_servers: Vec<String>,
    /// Candidate pool size hint for the media engine.
    pub ice_candidate_pool_size: u8,
    /// Interval between transport-quality samples.
    pub quality_interval: Duration,
    /// Attempts per candidate publication before dropping it.
    pub candidate_publish_attempts: u32,
    /// Backoff between candidate publication attempts.
    pub candidate_publish_backoff: Duration,
    /// How long an outgoing call may stay unanswered before it is ended.
    /// `None` leaves the call ringing until explicitly cancelled.
    pub ring_timeout: Option<Duration>,
}

impl CallConfig {
    /// The slice of this configuration the media engine consumes.
    pub fn media_config(&self) -> MediaConfig {
        MediaConfig {
            ice_servers: self.ice_servers.clone(),
            ice_candidate_pool_size: self.ice_candidate_pool_size,
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                "stun:stun1.l.google.com:19302".to_string(),
                "stun:stun2.l.google.com:19302".to_string(),
            ],
            ice_candidate_pool_size: 10,
            quality_interval: Duration::from_secs(2),
            candidate_publish_attempts: 3,
            candidate_publish_backoff: Duration::from_millis(100),
            ring_timeout: None,
        }
    }
}
