//! Per-call session state.
//!
//! One [`Session`] binds a call record to one media connection and holds
//! everything the negotiation must guard: the phase machine, the typed
//! remote-description state, the candidate dedup set, and the teardown
//! gate. The session is owned by the controller for the lifetime of a
//! single call and released exactly once.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
use tokio::sync::{Mutex, watch};

use crate::calls::record::{CallRecord, CandidateRecord};
use crate::calls::state::{CallPhase, CallTransition, InvalidTransition};
use crate::media::{MediaConnection, MediaError, SessionDescription, TrackKind};
use crate::types::call::{CallRole, CallStatus, QualityLevel};

/// Whether the remote description has been applied yet. Candidates that
/// arrive early are buffered here and flushed, in arrival order, the moment
/// the description lands.
#[derive(Debug)]
pub enum RemoteDescription {
    Pending { buffered: Vec<CandidateRecord> },
    Applied,
}

struct SessionState {
    phase: CallPhase,
    remote: RemoteDescription,
    /// Candidate strings already buffered or applied. Store resubscribes
    /// replay collections from the beginning, so duplicates are expected.
    seen_candidates: HashSet<String>,
}

/// Process-local state of one active call.
pub struct Session {
    /// The call record as of session creation. Status evolves in `phase`,
    /// not here.
    pub record: CallRecord,
    pub role: CallRole,
    pub conn: Arc<dyn MediaConnection>,
    state: Mutex<SessionState>,
    quality: std::sync::Mutex<QualityLevel>,
    mic_enabled: AtomicBool,
    cam_enabled: AtomicBool,
    torn_down: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl Session {
    pub fn new(record: CallRecord, role: CallRole, conn: Arc<dyn MediaConnection>) -> Arc<Self> {
        let cam = record.media_kind.is_video();
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            record,
            role,
            conn,
            state: Mutex::new(SessionState {
                phase: CallPhase::offering(),
                remote: RemoteDescription::Pending {
                    buffered: Vec::new(),
                },
                seen_candidates: HashSet::new(),
            }),
            quality: std::sync::Mutex::new(QualityLevel::Unknown),
            mic_enabled: AtomicBool::new(true),
            cam_enabled: AtomicBool::new(cam),
            torn_down: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    pub async fn phase(&self) -> CallPhase {
        self.state.lock().await.phase.clone()
    }

    /// Apply a local transition, failing on illegal moves. Used for
    /// transitions this side initiates itself.
    pub async fn apply_transition(
        &self,
        transition: CallTransition,
    ) -> Result<CallPhase, InvalidTransition> {
        let mut state = self.state.lock().await;
        state.phase.apply_transition(transition)?;
        Ok(state.phase.clone())
    }

    /// Move toward an observed status, discarding stale or illegal
    /// observations silently. Returns the new phase when something moved.
    pub async fn transition_to(&self, status: CallStatus) -> Option<CallPhase> {
        let mut state = self.state.lock().await;
        if state.phase.status() == status || state.phase.is_terminal() {
            return None;
        }
        let transition = CallTransition::toward(status)?;
        match state.phase.apply_transition(transition) {
            Ok(()) => Some(state.phase.clone()),
            Err(e) => {
                debug!("Call {}: discarding stale observation: {}", self.record.id, e);
                None
            }
        }
    }

    /// Apply the remote description exactly once, then flush any buffered
    /// candidates. A second call is a no-op returning `false`, as is any
    /// call after the session became terminal or teardown began.
    pub async fn apply_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<bool, MediaError> {
        let mut state = self.state.lock().await;
        if self.is_torn_down() || state.phase.is_terminal() {
            return Ok(false);
        }
        if matches!(state.remote, RemoteDescription::Applied) {
            return Ok(false);
        }

        self.conn.set_remote_description(desc).await?;

        let buffered = match std::mem::replace(&mut state.remote, RemoteDescription::Applied) {
            RemoteDescription::Pending { buffered } => buffered,
            RemoteDescription::Applied => Vec::new(),
        };
        for candidate in buffered {
            if let Err(e) = self.conn.add_remote_candidate(candidate).await {
                warn!(
                    "Call {}: buffered candidate failed to apply: {}",
                    self.record.id, e
                );
            }
        }
        Ok(true)
    }

    /// Apply one remote candidate: buffered while the remote description is
    /// pending, applied directly afterwards. Duplicates and candidates for
    /// a finished call are dropped silently.
    pub async fn apply_remote_candidate(
        &self,
        candidate: CandidateRecord,
    ) -> Result<(), MediaError> {
        let mut state = self.state.lock().await;
        if self.is_torn_down() || state.phase.is_terminal() {
            debug!(
                "Call {}: dropping candidate for finished call",
                self.record.id
            );
            return Ok(());
        }
        if !state.seen_candidates.insert(candidate.candidate.clone()) {
            return Ok(());
        }
        match &mut state.remote {
            RemoteDescription::Pending { buffered } => {
                buffered.push(candidate);
                Ok(())
            }
            RemoteDescription::Applied => self.conn.add_remote_candidate(candidate).await,
        }
    }

    /// Flip the local outbound track of `kind`. Purely local; returns the
    /// effective state.
    pub fn toggle_track(&self, kind: TrackKind) -> bool {
        let flag = match kind {
            TrackKind::Audio => &self.mic_enabled,
            TrackKind::Video => &self.cam_enabled,
        };
        let wanted = !flag.load(Ordering::SeqCst);
        let effective = self.conn.set_outbound_enabled(kind, wanted);
        flag.store(effective, Ordering::SeqCst);
        effective
    }

    pub fn quality(&self) -> QualityLevel {
        *self.quality.lock().unwrap()
    }

    pub(crate) fn set_quality(&self, level: QualityLevel) {
        *self.quality.lock().unwrap() = level;
    }

    /// First caller wins the right (and duty) to tear the session down.
    pub(crate) fn begin_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::SeqCst)
    }

    /// Once true, results of in-flight negotiation steps must be discarded.
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Signal every per-call task to stop.
    pub(crate) fn signal_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub(crate) fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::testutil::FakeConnection;
    use crate::types::call::MediaKind;

    fn make_session(kind: MediaKind) -> (Arc<Session>, Arc<FakeConnection>) {
        let conn = FakeConnection::new(kind);
        let mut record = CallRecord::new_offering("alice", "Alice", "bob", kind);
        record.id = crate::types::call::CallId::new("TESTCALL");
        let session = Session::new(record, CallRole::Caller, conn.clone());
        (session, conn)
    }

    #[tokio::test]
    async fn test_remote_description_applied_exactly_once() {
        let (session, conn) = make_session(MediaKind::Audio);
        let answer = SessionDescription::answer("a");

        assert!(session.apply_remote_description(answer.clone()).await.unwrap());
        assert!(!session.apply_remote_description(answer.clone()).await.unwrap());
        assert_eq!(conn.remote_descriptions(), vec![answer]);
    }

    #[tokio::test]
    async fn test_early_candidates_buffer_and_flush_in_order() {
        let (session, conn) = make_session(MediaKind::Audio);

        for n in 0..3 {
            session
                .apply_remote_candidate(CandidateRecord::new(format!("candidate:{n}")))
                .await
                .unwrap();
        }
        // Nothing reaches the connection before the description.
        assert!(conn.applied_candidates().is_empty());

        session
            .apply_remote_description(SessionDescription::answer("a"))
            .await
            .unwrap();
        let applied: Vec<String> = conn
            .applied_candidates()
            .into_iter()
            .map(|c| c.candidate)
            .collect();
        assert_eq!(applied, vec!["candidate:0", "candidate:1", "candidate:2"]);
    }

    #[tokio::test]
    async fn test_duplicate_candidates_applied_once() {
        let (session, conn) = make_session(MediaKind::Audio);
        session
            .apply_remote_description(SessionDescription::answer("a"))
            .await
            .unwrap();

        let candidate = CandidateRecord::new("candidate:0");
        session.apply_remote_candidate(candidate.clone()).await.unwrap();
        session.apply_remote_candidate(candidate).await.unwrap();
        assert_eq!(conn.applied_candidates().len(), 1);
    }

    #[tokio::test]
    async fn test_candidates_dropped_after_terminal() {
        let (session, conn) = make_session(MediaKind::Audio);
        session.apply_transition(CallTransition::End).await.unwrap();

        session
            .apply_remote_candidate(CandidateRecord::new("candidate:0"))
            .await
            .unwrap();
        assert!(conn.applied_candidates().is_empty());

        // A late description is likewise a silent no-op.
        assert!(
            !session
                .apply_remote_description(SessionDescription::answer("a"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_stale_status_observations_are_discarded() {
        let (session, _conn) = make_session(MediaKind::Audio);

        assert!(session.transition_to(CallStatus::Answered).await.is_some());
        // Same status again: stale, no-op.
        assert!(session.transition_to(CallStatus::Answered).await.is_none());
        // Illegal jumps are discarded, not surfaced.
        assert!(session.transition_to(CallStatus::Offering).await.is_none());

        assert!(session.transition_to(CallStatus::Ended).await.is_some());
        // Terminal absorbs everything.
        assert!(session.transition_to(CallStatus::Connected).await.is_none());
        assert!(session.transition_to(CallStatus::Rejected).await.is_none());
    }

    #[tokio::test]
    async fn test_toggle_tracks() {
        let (session, _conn) = make_session(MediaKind::Video);

        // Mic starts on, camera starts on for video calls.
        assert!(!session.toggle_track(TrackKind::Audio));
        assert!(session.toggle_track(TrackKind::Audio));
        assert!(!session.toggle_track(TrackKind::Video));

        // Audio-only call has no camera to enable.
        let (audio_session, _) = make_session(MediaKind::Audio);
        assert!(!audio_session.toggle_track(TrackKind::Video));
        assert!(!audio_session.toggle_track(TrackKind::Video));
    }

    #[tokio::test]
    async fn test_begin_teardown_is_single_shot() {
        let (session, _conn) = make_session(MediaKind::Audio);
        assert!(session.begin_teardown());
        assert!(!session.begin_teardown());
        assert!(session.is_torn_down());
    }
}
