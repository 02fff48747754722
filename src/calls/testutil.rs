//! Test doubles: a scripted media engine and a fault-injecting store.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::media::{
    CandidatePairStats, IceCandidate, MediaConnection, MediaEngine, MediaError,
    SessionDescription, TrackKind, TransportEvent, TransportStats,
};
use crate::store::{
    CollectionPath, DocPath, Document, Fields, MemoryStore, Query, SignalStore, StoreError,
    Subscription,
};
use crate::types::call::MediaKind;

/// Media engine producing scripted [`FakeConnection`]s.
pub(crate) struct FakeEngine {
    connections: StdMutex<Vec<Arc<FakeConnection>>>,
    fail_acquisition: AtomicBool,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: StdMutex::new(Vec::new()),
            fail_acquisition: AtomicBool::new(false),
        })
    }

    pub fn fail_acquisition(&self, fail: bool) {
        self.fail_acquisition.store(fail, Ordering::SeqCst);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn last_connection(&self) -> Arc<FakeConnection> {
        self.connections
            .lock()
            .unwrap()
            .last()
            .expect("no connection opened")
            .clone()
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn connect(&self, kind: MediaKind) -> Result<Arc<dyn MediaConnection>, MediaError> {
        if self.fail_acquisition.load(Ordering::SeqCst) {
            return Err(MediaError::Acquisition("camera unavailable".to_string()));
        }
        let conn = FakeConnection::new(kind);
        self.connections.lock().unwrap().push(conn.clone());
        Ok(conn)
    }
}

/// A scripted media connection recording everything applied to it.
pub(crate) struct FakeConnection {
    kind: MediaKind,
    next_sdp: AtomicUsize,
    local: StdMutex<Vec<SessionDescription>>,
    remote: StdMutex<Vec<SessionDescription>>,
    candidates: StdMutex<Vec<IceCandidate>>,
    audio_enabled: AtomicBool,
    video_enabled: AtomicBool,
    closed: AtomicBool,
    close_count: AtomicUsize,
    rtt: StdMutex<Option<Duration>>,
    stats_fail: AtomicBool,
    stats_after_close: AtomicUsize,
    candidate_tx: StdMutex<Option<mpsc::UnboundedSender<IceCandidate>>>,
    candidate_rx: Mutex<Option<mpsc::UnboundedReceiver<IceCandidate>>>,
    event_tx: StdMutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl FakeConnection {
    pub fn new(kind: MediaKind) -> Arc<Self> {
        let (candidate_tx, candidate_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            kind,
            next_sdp: AtomicUsize::new(0),
            local: StdMutex::new(Vec::new()),
            remote: StdMutex::new(Vec::new()),
            candidates: StdMutex::new(Vec::new()),
            audio_enabled: AtomicBool::new(true),
            video_enabled: AtomicBool::new(kind.is_video()),
            closed: AtomicBool::new(false),
            close_count: AtomicUsize::new(0),
            rtt: StdMutex::new(None),
            stats_fail: AtomicBool::new(false),
            stats_after_close: AtomicUsize::new(0),
            candidate_tx: StdMutex::new(Some(candidate_tx)),
            candidate_rx: Mutex::new(Some(candidate_rx)),
            event_tx: StdMutex::new(Some(event_tx)),
            event_rx: Mutex::new(Some(event_rx)),
        })
    }

    /// Script a locally discovered candidate.
    pub fn push_local_candidate(&self, candidate: IceCandidate) {
        if let Some(tx) = self.candidate_tx.lock().unwrap().as_ref() {
            let _ = tx.send(candidate);
        }
    }

    /// Script a transport notification.
    pub fn emit_transport(&self, event: TransportEvent) {
        if let Some(tx) = self.event_tx.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Script the RTT of the succeeded pair; `None` leaves only an
    /// unsucceeded pair in the report.
    pub fn set_rtt_millis(&self, millis: Option<u64>) {
        *self.rtt.lock().unwrap() = millis.map(Duration::from_millis);
    }

    pub fn fail_stats(&self, fail: bool) {
        self.stats_fail.store(fail, Ordering::SeqCst);
    }

    pub fn local_descriptions(&self) -> Vec<SessionDescription> {
        self.local.lock().unwrap().clone()
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.remote.lock().unwrap().clone()
    }

    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stats samples attempted after the connection closed. Must stay zero.
    pub fn stats_calls_after_close(&self) -> usize {
        self.stats_after_close.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaConnection for FakeConnection {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        let n = self.next_sdp.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::offer(format!("fake-offer-{n}")))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        let n = self.next_sdp.fetch_add(1, Ordering::SeqCst);
        Ok(SessionDescription::answer(format!("fake-answer-{n}")))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        self.local.lock().unwrap().push(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        if self.is_closed() {
            return Err(MediaError::Closed);
        }
        self.remote.lock().unwrap().push(desc);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        if self.is_closed() {
            return Err(MediaError::Closed);
        }
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
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
                if !self.kind.is_video() {
                    return false;
                }
                self.video_enabled.store(enabled, Ordering::SeqCst);
                enabled
            }
        }
    }

    async fn stats(&self) -> Result<TransportStats, MediaError> {
        if self.is_closed() {
            self.stats_after_close.fetch_add(1, Ordering::SeqCst);
            return Err(MediaError::Closed);
        }
        if self.stats_fail.load(Ordering::SeqCst) {
            return Err(MediaError::Transport("stats unavailable".to_string()));
        }
        let pairs = match *self.rtt.lock().unwrap() {
            Some(rtt) => vec![
                CandidatePairStats {
                    succeeded: false,
                    round_trip_time: Some(Duration::from_millis(1)),
                },
                CandidatePairStats {
                    succeeded: true,
                    round_trip_time: Some(rtt),
                },
            ],
            None => vec![CandidatePairStats {
                succeeded: false,
                round_trip_time: Some(Duration::from_millis(1)),
            }],
        };
        Ok(TransportStats { pairs })
    }

    async fn close(&self) -> Result<(), MediaError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_count.fetch_add(1, Ordering::SeqCst);
            // End the scripted streams so consumer tasks finish.
            *self.candidate_tx.lock().unwrap() = None;
            *self.event_tx.lock().unwrap() = None;
        }
        Ok(())
    }
}

/// [`SignalStore`] wrapper injecting faults into document creation and
/// counting writes.
#[derive(Clone)]
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    fail_creates: Arc<AtomicUsize>,
    deny_creates: Arc<AtomicBool>,
    creates: Arc<AtomicUsize>,
    upserts: Arc<AtomicUsize>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_creates: Arc::new(AtomicUsize::new(0)),
            deny_creates: Arc::new(AtomicBool::new(false)),
            creates: Arc::new(AtomicUsize::new(0)),
            upserts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the next `n` `create` calls with `Unavailable`.
    pub fn fail_next_creates(&self, n: usize) {
        self.fail_creates.store(n, Ordering::SeqCst);
    }

    /// Reject every `create` with `PermissionDenied`.
    pub fn deny_creates(&self, deny: bool) {
        self.deny_creates.store(deny, Ordering::SeqCst);
    }

    /// Total writes (creates + upserts) that reached the store.
    pub fn write_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst) + self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalStore for FlakyStore {
    async fn create(
        &self,
        collection: &CollectionPath,
        fields: Fields,
    ) -> Result<DocPath, StoreError> {
        if self.deny_creates.load(Ordering::SeqCst) {
            return Err(StoreError::PermissionDenied(collection.to_string()));
        }
        let remaining = self.fail_creates.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_creates.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected fault".to_string()));
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create(collection, fields).await
    }

    async fn upsert(&self, doc: &DocPath, fields: Fields) -> Result<(), StoreError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(doc, fields).await
    }

    async fn get(&self, doc: &DocPath) -> Result<Option<Document>, StoreError> {
        self.inner.get(doc).await
    }

    async fn subscribe_doc(&self, doc: &DocPath) -> Result<Subscription, StoreError> {
        self.inner.subscribe_doc(doc).await
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError> {
        self.inner.subscribe(query).await
    }
}
