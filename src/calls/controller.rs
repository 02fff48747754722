//! Top-level call façade.
//!
//! The controller owns at most one active [`Session`] at a time, accepts
//! the five user intents (start, answer, reject, end, toggle mic/camera),
//! and supervises the per-call tasks: candidate gathering, record and
//! candidate watches, transport events, and quality monitoring. Ending a
//! call — locally, by the peer, or through a fault — funnels into one
//! idempotent teardown that always releases the media connection exactly
//! once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;

use crate::calls::channel::SignalChannel;
use crate::calls::error::CallError;
use crate::calls::gatherer::IceGatherer;
use crate::calls::negotiation::{NegotiationEngine, RecordOutcome};
use crate::calls::quality::QualityMonitor;
use crate::calls::record::CallRecord;
use crate::calls::session::Session;
use crate::calls::state::{CallPhase, InvalidTransition};
use crate::config::CallConfig;
use crate::media::{MediaEngine, TrackKind, TransportEvent};
use crate::store::{ChangeKind, SignalStore};
use crate::types::call::{CallId, CallRole, CallStatus, MediaKind};
use crate::types::events::{CallEvent, EventBus};

/// The local participant, as written into call records.
#[derive(Debug, Clone)]
pub struct LocalUser {
    pub id: String,
    pub display_name: String,
}

impl LocalUser {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Why a session is being torn down.
#[derive(Debug, Clone)]
enum TeardownOutcome {
    /// This side hung up (or cancelled an unanswered call).
    LocalEnded,
    /// The peer drove the record to a terminal status.
    Remote(CallStatus),
    /// A fault ended the call; `String` is the user-facing message.
    Fault(String),
}

/// Everything one active call owns besides the session itself.
struct CallRuntime {
    session: Arc<Session>,
    channel: Arc<SignalChannel>,
    events: Arc<EventBus>,
    /// Quality monitor handle; joined before the connection is closed.
    monitor: Mutex<Option<JoinHandle<()>>>,
    /// Cooperative per-call tasks (watches, gatherer, ring timer).
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    /// The controller's single-call slot, cleared on teardown.
    slot: Weak<StdMutex<Option<Arc<CallRuntime>>>>,
    done_tx: watch::Sender<bool>,
}

impl CallRuntime {
    fn new(
        session: Arc<Session>,
        channel: Arc<SignalChannel>,
        events: Arc<EventBus>,
        slot: Weak<StdMutex<Option<Arc<CallRuntime>>>>,
    ) -> Arc<Self> {
        let (done_tx, _) = watch::channel(false);
        Arc::new(Self {
            session,
            channel,
            events,
            monitor: Mutex::new(None),
            tasks: StdMutex::new(Vec::new()),
            slot,
            done_tx,
        })
    }

    /// Release the session exactly once. Late callers wait until the first
    /// teardown has finished, then return.
    async fn teardown(&self, outcome: TeardownOutcome) {
        if !self.session.begin_teardown() {
            let mut done = self.done_tx.subscribe();
            while !*done.borrow() {
                if done.changed().await.is_err() {
                    break;
                }
            }
            return;
        }

        let id = self.session.record.id.clone();
        debug!("Call {}: tearing down ({:?})", id, outcome);

        // The quality timer must be stopped before the connection closes.
        self.session.signal_shutdown();
        if let Some(handle) = self.monitor.lock().await.take() {
            let _ = handle.await;
        }

        if let Err(e) = self.session.conn.close().await {
            warn!("Call {}: connection close failed: {}", id, e);
        }

        let terminal = match &outcome {
            TeardownOutcome::Remote(status) => *status,
            _ => CallStatus::Ended,
        };
        let _ = self.session.transition_to(terminal).await;

        // Only locally initiated teardown writes the terminal status; a
        // peer-initiated one was already written by the peer. Terminal
        // states are append-only, so a record the peer finished first is
        // left untouched.
        if matches!(
            outcome,
            TeardownOutcome::LocalEnded | TeardownOutcome::Fault(_)
        ) {
            let already_terminal = matches!(
                self.channel.get_call(&id).await,
                Ok(Some(record)) if record.status.is_terminal()
            );
            if !already_terminal
                && let Err(e) = self.channel.set_status(&id, CallStatus::Ended).await
            {
                warn!("Call {}: failed to store terminal status: {}", id, e);
            }
        }

        if let TeardownOutcome::Fault(message) = &outcome {
            self.events.dispatch(CallEvent::CallFaulted {
                call_id: id.clone(),
                message: message.clone(),
            });
        }
        self.events.dispatch(CallEvent::StatusChanged {
            call_id: id.clone(),
            status: terminal,
        });

        if let Some(slot) = self.slot.upgrade() {
            let mut guard = slot.lock().unwrap();
            if guard.as_ref().is_some_and(|r| r.session.record.id == id) {
                *guard = None;
            }
        }

        // Stragglers exit on the shutdown signal; aborting is a backstop.
        for handle in self.tasks.lock().unwrap().drain(..) {
            handle.abort();
        }

        let _ = self.done_tx.send(true);
        info!("Call {}: session released", id);
    }
}

/// User-facing façade for one participant's calls.
pub struct CallController {
    user: LocalUser,
    config: CallConfig,
    channel: Arc<SignalChannel>,
    engine: Arc<dyn MediaEngine>,
    events: Arc<EventBus>,
    active: Arc<StdMutex<Option<Arc<CallRuntime>>>>,
    /// Incoming offers observed by the watcher, by call id.
    ringing: StdMutex<HashMap<String, CallRecord>>,
}

impl CallController {
    pub fn new(
        user: LocalUser,
        config: CallConfig,
        store: Arc<dyn SignalStore>,
        engine: Arc<dyn MediaEngine>,
    ) -> Arc<Self> {
        Arc::new(Self {
            user,
            config,
            channel: Arc::new(SignalChannel::new(store)),
            engine,
            events: Arc::new(EventBus::new()),
            active: Arc::new(StdMutex::new(None)),
            ringing: StdMutex::new(HashMap::new()),
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// The record of the active call, if any.
    pub fn current_call(&self) -> Option<CallRecord> {
        self.active
            .lock()
            .unwrap()
            .as_ref()
            .map(|rt| rt.session.record.clone())
    }

    pub async fn current_phase(&self) -> Option<CallPhase> {
        let runtime = self.active.lock().unwrap().clone()?;
        Some(runtime.session.phase().await)
    }

    /// Watch the store for calls offered to this user, registering them
    /// and emitting [`CallEvent::IncomingCall`].
    pub fn spawn_incoming_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            let mut delay = 1u64;
            let mut watch = loop {
                match controller.channel.watch_incoming(&controller.user.id).await {
                    Ok(watch) => break watch,
                    Err(e) => {
                        warn!("Incoming-call watch failed, retrying: {}", e);
                        tokio::time::sleep(Duration::from_secs(delay)).await;
                        delay = (delay * 2).min(30);
                    }
                }
            };

            while let Some((kind, record)) = watch.next().await {
                match kind {
                    ChangeKind::Added => {
                        if record.caller_id == controller.user.id {
                            continue;
                        }
                        let fresh = controller
                            .ringing
                            .lock()
                            .unwrap()
                            .insert(record.id.as_str().to_string(), record.clone())
                            .is_none();
                        if fresh {
                            info!(
                                "Incoming {:?} call {} from {}",
                                record.media_kind, record.id, record.caller_name
                            );
                            controller.events.dispatch(CallEvent::IncomingCall(record));
                        }
                    }
                    ChangeKind::Removed => {
                        controller
                            .ringing
                            .lock()
                            .unwrap()
                            .remove(record.id.as_str());
                    }
                    ChangeKind::Modified => {}
                }
            }
            debug!("Incoming-call watch ended");
        })
    }

    /// Start an outgoing call: acquire media, create the record, store the
    /// offer, and begin trickling candidates.
    pub async fn start_call(&self, callee_id: &str, kind: MediaKind) -> Result<CallId, CallError> {
        if self.active.lock().unwrap().is_some() {
            return Err(CallError::CallInProgress);
        }

        // Media acquisition comes first: a denied camera or microphone
        // must fail the call before any record exists.
        let conn = self.engine.connect(kind).await?;

        let record = match self
            .channel
            .create_call(&self.user.id, &self.user.display_name, callee_id, kind)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                let _ = conn.close().await;
                return Err(e.into());
            }
        };
        let call_id = record.id.clone();
        info!("Call {}: offering {:?} call to {}", call_id, kind, callee_id);

        let session = Session::new(record, CallRole::Caller, conn);
        let runtime = match self.install(session.clone()) {
            Ok(runtime) => runtime,
            Err(e) => {
                let _ = session.conn.close().await;
                return Err(e);
            }
        };
        self.events.dispatch(CallEvent::LocalMediaReady {
            call_id: call_id.clone(),
        });

        let negotiation = Arc::new(NegotiationEngine::new(
            self.channel.clone(),
            session.clone(),
            self.events.clone(),
        ));
        if let Err(e) = negotiation.send_offer().await {
            runtime
                .teardown(TeardownOutcome::Fault(format!("offer failed: {e}")))
                .await;
            return Err(e);
        }

        if let Err(e) = self.spawn_call_tasks(&runtime, negotiation).await {
            runtime
                .teardown(TeardownOutcome::Fault(format!("signaling failed: {e}")))
                .await;
            return Err(e);
        }
        Ok(call_id)
    }

    /// Answer a registered incoming call.
    pub async fn answer_call(&self, call_id: &CallId) -> Result<(), CallError> {
        if self.active.lock().unwrap().is_some() {
            return Err(CallError::CallInProgress);
        }

        let record = self.take_ringing(call_id).await?;
        if record.status != CallStatus::Offering {
            return Err(CallError::InvalidTransition(InvalidTransition {
                current_state: record.status.to_string(),
                attempted: "Answer".to_string(),
            }));
        }

        let conn = self.engine.connect(record.media_kind).await?;
        info!("Call {}: answering {:?} call", call_id, record.media_kind);

        let session = Session::new(record, CallRole::Callee, conn);
        let runtime = match self.install(session.clone()) {
            Ok(runtime) => runtime,
            Err(e) => {
                let _ = session.conn.close().await;
                return Err(e);
            }
        };
        self.events.dispatch(CallEvent::LocalMediaReady {
            call_id: call_id.clone(),
        });

        let negotiation = Arc::new(NegotiationEngine::new(
            self.channel.clone(),
            session.clone(),
            self.events.clone(),
        ));
        if let Err(e) = negotiation.send_answer().await {
            runtime
                .teardown(TeardownOutcome::Fault(format!("answer failed: {e}")))
                .await;
            return Err(e);
        }

        if let Err(e) = self.spawn_call_tasks(&runtime, negotiation).await {
            runtime
                .teardown(TeardownOutcome::Fault(format!("signaling failed: {e}")))
                .await;
            return Err(e);
        }
        Ok(())
    }

    /// Decline an incoming call without ever producing an answer. No media
    /// is acquired and no session is created.
    pub async fn reject_call(&self, call_id: &CallId) -> Result<(), CallError> {
        let record = self.take_ringing(call_id).await?;
        if record.status != CallStatus::Offering {
            return Err(CallError::InvalidTransition(InvalidTransition {
                current_state: record.status.to_string(),
                attempted: "Reject".to_string(),
            }));
        }

        self.channel
            .set_status(&record.id, CallStatus::Rejected)
            .await?;
        info!("Call {}: rejected", call_id);
        self.events.dispatch(CallEvent::StatusChanged {
            call_id: call_id.clone(),
            status: CallStatus::Rejected,
        });
        Ok(())
    }

    /// Hang up the active call. A second invocation — or ending when no
    /// call is active — is a no-op.
    pub async fn end_call(&self) -> Result<(), CallError> {
        let runtime = self.active.lock().unwrap().clone();
        if let Some(runtime) = runtime {
            runtime.teardown(TeardownOutcome::LocalEnded).await;
        }
        Ok(())
    }

    /// Flip the microphone. Purely local; returns the new state.
    pub fn toggle_mic(&self) -> Result<bool, CallError> {
        let runtime = self
            .active
            .lock()
            .unwrap()
            .clone()
            .ok_or(CallError::NoActiveCall)?;
        Ok(runtime.session.toggle_track(TrackKind::Audio))
    }

    /// Flip the camera. Purely local; returns the new state (`false` for
    /// audio-only calls).
    pub fn toggle_camera(&self) -> Result<bool, CallError> {
        let runtime = self
            .active
            .lock()
            .unwrap()
            .clone()
            .ok_or(CallError::NoActiveCall)?;
        Ok(runtime.session.toggle_track(TrackKind::Video))
    }

    /// Pull an offer from the ringing registry, falling back to the store
    /// for offers this process never saw ring.
    async fn take_ringing(&self, call_id: &CallId) -> Result<CallRecord, CallError> {
        let registered = self.ringing.lock().unwrap().remove(call_id.as_str());
        match registered {
            Some(record) => Ok(record),
            None => self
                .channel
                .get_call(call_id)
                .await?
                .filter(|record| record.callee_id == self.user.id)
                .ok_or_else(|| CallError::NotFound(call_id.to_string())),
        }
    }

    fn install(&self, session: Arc<Session>) -> Result<Arc<CallRuntime>, CallError> {
        let runtime = CallRuntime::new(
            session,
            self.channel.clone(),
            self.events.clone(),
            Arc::downgrade(&self.active),
        );
        let mut guard = self.active.lock().unwrap();
        if guard.is_some() {
            return Err(CallError::CallInProgress);
        }
        *guard = Some(runtime.clone());
        Ok(runtime)
    }

    /// Spawn the per-call tasks: candidate gathering and application,
    /// record observation, transport events, quality monitoring, and the
    /// optional ring timer.
    async fn spawn_call_tasks(
        &self,
        runtime: &Arc<CallRuntime>,
        negotiation: Arc<NegotiationEngine>,
    ) -> Result<(), CallError> {
        let session = runtime.session.clone();
        let call_id = session.record.id.clone();
        let mut handles = Vec::new();

        // Publish local candidates as they are discovered.
        if let Some(candidates) = session.conn.take_local_candidates().await {
            let gatherer = IceGatherer::new(
                self.channel.clone(),
                call_id.clone(),
                session.role.local_side(),
                &self.config,
            );
            let rt = runtime.clone();
            let mut shutdown = session.shutdown_rx();
            handles.push(tokio::spawn(async move {
                tokio::select! {
                    result = gatherer.run(candidates) => {
                        if let Err(e) = result {
                            rt.teardown(TeardownOutcome::Fault(format!(
                                "candidate publication rejected: {e}"
                            )))
                            .await;
                        }
                    }
                    _ = shutdown.changed() => {}
                }
            }));
        }

        // Observe the shared call record.
        let mut record_watch = self.channel.watch_call(&call_id).await?;
        {
            let rt = runtime.clone();
            let neg = negotiation.clone();
            let mut shutdown = session.shutdown_rx();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        record = record_watch.next() => {
                            let Some(record) = record else { break };
                            match neg.handle_record(record).await {
                                Ok(RecordOutcome::Continue) => {}
                                Ok(RecordOutcome::Terminal(status)) => {
                                    rt.teardown(TeardownOutcome::Remote(status)).await;
                                    break;
                                }
                                Err(e) => {
                                    rt.teardown(TeardownOutcome::Fault(format!(
                                        "negotiation failed: {e}"
                                    )))
                                    .await;
                                    break;
                                }
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        // Apply the peer's candidates, from the beginning of the
        // collection.
        let mut candidate_watch = self
            .channel
            .watch_candidates(&call_id, session.role.remote_side())
            .await?;
        {
            let neg = negotiation.clone();
            let mut shutdown = session.shutdown_rx();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        candidate = candidate_watch.next() => {
                            let Some(candidate) = candidate else { break };
                            neg.handle_candidate(candidate).await;
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        // Transport notifications from the media engine.
        if let Some(mut transport_rx) = session.conn.take_transport_events().await {
            let rt = runtime.clone();
            let neg = negotiation.clone();
            let bus = self.events.clone();
            let task_session = session.clone();
            let mut shutdown = session.shutdown_rx();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        event = transport_rx.recv() => {
                            let Some(event) = event else { break };
                            match event {
                                TransportEvent::Connected => {
                                    if let Err(e) = neg.transport_connected().await {
                                        warn!(
                                            "Call {}: failed to store connected status: {}",
                                            task_session.record.id, e
                                        );
                                    }
                                }
                                TransportEvent::RemoteTrack(kind) => {
                                    bus.dispatch(CallEvent::RemoteTrackAdded {
                                        call_id: task_session.record.id.clone(),
                                        kind,
                                    });
                                }
                                TransportEvent::Disconnected => {
                                    warn!(
                                        "Call {}: transport disconnected, waiting for recovery",
                                        task_session.record.id
                                    );
                                }
                                TransportEvent::Failed => {
                                    rt.teardown(TeardownOutcome::Fault(
                                        "transport failed".to_string(),
                                    ))
                                    .await;
                                    break;
                                }
                                TransportEvent::Closed => break,
                            }
                        }
                        _ = shutdown.changed() => break,
                    }
                }
            }));
        }

        // An unanswered outgoing call ends after the configured timeout.
        if session.role == CallRole::Caller
            && let Some(timeout) = self.config.ring_timeout
        {
            let rt = runtime.clone();
            let timer_session = session.clone();
            let mut shutdown = session.shutdown_rx();
            handles.push(tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        if timer_session.phase().await.status() == CallStatus::Offering {
                            info!(
                                "Call {}: unanswered after {:?}, hanging up",
                                timer_session.record.id, timeout
                            );
                            rt.teardown(TeardownOutcome::LocalEnded).await;
                        }
                    }
                    _ = shutdown.changed() => {}
                }
            }));
        }

        // Quality sampling; joined before the connection is closed.
        let monitor = QualityMonitor::new(
            session.clone(),
            self.events.clone(),
            self.config.quality_interval,
        );
        let monitor_handle = tokio::spawn(monitor.run(session.shutdown_rx()));
        *runtime.monitor.lock().await = Some(monitor_handle);

        runtime.tasks.lock().unwrap().extend(handles);
        Ok(())
    }
}
