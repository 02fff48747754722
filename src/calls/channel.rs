//! Typed signaling channel over the document store.
//!
//! Wraps the raw [`SignalStore`] into the call wire protocol: the
//! `calls/{id}` document, the two candidate sub-collections, and the
//! incoming-call query. Watches decode documents into typed records and
//! resubscribe automatically if the underlying subscription is lost.

use crate::calls::record::{CallRecord, CandidateRecord, to_fields};
use crate::media::SessionDescription;
use crate::store::{
    ChangeEvent, ChangeKind, CollectionPath, DocPath, Query, Result, SignalStore, Subscription,
};
use crate::types::call::{CallId, CallStatus, CandidateSide, MediaKind};
use log::warn;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const RESUBSCRIBE_ATTEMPTS: u32 = 3;
const RESUBSCRIBE_BACKOFF: Duration = Duration::from_millis(200);

/// The typed pub/sub primitive for call documents and candidate
/// sub-collections.
pub struct SignalChannel {
    store: Arc<dyn SignalStore>,
    calls: CollectionPath,
}

impl SignalChannel {
    pub fn new(store: Arc<dyn SignalStore>) -> Self {
        Self {
            store,
            calls: CollectionPath::root("calls"),
        }
    }

    fn call_doc(&self, id: &CallId) -> DocPath {
        self.calls.doc(id.as_str())
    }

    fn candidates(&self, id: &CallId, side: CandidateSide) -> CollectionPath {
        self.call_doc(id).subcollection(side.collection_name())
    }

    /// Create the call document with status `offering`. The store assigns
    /// the call id.
    pub async fn create_call(
        &self,
        caller_id: &str,
        caller_name: &str,
        callee_id: &str,
        media_kind: MediaKind,
    ) -> Result<CallRecord> {
        let mut record = CallRecord::new_offering(caller_id, caller_name, callee_id, media_kind);
        let path = self.store.create(&self.calls, to_fields(&record)?).await?;
        record.id = CallId::new(&path.id);
        Ok(record)
    }

    pub async fn get_call(&self, id: &CallId) -> Result<Option<CallRecord>> {
        match self.store.get(&self.call_doc(id)).await? {
            Some(doc) => Ok(Some(CallRecord::from_document(&doc)?)),
            None => Ok(None),
        }
    }

    /// Store the caller's offer. Written once, while status is `offering`.
    pub async fn set_offer(&self, id: &CallId, offer: &SessionDescription) -> Result<()> {
        let fields = to_fields(&json!({ "offer": offer }))?;
        self.store.upsert(&self.call_doc(id), fields).await
    }

    /// Store the callee's answer and flip status to `answered` in a single
    /// merge, so no observer can see one without the other.
    pub async fn set_answer(&self, id: &CallId, answer: &SessionDescription) -> Result<()> {
        let fields = to_fields(&json!({
            "answer": answer,
            "status": CallStatus::Answered,
        }))?;
        self.store.upsert(&self.call_doc(id), fields).await
    }

    pub async fn set_status(&self, id: &CallId, status: CallStatus) -> Result<()> {
        let fields = to_fields(&json!({ "status": status }))?;
        self.store.upsert(&self.call_doc(id), fields).await
    }

    /// Append one local candidate to the given side's collection.
    pub async fn publish_candidate(
        &self,
        id: &CallId,
        side: CandidateSide,
        candidate: &CandidateRecord,
    ) -> Result<()> {
        self.store
            .create(&self.candidates(id, side), to_fields(candidate)?)
            .await?;
        Ok(())
    }

    /// Watch the call document: current snapshot, then every change.
    pub async fn watch_call(&self, id: &CallId) -> Result<CallWatch> {
        let watch = Watch::open(self.store.clone(), WatchTarget::Doc(self.call_doc(id))).await?;
        Ok(CallWatch { watch })
    }

    /// Watch one candidate collection from the beginning.
    pub async fn watch_candidates(
        &self,
        id: &CallId,
        side: CandidateSide,
    ) -> Result<CandidateWatch> {
        let query = Query::collection(self.candidates(id, side));
        let watch = Watch::open(self.store.clone(), WatchTarget::Query(query)).await?;
        Ok(CandidateWatch { watch })
    }

    /// Watch for calls offered to `callee_id`.
    pub async fn watch_incoming(&self, callee_id: &str) -> Result<IncomingWatch> {
        let query = Query::collection(self.calls.clone())
            .filter("calleeId", callee_id)
            .filter("status", CallStatus::Offering.as_str());
        let watch = Watch::open(self.store.clone(), WatchTarget::Query(query)).await?;
        Ok(IncomingWatch { watch })
    }
}

enum WatchTarget {
    Doc(DocPath),
    Query(Query),
}

/// A subscription that re-opens itself (with bounded backoff) when the
/// store drops it. Replayed events after a resubscribe are deduplicated by
/// the consumers (stale-status guard, candidate dedup set).
struct Watch {
    store: Arc<dyn SignalStore>,
    target: WatchTarget,
    sub: Subscription,
}

impl Watch {
    async fn open(store: Arc<dyn SignalStore>, target: WatchTarget) -> Result<Self> {
        let sub = Self::subscribe(&store, &target).await?;
        Ok(Self { store, target, sub })
    }

    async fn subscribe(store: &Arc<dyn SignalStore>, target: &WatchTarget) -> Result<Subscription> {
        match target {
            WatchTarget::Doc(path) => store.subscribe_doc(path).await,
            WatchTarget::Query(query) => store.subscribe(query.clone()).await,
        }
    }

    /// Next event, or `None` once the subscription is permanently lost.
    async fn next_event(&mut self) -> Option<ChangeEvent> {
        loop {
            if let Some(event) = self.sub.next().await {
                return Some(event);
            }
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                match Self::subscribe(&self.store, &self.target).await {
                    Ok(sub) => {
                        self.sub = sub;
                        break;
                    }
                    Err(e) if e.is_transient() && attempt < RESUBSCRIBE_ATTEMPTS => {
                        tokio::time::sleep(RESUBSCRIBE_BACKOFF * attempt).await;
                    }
                    Err(e) => {
                        warn!("Subscription lost and could not be restored: {}", e);
                        return None;
                    }
                }
            }
        }
    }
}

/// Typed watch over the call document.
pub struct CallWatch {
    watch: Watch,
}

impl CallWatch {
    /// Next record snapshot. Undecodable documents are skipped with a
    /// warning rather than ending the watch.
    pub async fn next(&mut self) -> Option<CallRecord> {
        loop {
            let event = self.watch.next_event().await?;
            match CallRecord::from_document(&event.doc) {
                Ok(record) => return Some(record),
                Err(e) => warn!("Skipping malformed call record {}: {}", event.doc.path, e),
            }
        }
    }
}

/// Typed watch over one candidate collection. Candidate records are
/// append-only, so only `Added` events are meaningful.
pub struct CandidateWatch {
    watch: Watch,
}

impl CandidateWatch {
    pub async fn next(&mut self) -> Option<CandidateRecord> {
        loop {
            let event = self.watch.next_event().await?;
            if event.kind != ChangeKind::Added {
                continue;
            }
            match event.doc.decode::<CandidateRecord>() {
                Ok(candidate) => return Some(candidate),
                Err(e) => warn!("Skipping malformed candidate {}: {}", event.doc.path, e),
            }
        }
    }
}

/// Typed watch over the incoming-call query. Yields the change kind so the
/// consumer can also prune offers that were withdrawn.
pub struct IncomingWatch {
    watch: Watch,
}

impl IncomingWatch {
    pub async fn next(&mut self) -> Option<(ChangeKind, CallRecord)> {
        loop {
            let event = self.watch.next_event().await?;
            match CallRecord::from_document(&event.doc) {
                Ok(record) => return Some((event.kind, record)),
                Err(e) => warn!("Skipping malformed call record {}: {}", event.doc.path, e),
            }
        }
    }
}
