//! In-memory [`SignalStore`] for tests and single-process use.

use crate::store::error::Result;
use crate::store::traits::{
    ChangeEvent, ChangeKind, CollectionPath, DocPath, Document, Fields, Query, SignalStore,
    Subscription,
};
use async_trait::async_trait;
use rand::distr::{Alphanumeric, SampleString};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};

/// A process-local document store with real-time subscriptions.
///
/// Collections keep documents in creation order, so subscription replay and
/// live delivery match the append order the contract requires. Cloning the
/// store clones a handle to the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Vec<Document>>,
    watchers: Vec<Watcher>,
}

struct Watcher {
    target: WatchTarget,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

enum WatchTarget {
    Doc(DocPath),
    Query(Query),
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn generate_id() -> String {
        Alphanumeric.sample_string(&mut rand::rng(), 20)
    }
}

impl Inner {
    fn find(&self, doc: &DocPath) -> Option<&Document> {
        self.collections
            .get(doc.collection.as_str())
            .and_then(|docs| docs.iter().find(|d| d.path.id == doc.id))
    }

    /// Fan a change out to every watcher whose view it touches, pruning
    /// watchers whose subscription has been released.
    fn notify(&mut self, old_fields: Option<&Fields>, doc: &Document) {
        self.watchers.retain(|watcher| {
            let kind = match &watcher.target {
                WatchTarget::Doc(path) => {
                    if *path != doc.path {
                        return true;
                    }
                    match old_fields {
                        Some(_) => ChangeKind::Modified,
                        None => ChangeKind::Added,
                    }
                }
                WatchTarget::Query(query) => {
                    let before = old_fields
                        .map(|fields| query.matches(&doc.path.collection, fields))
                        .unwrap_or(false);
                    let after = query.matches(&doc.path.collection, &doc.fields);
                    match (before, after) {
                        (false, true) => ChangeKind::Added,
                        (true, true) => ChangeKind::Modified,
                        (true, false) => ChangeKind::Removed,
                        (false, false) => return true,
                    }
                }
            };
            watcher
                .tx
                .send(ChangeEvent {
                    kind,
                    doc: doc.clone(),
                })
                .is_ok()
        });
    }
}

#[async_trait]
impl SignalStore for MemoryStore {
    async fn create(&self, collection: &CollectionPath, fields: Fields) -> Result<DocPath> {
        let mut inner = self.inner.write().await;
        let path = collection.doc(Self::generate_id());
        let doc = Document {
            path: path.clone(),
            fields,
        };
        inner
            .collections
            .entry(collection.as_str().to_string())
            .or_default()
            .push(doc.clone());
        inner.notify(None, &doc);
        Ok(path)
    }

    async fn upsert(&self, doc: &DocPath, fields: Fields) -> Result<()> {
        let mut inner = self.inner.write().await;
        let docs = inner
            .collections
            .entry(doc.collection.as_str().to_string())
            .or_default();

        let (old_fields, merged) = match docs.iter_mut().find(|d| d.path.id == doc.id) {
            Some(existing) => {
                let old = existing.fields.clone();
                for (key, value) in fields {
                    existing.fields.insert(key, value);
                }
                (Some(old), existing.clone())
            }
            None => {
                let created = Document {
                    path: doc.clone(),
                    fields,
                };
                docs.push(created.clone());
                (None, created)
            }
        };
        inner.notify(old_fields.as_ref(), &merged);
        Ok(())
    }

    async fn get(&self, doc: &DocPath) -> Result<Option<Document>> {
        let inner = self.inner.read().await;
        Ok(inner.find(doc).cloned())
    }

    async fn subscribe_doc(&self, doc: &DocPath) -> Result<Subscription> {
        let mut inner = self.inner.write().await;
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(existing) = inner.find(doc) {
            let _ = tx.send(ChangeEvent {
                kind: ChangeKind::Added,
                doc: existing.clone(),
            });
        }
        inner.watchers.push(Watcher {
            target: WatchTarget::Doc(doc.clone()),
            tx,
        });
        Ok(Subscription::new(rx))
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription> {
        let mut inner = self.inner.write().await;
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(docs) = inner.collections.get(query.collection.as_str()) {
            for doc in docs {
                if query.matches(&doc.path.collection, &doc.fields) {
                    let _ = tx.send(ChangeEvent {
                        kind: ChangeKind::Added,
                        doc: doc.clone(),
                    });
                }
            }
        }
        inner.watchers.push(Watcher {
            target: WatchTarget::Query(query),
            tx,
        });
        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, serde_json::Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_preserves_order() {
        let store = MemoryStore::new();
        let coll = CollectionPath::root("items");

        let first = store
            .create(&coll, fields(&[("n", json!(1))]))
            .await
            .unwrap();
        let second = store
            .create(&coll, fields(&[("n", json!(2))]))
            .await
            .unwrap();
        assert_ne!(first.id, second.id);

        let mut sub = store.subscribe(Query::collection(coll)).await.unwrap();
        let a = sub.next().await.unwrap();
        let b = sub.next().await.unwrap();
        assert_eq!(a.doc.fields["n"], json!(1));
        assert_eq!(b.doc.fields["n"], json!(2));
        assert_eq!(a.kind, ChangeKind::Added);
    }

    #[tokio::test]
    async fn test_upsert_merges_fields() {
        let store = MemoryStore::new();
        let doc = CollectionPath::root("calls").doc("c1");

        store
            .upsert(&doc, fields(&[("status", json!("offering")), ("x", json!(1))]))
            .await
            .unwrap();
        store
            .upsert(&doc, fields(&[("status", json!("answered"))]))
            .await
            .unwrap();

        let current = store.get(&doc).await.unwrap().unwrap();
        assert_eq!(current.fields["status"], json!("answered"));
        // Untouched keys survive the merge.
        assert_eq!(current.fields["x"], json!(1));
    }

    #[tokio::test]
    async fn test_doc_subscription_snapshot_then_changes() {
        let store = MemoryStore::new();
        let doc = CollectionPath::root("calls").doc("c1");
        store
            .upsert(&doc, fields(&[("status", json!("offering"))]))
            .await
            .unwrap();

        let mut sub = store.subscribe_doc(&doc).await.unwrap();
        let snapshot = sub.next().await.unwrap();
        assert_eq!(snapshot.kind, ChangeKind::Added);
        assert_eq!(snapshot.doc.fields["status"], json!("offering"));

        store
            .upsert(&doc, fields(&[("status", json!("ended"))]))
            .await
            .unwrap();
        let change = sub.next().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Modified);
        assert_eq!(change.doc.fields["status"], json!("ended"));
    }

    #[tokio::test]
    async fn test_query_view_entry_and_exit() {
        let store = MemoryStore::new();
        let calls = CollectionPath::root("calls");
        let mut sub = store
            .subscribe(
                Query::collection(calls.clone())
                    .filter("calleeId", "bob")
                    .filter("status", "offering"),
            )
            .await
            .unwrap();

        let doc = calls.doc("c1");
        store
            .upsert(
                &doc,
                fields(&[("calleeId", json!("bob")), ("status", json!("offering"))]),
            )
            .await
            .unwrap();
        assert_eq!(sub.next().await.unwrap().kind, ChangeKind::Added);

        // Leaving the filtered view is a Removed event.
        store
            .upsert(&doc, fields(&[("status", json!("answered"))]))
            .await
            .unwrap();
        assert_eq!(sub.next().await.unwrap().kind, ChangeKind::Removed);
    }

    #[tokio::test]
    async fn test_dropped_subscription_receives_nothing_and_is_pruned() {
        let store = MemoryStore::new();
        let calls = CollectionPath::root("calls");

        let sub = store
            .subscribe(Query::collection(calls.clone()))
            .await
            .unwrap();
        drop(sub);

        store
            .create(&calls, fields(&[("n", json!(1))]))
            .await
            .unwrap();
        assert!(store.inner.read().await.watchers.is_empty());
    }

    #[tokio::test]
    async fn test_replay_delivers_existing_documents_first() {
        let store = MemoryStore::new();
        let coll = CollectionPath::root("calls/c1/offerCandidates");
        for n in 0..3 {
            store
                .create(&coll, fields(&[("n", json!(n))]))
                .await
                .unwrap();
        }

        let mut sub = store
            .subscribe(Query::collection(coll.clone()))
            .await
            .unwrap();
        store
            .create(&coll, fields(&[("n", json!(3))]))
            .await
            .unwrap();

        for expected in 0..4 {
            let event = sub.next().await.unwrap();
            assert_eq!(event.doc.fields["n"], json!(expected));
        }
    }
}
