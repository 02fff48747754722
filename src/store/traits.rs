//! The store contract consumed by the call core.

use crate::store::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;

/// Field map of a document. Keys and value shapes are the wire contract of
/// whatever record is stored at the path.
pub type Fields = serde_json::Map<String, Value>;

/// Path of a collection: either a root collection (`calls`) or a
/// sub-collection under a document (`calls/{id}/offerCandidates`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn root(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn doc(&self, id: impl Into<String>) -> DocPath {
        DocPath {
            collection: self.clone(),
            id: id.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path of a single document within a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocPath {
    pub collection: CollectionPath,
    pub id: String,
}

impl DocPath {
    /// A sub-collection nested under this document.
    pub fn subcollection(&self, name: &str) -> CollectionPath {
        CollectionPath(format!("{}/{}/{}", self.collection.0, self.id, name))
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A collection subscription scoped by field-equality filters.
#[derive(Debug, Clone)]
pub struct Query {
    pub collection: CollectionPath,
    pub filters: Vec<(String, Value)>,
}

impl Query {
    pub fn collection(collection: CollectionPath) -> Self {
        Self {
            collection,
            filters: Vec::new(),
        }
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn matches(&self, collection: &CollectionPath, fields: &Fields) -> bool {
        self.collection == *collection
            && self
                .filters
                .iter()
                .all(|(field, value)| fields.get(field) == Some(value))
    }
}

/// A materialized document: its path plus its current fields.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: DocPath,
    pub fields: Fields,
}

impl Document {
    /// Decode the fields into a typed record.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }
}

/// What happened to a document relative to the subscribed view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Document entered the view (new document, or newly matches the query).
    Added,
    /// Document changed while staying in the view.
    Modified,
    /// Document left the view.
    Removed,
}

/// One change delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub doc: Document,
}

/// An owned, explicitly cancellable stream of [`ChangeEvent`]s.
///
/// Subscriptions replay the current state of the subscribed view as `Added`
/// events before delivering live changes, so consumers always observe a
/// collection from the beginning. Dropping (or [`close`](Self::close)-ing)
/// the subscription releases it: no events are delivered afterwards and the
/// store prunes the watcher.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<ChangeEvent>) -> Self {
        Self { rx }
    }

    /// Next change, or `None` once the store side has closed.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Release the subscription explicitly. Equivalent to dropping it.
    pub fn close(mut self) {
        self.rx.close();
    }
}

/// The signaling relay: a real-time document store.
///
/// Within one collection, subscribers observe documents in store append
/// order. No ordering holds across collections. All operations may fail
/// with [`StoreError::Unavailable`] (transient) or
/// [`StoreError::PermissionDenied`] (fatal to the call attempt).
///
/// [`StoreError::Unavailable`]: crate::store::StoreError::Unavailable
/// [`StoreError::PermissionDenied`]: crate::store::StoreError::PermissionDenied
#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Append a new document with a generated id. Collections are ordered
    /// by creation.
    async fn create(&self, collection: &CollectionPath, fields: Fields) -> Result<DocPath>;

    /// Create-or-merge at field granularity: present keys overwrite, absent
    /// keys are untouched.
    async fn upsert(&self, doc: &DocPath, fields: Fields) -> Result<()>;

    /// Point read.
    async fn get(&self, doc: &DocPath) -> Result<Option<Document>>;

    /// Snapshot-then-changes subscription to a single document.
    async fn subscribe_doc(&self, doc: &DocPath) -> Result<Subscription>;

    /// Replay-then-changes subscription to a filtered collection view.
    async fn subscribe(&self, query: Query) -> Result<Subscription>;
}
