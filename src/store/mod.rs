//! The document store used as the signaling relay.
//!
//! The call core never talks to a concrete database; it is written against
//! [`SignalStore`], a small contract covering exactly what signaling needs:
//! auto-ID document creation in ordered collections, field-merge upserts,
//! point reads, and query-scoped real-time subscriptions. A production
//! adapter (Firestore or similar) implements the trait outside this crate;
//! [`MemoryStore`] ships here for tests and single-process use.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use traits::{
    ChangeEvent, ChangeKind, CollectionPath, DocPath, Document, Fields, Query, SignalStore,
    Subscription,
};
