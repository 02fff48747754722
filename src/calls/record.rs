//! Wire records stored in the signaling relay.
//!
//! Field names and the five-state status vocabulary are the
//! interoperability contract other clients must honor: a call is one
//! `calls/{id}` document shaped like [`CallRecord`], plus two append-only
//! candidate sub-collections (`offerCandidates`, `answerCandidates`) whose
//! documents are [`CandidateRecord`]s.

use crate::media::SessionDescription;
use crate::store::{Document, Fields, Result, StoreError};
use crate::types::call::{CallId, CallStatus, MediaKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A candidate document: the browser `RTCIceCandidate.toJSON()` shape.
pub use crate::media::IceCandidate as CandidateRecord;

/// The call document.
///
/// `offer` is written at most once, by the caller, before status leaves
/// `offering`; `answer` is written at most once, by the callee, in the same
/// merge that moves status to `answered`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    /// Document id. Authoritative copy is the document path; omitted from
    /// the stored fields when empty.
    #[serde(default = "CallId::empty", skip_serializing_if = "CallId::is_empty")]
    pub id: CallId,
    pub caller_id: String,
    pub caller_name: String,
    pub callee_id: String,
    pub media_kind: MediaKind,
    pub status: CallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
}

impl CallRecord {
    /// A fresh record as the caller creates it: `offering`, no
    /// descriptions yet, id assigned by the store.
    pub fn new_offering(
        caller_id: impl Into<String>,
        caller_name: impl Into<String>,
        callee_id: impl Into<String>,
        media_kind: MediaKind,
    ) -> Self {
        Self {
            id: CallId::empty(),
            caller_id: caller_id.into(),
            caller_name: caller_name.into(),
            callee_id: callee_id.into(),
            media_kind,
            status: CallStatus::Offering,
            offer: None,
            answer: None,
        }
    }

    /// Decode a store document, taking the id from the document path.
    pub fn from_document(doc: &Document) -> Result<Self> {
        let mut record: Self = doc.decode()?;
        record.id = CallId::new(&doc.path.id);
        Ok(record)
    }
}

impl CallId {
    pub(crate) fn empty() -> Self {
        Self::new("")
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }
}

/// Serialize any wire record into a store field map.
pub(crate) fn to_fields<T: Serialize>(value: &T) -> Result<Fields> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Decode(format!(
            "expected an object, got {}",
            other
        ))),
    }
}
