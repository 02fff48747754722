//! Shared call vocabulary: identifiers, status, media kind, quality levels.

use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque call identifier, generated when the call record is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh 20-character alphanumeric id (document-store style).
    pub fn generate() -> Self {
        Self(Alphanumeric.sample_string(&mut rand::rng(), 20))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Kind of media a call carries. Immutable for the call's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Audio,
    Video,
}

impl MediaKind {
    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video)
    }
}

/// The five-state wire vocabulary of a call record.
///
/// These strings are the interoperability contract with other clients
/// sharing the document store; see [`crate::calls::record::CallRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Caller has created the record and is producing an offer.
    Offering,
    /// Callee has stored an answer.
    Answered,
    /// A transport is live between the peers.
    Connected,
    /// Terminal: hung up by either party (or torn down after a fault).
    Ended,
    /// Terminal: declined by the callee without ever answering.
    Rejected,
}

impl CallStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Offering => "offering",
            Self::Answered => "answered",
            Self::Connected => "connected",
            Self::Ended => "ended",
            Self::Rejected => "rejected",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "offering" => Some(Self::Offering),
            "answered" => Some(Self::Answered),
            "connected" => Some(Self::Connected),
            "ended" => Some(Self::Ended),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Terminal statuses admit no further transitions.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Rejected)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which end of the call this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallRole {
    Caller,
    Callee,
}

impl CallRole {
    /// The candidate collection this side publishes to.
    pub const fn local_side(&self) -> CandidateSide {
        match self {
            Self::Caller => CandidateSide::Offer,
            Self::Callee => CandidateSide::Answer,
        }
    }

    /// The candidate collection this side consumes from.
    pub const fn remote_side(&self) -> CandidateSide {
        match self {
            Self::Caller => CandidateSide::Answer,
            Self::Callee => CandidateSide::Offer,
        }
    }
}

/// One of the two append-only candidate collections of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSide {
    Offer,
    Answer,
}

impl CandidateSide {
    /// Collection name under the call document.
    pub const fn collection_name(&self) -> &'static str {
        match self {
            Self::Offer => "offerCandidates",
            Self::Answer => "answerCandidates",
        }
    }
}

/// Discrete link quality derived from the succeeded candidate pair's RTT.
///
/// `Unknown` is only the initial state; once a level has been established
/// the monitor never regresses to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    #[default]
    Unknown,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityLevel {
    /// Numeric level as shown in the UI signal indicator (0–4).
    pub const fn bars(&self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Poor => 1,
            Self::Fair => 2,
            Self::Good => 3,
            Self::Excellent => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_id_generate_is_unique_and_sized() {
        let a = CallId::generate();
        let b = CallId::generate();
        assert_eq!(a.as_str().len(), 20);
        assert_ne!(a, b);
        assert!(a.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            CallStatus::Offering,
            CallStatus::Answered,
            CallStatus::Connected,
            CallStatus::Ended,
            CallStatus::Rejected,
        ] {
            assert_eq!(CallStatus::from_str_opt(status.as_str()), Some(status));
        }
        assert_eq!(CallStatus::from_str_opt("ringing"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(CallStatus::Ended.is_terminal());
        assert!(CallStatus::Rejected.is_terminal());
        assert!(!CallStatus::Offering.is_terminal());
        assert!(!CallStatus::Answered.is_terminal());
        assert!(!CallStatus::Connected.is_terminal());
    }

    #[test]
    fn test_role_sides() {
        assert_eq!(CallRole::Caller.local_side(), CandidateSide::Offer);
        assert_eq!(CallRole::Caller.remote_side(), CandidateSide::Answer);
        assert_eq!(CallRole::Callee.local_side(), CandidateSide::Answer);
        assert_eq!(CallRole::Callee.remote_side(), CandidateSide::Offer);
    }

    #[test]
    fn test_quality_bars() {
        assert_eq!(QualityLevel::Unknown.bars(), 0);
        assert_eq!(QualityLevel::Poor.bars(), 1);
        assert_eq!(QualityLevel::Fair.bars(), 2);
        assert_eq!(QualityLevel::Good.bars(), 3);
        assert_eq!(QualityLevel::Excellent.bars(), 4);
    }
}
