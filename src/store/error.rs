use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Faults a document store may raise.
///
/// `Unavailable` is transient: writers retry with backoff where the write is
/// safe to repeat, readers resubscribe. `PermissionDenied` is fatal to the
/// call attempt that triggered it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("malformed document: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
