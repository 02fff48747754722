//! Call-related error types.

use crate::media::MediaError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("call not found: {0}")]
    NotFound(String),

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] super::state::InvalidTransition),

    #[error("another call is already in progress")]
    CallInProgress,

    #[error("no active call")]
    NoActiveCall,

    #[error("call record has no offer")]
    MissingOffer,

    #[error("media engine error: {0}")]
    Media(#[from] MediaError),

    #[error("signaling store error: {0}")]
    Store(#[from] StoreError),
}
