//! Offer/answer negotiation.
//!
//! Drives the media connection's description API against the signaling
//! channel for one session: the caller path (produce and store the offer,
//! apply the answer exactly once), the callee path (apply the stored offer,
//! produce and store the answer), and the interpretation of remote record
//! changes observed through the store.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::calls::channel::SignalChannel;
use crate::calls::error::CallError;
use crate::calls::record::{CallRecord, CandidateRecord};
use crate::calls::session::Session;
use crate::calls::state::{CallTransition, InvalidTransition};
use crate::types::call::{CallRole, CallStatus};
use crate::types::events::{CallEvent, EventBus};

/// What a record observation means for the call's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Keep watching.
    Continue,
    /// The record reached a terminal status; the session must be torn down.
    Terminal(CallStatus),
}

pub struct NegotiationEngine {
    channel: Arc<SignalChannel>,
    session: Arc<Session>,
    events: Arc<EventBus>,
}

impl NegotiationEngine {
    pub fn new(channel: Arc<SignalChannel>, session: Arc<Session>, events: Arc<EventBus>) -> Self {
        Self {
            channel,
            session,
            events,
        }
    }

    /// Caller path: create the local offer and store it on the call record
    /// while status is still `offering`.
    pub async fn send_offer(&self) -> Result<(), CallError> {
        let conn = &self.session.conn;
        let offer = conn.create_offer().await?;
        conn.set_local_description(offer.clone()).await?;
        self.channel
            .set_offer(&self.session.record.id, &offer)
            .await?;
        info!("Call {}: offer stored", self.session.record.id);
        Ok(())
    }

    /// Callee path: apply the stored offer as the remote description,
    /// produce an answer, and store it together with the `answered` status.
    pub async fn send_answer(&self) -> Result<(), CallError> {
        let id = &self.session.record.id;
        let record = self
            .channel
            .get_call(id)
            .await?
            .ok_or_else(|| CallError::NotFound(id.to_string()))?;
        // The stored record is authoritative: a call the caller already
        // cancelled (or another device answered) cannot be answered again.
        if record.status != CallStatus::Offering {
            return Err(CallError::InvalidTransition(InvalidTransition {
                current_state: record.status.to_string(),
                attempted: "Answer".to_string(),
            }));
        }
        let offer = record.offer.ok_or(CallError::MissingOffer)?;

        self.session.apply_remote_description(offer).await?;

        let conn = &self.session.conn;
        let answer = conn.create_answer().await?;
        conn.set_local_description(answer.clone()).await?;
        self.channel.set_answer(id, &answer).await?;

        let phase = self.session.apply_transition(CallTransition::Answer).await?;
        self.events.dispatch(CallEvent::StatusChanged {
            call_id: id.clone(),
            status: phase.status(),
        });
        info!("Call {}: answer stored", id);
        Ok(())
    }

    /// Interpret one observed snapshot of the call record.
    pub async fn handle_record(&self, record: CallRecord) -> Result<RecordOutcome, CallError> {
        let id = &self.session.record.id;

        // The caller applies the answer the moment it appears. The guard in
        // the session makes a second observation a no-op.
        if self.session.role == CallRole::Caller
            && let Some(answer) = record.answer.clone()
            && self.session.apply_remote_description(answer).await?
        {
            debug!("Call {}: remote answer applied", id);
        }

        if record.status.is_terminal() {
            return Ok(RecordOutcome::Terminal(record.status));
        }

        if let Some(phase) = self.session.transition_to(record.status).await {
            self.events.dispatch(CallEvent::StatusChanged {
                call_id: id.clone(),
                status: phase.status(),
            });
        }
        Ok(RecordOutcome::Continue)
    }

    /// Apply one remote candidate observed on the peer's collection.
    /// Failures are not fatal to the call: trickling is best-effort.
    pub async fn handle_candidate(&self, candidate: CandidateRecord) {
        if let Err(e) = self.session.apply_remote_candidate(candidate).await {
            warn!(
                "Call {}: remote candidate failed to apply: {}",
                self.session.record.id, e
            );
        }
    }

    /// The local transport reported a succeeded pair. The caller writes the
    /// shared status; the callee observes it (or already transitioned
    /// locally, making the observation a stale no-op).
    pub async fn transport_connected(&self) -> Result<(), CallError> {
        let id = &self.session.record.id;
        let Some(phase) = self.session.transition_to(CallStatus::Connected).await else {
            return Ok(());
        };
        self.events.dispatch(CallEvent::StatusChanged {
            call_id: id.clone(),
            status: phase.status(),
        });
        if self.session.role == CallRole::Caller {
            self.channel.set_status(id, CallStatus::Connected).await?;
        }
        info!("Call {}: transport connected", id);
        Ok(())
    }
}
