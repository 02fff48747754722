//! Trickle-ICE publication.
//!
//! Bridges the media engine's candidate discovery to the signaling channel:
//! every locally discovered candidate is published to this side's
//! collection exactly once, in discovery order. Publication is best-effort
//! per candidate — a bounded number of retries on transient store faults,
//! then the candidate is dropped with a warning. Permission faults are
//! fatal and bubble up so the controller can tear the call down.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::calls::channel::SignalChannel;
use crate::config::CallConfig;
use crate::media::IceCandidate;
use crate::store::StoreError;
use crate::types::call::{CallId, CandidateSide};

pub struct IceGatherer {
    channel: Arc<SignalChannel>,
    call_id: CallId,
    side: CandidateSide,
    max_attempts: u32,
    backoff: Duration,
}

impl IceGatherer {
    pub fn new(
        channel: Arc<SignalChannel>,
        call_id: CallId,
        side: CandidateSide,
        config: &CallConfig,
    ) -> Self {
        Self {
            channel,
            call_id,
            side,
            max_attempts: config.candidate_publish_attempts.max(1),
            backoff: config.candidate_publish_backoff,
        }
    }

    /// Drain the candidate stream until it ends. Returns early only on a
    /// permission fault.
    pub async fn run(
        &self,
        mut candidates: mpsc::UnboundedReceiver<IceCandidate>,
    ) -> Result<(), StoreError> {
        let mut published = 0usize;
        while let Some(candidate) = candidates.recv().await {
            if self.publish(candidate).await? {
                published += 1;
            }
        }
        debug!(
            "Call {}: candidate gathering finished ({} published to {})",
            self.call_id,
            published,
            self.side.collection_name()
        );
        Ok(())
    }

    /// Publish one candidate with bounded retry. `Ok(false)` means the
    /// candidate was dropped after exhausting its attempts.
    async fn publish(&self, candidate: IceCandidate) -> Result<bool, StoreError> {
        for attempt in 1..=self.max_attempts {
            match self
                .channel
                .publish_candidate(&self.call_id, self.side, &candidate)
                .await
            {
                Ok(()) => return Ok(true),
                Err(e @ StoreError::PermissionDenied(_)) => return Err(e),
                Err(e) => {
                    debug!(
                        "Call {}: candidate publication attempt {}/{} failed: {}",
                        self.call_id, attempt, self.max_attempts, e
                    );
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.backoff * attempt).await;
                    }
                }
            }
        }
        warn!(
            "Call {}: dropping candidate after {} attempts: {}",
            self.call_id, self.max_attempts, candidate.candidate
        );
        Ok(false)
    }
}
