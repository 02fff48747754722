//! Connection-quality sampling.
//!
//! While a call is answered or connected, the monitor samples the
//! transport's statistics on a fixed interval and classifies the succeeded
//! candidate pair's round-trip time into a discrete level. Samples without
//! a succeeded pair retain the previous level; sampling failures are logged
//! and skipped. The monitor is stopped and joined before the underlying
//! connection is closed, so no sample ever races a closed transport.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::sync::watch;

use crate::calls::session::Session;
use crate::types::call::{CallStatus, QualityLevel};
use crate::types::events::{CallEvent, EventBus};

/// Map a round-trip time to a quality level.
///
/// Boundaries are exact: 99 ms is excellent, 100 ms is good, 599 ms is
/// fair, 600 ms is poor.
pub fn classify_rtt(rtt: Duration) -> QualityLevel {
    let ms = rtt.as_millis();
    if ms < 100 {
        QualityLevel::Excellent
    } else if ms < 300 {
        QualityLevel::Good
    } else if ms < 600 {
        QualityLevel::Fair
    } else {
        QualityLevel::Poor
    }
}

pub struct QualityMonitor {
    session: Arc<Session>,
    events: Arc<EventBus>,
    interval: Duration,
}

impl QualityMonitor {
    pub fn new(session: Arc<Session>, events: Arc<EventBus>, interval: Duration) -> Self {
        Self {
            session,
            events,
            interval,
        }
    }

    /// Sampling loop. Runs until `shutdown` fires; the owner joins the
    /// task before closing the connection.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let call_id = self.session.record.id.clone();
        let mut level = QualityLevel::Unknown;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let status = self.session.phase().await.status();
                    if !matches!(status, CallStatus::Answered | CallStatus::Connected) {
                        if status.is_terminal() {
                            return;
                        }
                        continue;
                    }

                    match self.session.conn.stats().await {
                        Ok(stats) => {
                            // No succeeded pair this sample: keep the last
                            // established level.
                            if let Some(rtt) = stats.succeeded_rtt() {
                                let sampled = classify_rtt(rtt);
                                if sampled != level {
                                    level = sampled;
                                    self.session.set_quality(level);
                                    self.events.dispatch(CallEvent::QualityChanged {
                                        call_id: call_id.clone(),
                                        level,
                                    });
                                }
                            }
                        }
                        Err(e) => {
                            debug!("Call {}: quality sample unavailable: {}", call_id, e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    debug!("Call {}: quality monitoring stopped", call_id);
                    return;
                }
            }
        }
    }
}
