//! UI-facing call events.
//!
//! The controller publishes every observable call-state change on a
//! broadcast channel; the rendering layer subscribes and draws. Events are
//! notifications only — the UI issues intents back through
//! [`crate::calls::CallController`].

use crate::calls::CallRecord;
use crate::media::TrackKind;
use crate::types::call::{CallId, CallStatus, QualityLevel};
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// A call-state change notification.
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// A remote party is offering us a call.
    IncomingCall(CallRecord),
    /// The call's status moved (locally or observed from the store).
    StatusChanged { call_id: CallId, status: CallStatus },
    /// The quality monitor classified a new link-quality level.
    QualityChanged {
        call_id: CallId,
        level: QualityLevel,
    },
    /// Local capture is live and attached to the connection.
    LocalMediaReady { call_id: CallId },
    /// A remote media track arrived on the transport.
    RemoteTrackAdded { call_id: CallId, kind: TrackKind },
    /// The call was torn down because of a fault; `message` is user-facing.
    CallFaulted { call_id: CallId, message: String },
}

/// Broadcast fan-out for [`CallEvent`]s.
///
/// Slow subscribers may observe `Lagged` and should resynchronize from
/// controller state; the controller never blocks on the UI.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<CallEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.sender.subscribe()
    }

    /// Dispatch an event to all current subscribers. Lossy by design when
    /// nobody is listening.
    pub fn dispatch(&self, event: CallEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
