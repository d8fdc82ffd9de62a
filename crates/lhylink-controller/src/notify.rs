//! Observer hooks for controller activity.
//!
//! Hooks run on the send-loop thread (or the calling thread for buffer and
//! state changes made through the handle) and must not block.

use std::sync::mpsc;

use lhylink_frame::{StatusCode, PAYLOAD_LEN};
use lhylink_transport::StatusBytes;
use serde::Serialize;

use crate::error::{ControllerError, Result};
use crate::state::ControllerState;

/// Receives controller notifications. Every hook defaults to a no-op.
pub trait Notifier: Send + Sync {
    fn state_changed(&self, _state: ControllerState) {}

    /// Total bytes still queued, across every buffer.
    fn buffer_changed(&self, _pending: usize) {}

    /// A frame was confirmed (or optimistically accepted) by the board.
    fn packet_sent(&self, _payload: &[u8; PAYLOAD_LEN]) {}

    fn status_updated(&self, _status: &StatusBytes) {}

    /// The device was opened and reported its chip version.
    fn connected(&self, _chip_version: u32) {}

    /// An open attempt was refused.
    fn refused(&self, _attempt: u32) {}

    /// A transient error; the connection was closed and the frame will be retried.
    fn connection_error(&self, _error: &ControllerError) {}

    /// The loop gave up and is terminating.
    fn fatal(&self, _error: &ControllerError) {}
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {}

/// Serializable snapshot of one notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControllerEvent {
    State { state: ControllerState },
    Buffer { pending: usize },
    PacketSent { payload: String },
    Status { code: u8, name: String, raw: StatusBytes },
    Connected { chip_version: u32 },
    Refused { attempt: u32 },
    ConnectionError { message: String },
    Fatal { message: String },
}

impl ControllerEvent {
    /// Render as a single JSON line.
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Forwards notifications as [`ControllerEvent`]s over a channel.
///
/// Sends never block; events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<ControllerEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::Receiver<ControllerEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.tx.send(event);
    }
}

impl Notifier for ChannelNotifier {
    fn state_changed(&self, state: ControllerState) {
        self.emit(ControllerEvent::State { state });
    }

    fn buffer_changed(&self, pending: usize) {
        self.emit(ControllerEvent::Buffer { pending });
    }

    fn packet_sent(&self, payload: &[u8; PAYLOAD_LEN]) {
        self.emit(ControllerEvent::PacketSent {
            payload: String::from_utf8_lossy(payload).into_owned(),
        });
    }

    fn status_updated(&self, status: &StatusBytes) {
        let code = StatusCode::from_vector(status);
        self.emit(ControllerEvent::Status {
            code: code.byte(),
            name: code.to_string(),
            raw: *status,
        });
    }

    fn connected(&self, chip_version: u32) {
        self.emit(ControllerEvent::Connected { chip_version });
    }

    fn refused(&self, attempt: u32) {
        self.emit(ControllerEvent::Refused { attempt });
    }

    fn connection_error(&self, error: &ControllerError) {
        self.emit(ControllerEvent::ConnectionError {
            message: error.to_string(),
        });
    }

    fn fatal(&self, error: &ControllerError) {
        self.emit(ControllerEvent::Fatal {
            message: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_notifier_forwards_events() {
        let (notifier, rx) = ChannelNotifier::new();
        notifier.connected(0x30);
        notifier.status_updated(&[255, 206, 0, 0, 0, 0]);
        notifier.fatal(&ControllerError::RefusalLimit { attempts: 5 });

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events[0], ControllerEvent::Connected { chip_version: 0x30 });
        assert_eq!(
            events[1],
            ControllerEvent::Status {
                code: 206,
                name: "OK".to_string(),
                raw: [255, 206, 0, 0, 0, 0],
            }
        );
        assert!(matches!(&events[2], ControllerEvent::Fatal { message } if message.contains("5 times")));
    }

    #[test]
    fn dropped_receiver_does_not_panic() {
        let (notifier, rx) = ChannelNotifier::new();
        drop(rx);
        notifier.buffer_changed(3);
    }

    #[test]
    fn events_serialize_with_tag() {
        let line = ControllerEvent::Buffer { pending: 12 }.to_json_line().unwrap();
        assert_eq!(line, r#"{"event":"buffer","pending":12}"#);

        let line = ControllerEvent::State {
            state: ControllerState::Paused,
        }
        .to_json_line()
        .unwrap();
        assert_eq!(line, r#"{"event":"state","state":"paused"}"#);
    }
}
