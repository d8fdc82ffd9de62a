use lhylink_frame::StatusCode;
use lhylink_transport::TransportError;

/// Errors raised by the controller and its send path.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The board answered a status request with status 0.
    #[error("board did not reply to status request")]
    NoReply,

    /// The board never confirmed or rejected a frame.
    #[error("packet not confirmed after {attempts} status polls (last status {last})")]
    ConfirmTimeout { attempts: u32, last: StatusCode },

    /// The board stopped replying while draining its buffer.
    #[error("board stopped replying while draining ({polls} polls without reply)")]
    DrainTimeout { polls: u32 },

    /// The board refused every open attempt.
    #[error("board refused connection {attempts} times")]
    RefusalLimit { attempts: u32 },

    /// No transport in the preference list could be constructed.
    #[error("no usable transport: {}", .0.join("; "))]
    NoTransport(Vec<String>),

    /// The controller was terminated while waiting on the board.
    #[error("controller terminated")]
    Aborted,

    /// `start()` was called while a previous run still owns the transport.
    #[error("transport is still held by a running send loop")]
    TransportBusy,

    /// The send-loop thread could not be spawned.
    #[error("failed to spawn send loop: {0}")]
    Spawn(std::io::Error),

    /// The send-loop thread panicked.
    #[error("send loop panicked")]
    WorkerPanicked,

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ControllerError {
    /// True when the board could not be opened at all.
    pub fn is_refusal(&self) -> bool {
        matches!(self, ControllerError::Transport(err) if err.is_refusal())
    }

    /// True for failures the send loop recovers from by closing the
    /// connection, backing off, and retrying the same frame.
    pub fn is_transient(&self) -> bool {
        match self {
            ControllerError::Transport(err) => !err.is_refusal(),
            ControllerError::NoReply
            | ControllerError::ConfirmTimeout { .. }
            | ControllerError::DrainTimeout { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusal_and_transient_are_disjoint() {
        let refused = ControllerError::from(TransportError::Refused {
            target: "board".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
        assert!(refused.is_refusal());
        assert!(!refused.is_transient());

        let io = ControllerError::from(TransportError::Io(std::io::Error::from(
            std::io::ErrorKind::BrokenPipe,
        )));
        assert!(io.is_transient());
        assert!(!io.is_refusal());

        let timeout = ControllerError::ConfirmTimeout {
            attempts: 300,
            last: StatusCode::NoReply,
        };
        assert!(timeout.is_transient());
        assert!(!ControllerError::Aborted.is_transient());
        assert!(!ControllerError::RefusalLimit { attempts: 5 }.is_transient());
    }

    #[test]
    fn no_transport_lists_failures() {
        let err = ControllerError::NoTransport(vec!["a: gone".into(), "b: busy".into()]);
        assert_eq!(err.to_string(), "no usable transport: a: gone; b: busy");
    }
}
