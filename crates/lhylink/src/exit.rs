use std::fmt;
use std::io;

use lhylink_controller::ControllerError;
use lhylink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::PathTooLong { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn controller_error(context: &str, err: ControllerError) -> CliError {
    match err {
        ControllerError::Transport(err) => transport_error(context, err),
        ControllerError::NoReply
        | ControllerError::ConfirmTimeout { .. }
        | ControllerError::DrainTimeout { .. }
        | ControllerError::RefusalLimit { .. }
        | ControllerError::NoTransport(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        ControllerError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusal_limit_is_transport_error() {
        let err = controller_error("send failed", ControllerError::RefusalLimit { attempts: 5 });
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert_eq!(err.message, "send failed: board refused connection 5 times");
    }

    #[test]
    fn io_timeouts_map_to_timeout() {
        let err = controller_error(
            "status failed",
            ControllerError::Transport(TransportError::Io(io::Error::from(
                io::ErrorKind::TimedOut,
            ))),
        );
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn panicked_loop_is_internal() {
        assert_eq!(
            controller_error("send failed", ControllerError::WorkerPanicked).code,
            INTERNAL
        );
    }
}
