//! Status poller and send path for one board connection.

use std::sync::Arc;
use std::thread;

use lhylink_frame::{wire_frame, StatusCode, PAYLOAD_LEN};
use lhylink_transport::{StatusBytes, Transport, STATUS_LEN};
use tracing::{debug, info, trace, warn};

use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::notify::Notifier;

/// How the board answered a sent frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The board replied OK.
    Confirmed,
    /// The board replied ERROR with a clean poll history; resend the frame.
    Rejected,
    /// The board replied ERROR after a status read failed, so the reply may
    /// belong to an earlier exchange. The frame is treated as delivered.
    AcceptedOptimistically,
}

/// Wraps a transport with the board's poll-and-confirm protocol.
pub struct BoardSession<T: Transport> {
    transport: T,
    config: ControllerConfig,
    notifier: Arc<dyn Notifier>,
    last_status: StatusBytes,
    /// Set by a confirmed OK; skips the accept wait before the next frame.
    pre_ok: bool,
}

impl<T: Transport> BoardSession<T> {
    pub fn new(transport: T, config: ControllerConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            transport,
            config,
            notifier,
            last_status: [0; STATUS_LEN],
            pre_ok: false,
        }
    }

    /// Open the transport if needed. Returns `true` when a new connection
    /// was made; the chip version is read and published on every open.
    pub fn open(&mut self) -> Result<bool> {
        if self.transport.is_open() {
            return Ok(false);
        }
        self.transport.open()?;
        let chip_version = match self.transport.get_chip_version() {
            Ok(version) => version,
            Err(err) => {
                self.close();
                return Err(err.into());
            }
        };
        info!(
            transport = self.transport.transport_name(),
            chip_version, "board connected"
        );
        self.notifier.connected(chip_version);
        Ok(true)
    }

    /// Close the transport and forget any cached acceptance.
    pub fn close(&mut self) {
        self.pre_ok = false;
        if let Err(err) = self.transport.close() {
            debug!(error = %err, "error while closing transport");
        }
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Read, publish, and classify the status vector.
    pub fn update_status(&mut self) -> Result<StatusCode> {
        let status = self.transport.get_status()?;
        self.last_status = status;
        self.notifier.status_updated(&status);
        let code = StatusCode::from_vector(&status);
        trace!(status = %code, "status polled");
        Ok(code)
    }

    /// The most recently read status vector.
    pub fn last_status(&self) -> StatusBytes {
        self.last_status
    }

    /// Poll until the board reports OK or ERROR.
    ///
    /// A status of 0 is a connection failure. Returns `Aborted` once
    /// `cancelled` reports true.
    pub fn wait_until_accepting_packets(&mut self, cancelled: &dyn Fn() -> bool) -> Result<()> {
        loop {
            if cancelled() {
                return Err(ControllerError::Aborted);
            }
            match self.update_status()? {
                StatusCode::Ok | StatusCode::Error => return Ok(()),
                StatusCode::NoReply => return Err(ControllerError::NoReply),
                _ => thread::sleep(self.config.accept_poll_interval),
            }
        }
    }

    /// Write one frame and wait for the board to confirm or reject it.
    ///
    /// The accept wait is skipped when the previous frame was confirmed.
    /// At most `confirm_attempts` status polls are spent on confirmation,
    /// BUSY replies included.
    /// Status read failures during confirmation are tolerated but mark the
    /// exchange as not flawless, which turns an ERROR reply into an
    /// optimistic acceptance.
    pub fn send_packet(
        &mut self,
        payload: &[u8; PAYLOAD_LEN],
        cancelled: &dyn Fn() -> bool,
    ) -> Result<SendOutcome> {
        if !self.pre_ok {
            self.wait_until_accepting_packets(cancelled)?;
        }
        self.pre_ok = false;
        self.transport.write(&wire_frame(payload))?;

        let mut flawless = true;
        let mut status = StatusCode::NoReply;
        for _ in 0..self.config.confirm_attempts {
            if cancelled() {
                return Err(ControllerError::Aborted);
            }
            match self.update_status() {
                Ok(StatusCode::Ok) => {
                    self.pre_ok = true;
                    return Ok(SendOutcome::Confirmed);
                }
                Ok(StatusCode::Error) if flawless => {
                    warn!(
                        payload = %String::from_utf8_lossy(payload),
                        "board rejected packet, resending"
                    );
                    return Ok(SendOutcome::Rejected);
                }
                Ok(StatusCode::Error) => {
                    warn!("ERROR after failed status read, assuming packet was delivered");
                    return Ok(SendOutcome::AcceptedOptimistically);
                }
                Ok(code) => {
                    if matches!(code, StatusCode::Unknown(_) | StatusCode::BadState) {
                        warn!(status = %code, "unexpected status while confirming packet");
                    }
                    status = code;
                }
                Err(err) => {
                    debug!(error = %err, "status read failed while confirming packet");
                    flawless = false;
                }
            }
        }

        Err(ControllerError::ConfirmTimeout {
            attempts: self.config.confirm_attempts,
            last: status,
        })
    }

    /// Poll until the board reports its buffer drained.
    ///
    /// More than `drain_no_reply_limit` consecutive status-0 replies is a
    /// timeout.
    pub fn wait_finished(&mut self, cancelled: &dyn Fn() -> bool) -> Result<()> {
        let mut no_reply = 0u32;
        loop {
            if cancelled() {
                return Err(ControllerError::Aborted);
            }
            let code = self.update_status()?;
            if code.is_finished() {
                debug!(status = %code, "board drained");
                return Ok(());
            }
            if code == StatusCode::NoReply {
                no_reply += 1;
                if no_reply > self.config.drain_no_reply_limit {
                    return Err(ControllerError::DrainTimeout { polls: no_reply });
                }
            } else {
                no_reply = 0;
            }
            thread::sleep(self.config.finish_poll_interval);
        }
    }

    /// Give the transport back, closing it first.
    pub fn into_transport(mut self) -> T {
        self.close();
        self.transport
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lhylink_frame::{next_packet, STATUS_BUSY, STATUS_ERROR, STATUS_OK};

    use super::*;
    use crate::notify::NullNotifier;
    use crate::sim::{SimulatedBoard, SimulatedBoardConfig};

    fn fast_config() -> ControllerConfig {
        ControllerConfig {
            accept_poll_interval: Duration::from_millis(1),
            finish_poll_interval: Duration::from_millis(1),
            ..ControllerConfig::default()
        }
    }

    fn link(board: &SimulatedBoard) -> BoardSession<SimulatedBoard> {
        let mut link = BoardSession::new(board.clone(), fast_config(), Arc::new(NullNotifier));
        link.open().unwrap();
        link
    }

    fn payload(line: &[u8]) -> [u8; PAYLOAD_LEN] {
        next_packet(line).unwrap().payload.unwrap()
    }

    fn never() -> bool {
        false
    }

    #[test]
    fn confirmed_packet_skips_next_accept_wait() {
        let board = SimulatedBoard::new(SimulatedBoardConfig {
            busy_polls: 0,
            work_per_packet: 0,
            ..SimulatedBoardConfig::default()
        });
        let mut link = link(&board);

        let outcome = link.send_packet(&payload(b"IPP\n"), &never).unwrap();
        assert_eq!(outcome, SendOutcome::Confirmed);
        // accept wait + confirmation
        assert_eq!(board.with_model(|m| m.status_polls()), 2);

        link.send_packet(&payload(b"IPP\n"), &never).unwrap();
        assert_eq!(board.with_model(|m| m.status_polls()), 3);
    }

    #[test]
    fn confirmation_is_bounded_when_board_stops_replying() {
        let board = SimulatedBoard::default();
        let mut link = link(&board);
        board.with_model(|m| {
            m.script_statuses([STATUS_OK]);
            m.set_silent(true);
        });

        let err = link.send_packet(&payload(b"IPP\n"), &never).unwrap_err();
        assert!(matches!(
            err,
            ControllerError::ConfirmTimeout {
                attempts: 300,
                last: StatusCode::NoReply
            }
        ));
        assert!(err.is_transient());
        assert_eq!(board.with_model(|m| m.status_polls()), 1 + 300);
    }

    #[test]
    fn accept_wait_fails_on_no_reply() {
        let board = SimulatedBoard::default();
        let mut link = link(&board);
        board.with_model(|m| m.set_silent(true));
        let err = link.send_packet(&payload(b"IPP\n"), &never).unwrap_err();
        assert!(matches!(err, ControllerError::NoReply));
        assert_eq!(board.with_model(|m| m.writes()), 0);
    }

    #[test]
    fn clean_error_reply_is_a_rejection() {
        let board = SimulatedBoard::new(SimulatedBoardConfig {
            busy_polls: 2,
            ..SimulatedBoardConfig::default()
        });
        let mut link = link(&board);
        board.with_model(|m| m.corrupt_next_writes(1));

        let outcome = link.send_packet(&payload(b"IPP\n"), &never).unwrap();
        assert_eq!(outcome, SendOutcome::Rejected);
        assert_eq!(board.with_model(|m| m.rejected()), 1);

        let outcome = link.send_packet(&payload(b"IPP\n"), &never).unwrap();
        assert_eq!(outcome, SendOutcome::Confirmed);
        assert_eq!(board.with_model(|m| m.accepted().len()), 1);
    }

    #[test]
    fn error_after_failed_read_is_accepted_optimistically() {
        let board = SimulatedBoard::new(SimulatedBoardConfig {
            busy_polls: 0,
            work_per_packet: 0,
            ..SimulatedBoardConfig::default()
        });
        let mut link = link(&board);
        link.send_packet(&payload(b"IPP\n"), &never).unwrap();

        board.with_model(|m| {
            m.fail_next_status_reads(1);
            m.script_statuses([STATUS_ERROR]);
        });
        let outcome = link.send_packet(&payload(b"IPP\n"), &never).unwrap();
        assert_eq!(outcome, SendOutcome::AcceptedOptimistically);
    }

    #[test]
    fn busy_keeps_polling_until_settled() {
        let board = SimulatedBoard::default();
        let mut link = link(&board);
        board.with_model(|m| m.script_statuses([STATUS_OK, STATUS_BUSY, 17, STATUS_BUSY]));
        let outcome = link.send_packet(&payload(b"IPP\n"), &never).unwrap();
        assert_eq!(outcome, SendOutcome::Confirmed);
    }

    #[test]
    fn endless_busy_exhausts_confirmation_window() {
        let board = SimulatedBoard::default();
        let mut link = link(&board);
        board.with_model(|m| {
            m.script_statuses([STATUS_OK]);
            m.script_statuses(std::iter::repeat(STATUS_BUSY).take(5000));
        });

        let err = link.send_packet(&payload(b"IPP\n"), &never).unwrap_err();
        assert!(matches!(
            err,
            ControllerError::ConfirmTimeout {
                attempts: 300,
                last: StatusCode::Busy
            }
        ));
        assert_eq!(board.with_model(|m| m.status_polls()), 1 + 300);
    }

    #[test]
    fn wait_finished_returns_on_finish() {
        let board = SimulatedBoard::new(SimulatedBoardConfig {
            busy_polls: 0,
            work_per_packet: 6,
            work_per_poll: 2,
            ..SimulatedBoardConfig::default()
        });
        let mut link = link(&board);
        link.send_packet(&payload(b"IPP\n"), &never).unwrap();
        link.wait_finished(&never).unwrap();
        assert_eq!(StatusCode::from_vector(&link.last_status()), StatusCode::Finish);
    }

    #[test]
    fn wait_finished_times_out_on_silence() {
        let board = SimulatedBoard::default();
        let mut link = link(&board);
        board.with_model(|m| m.set_silent(true));
        let err = link.wait_finished(&never).unwrap_err();
        assert!(matches!(err, ControllerError::DrainTimeout { polls: 11 }));
    }

    #[test]
    fn cancelled_wait_reports_abort() {
        let board = SimulatedBoard::default();
        let mut link = link(&board);
        let err = link.wait_finished(&|| true).unwrap_err();
        assert!(matches!(err, ControllerError::Aborted));
    }
}
