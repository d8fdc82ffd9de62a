//! In-process board simulator.
//!
//! [`BoardModel`] validates frames the way the board does and produces the
//! status sequence a real board reports: BUSY while confirming, OK or ERROR
//! for the last frame, BUSY while queued work executes, FINISH once when the
//! work drains, then OK.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use lhylink_frame::{decode_wire, PAYLOAD_LEN, STATUS_BUSY, STATUS_ERROR, STATUS_FINISH, STATUS_OK};
use lhylink_transport::{Result, StatusBytes, Transport, TransportError};
use tracing::{debug, trace};

/// Behavior knobs of a simulated board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedBoardConfig {
    /// Value returned by `get_chip_version`.
    pub chip_version: u32,
    /// BUSY replies before each frame is confirmed or rejected.
    pub busy_polls: u32,
    /// Work units each accepted frame adds.
    pub work_per_packet: u32,
    /// Work units retired by each idle status poll.
    pub work_per_poll: u32,
    /// Number of initial open attempts that are refused.
    pub refuse_opens: u32,
}

impl Default for SimulatedBoardConfig {
    fn default() -> Self {
        Self {
            chip_version: 0x30,
            busy_polls: 1,
            work_per_packet: 4,
            work_per_poll: 2,
            refuse_opens: 0,
        }
    }
}

/// Board-side state machine shared by the simulator and the socket emulator.
#[derive(Debug)]
pub struct BoardModel {
    config: SimulatedBoardConfig,
    pending_reply: Option<(u32, u8)>,
    work: u32,
    finish_pending: bool,
    scripted: VecDeque<u8>,
    silent: bool,
    corrupt_writes: u32,
    status_failures: u32,
    refusals_left: u32,
    accepted: Vec<[u8; PAYLOAD_LEN]>,
    rejected: usize,
    writes: usize,
    status_polls: usize,
    open_attempts: usize,
}

fn status_vector(code: u8) -> StatusBytes {
    [255, code, 0, 0, 0, 0]
}

impl BoardModel {
    pub fn new(config: SimulatedBoardConfig) -> Self {
        Self {
            refusals_left: config.refuse_opens,
            config,
            pending_reply: None,
            work: 0,
            finish_pending: false,
            scripted: VecDeque::new(),
            silent: false,
            corrupt_writes: 0,
            status_failures: 0,
            accepted: Vec::new(),
            rejected: 0,
            writes: 0,
            status_polls: 0,
            open_attempts: 0,
        }
    }

    pub fn config(&self) -> &SimulatedBoardConfig {
        &self.config
    }

    /// Receive one wire frame.
    pub fn write(&mut self, data: &[u8]) {
        self.writes += 1;
        let mut frame = data.to_vec();
        if self.corrupt_writes > 0 {
            self.corrupt_writes -= 1;
            if let Some(byte) = frame.get_mut(1) {
                *byte ^= 0x01;
            }
        }

        let code = match decode_wire(&frame) {
            Ok(payload) => {
                trace!(payload = %String::from_utf8_lossy(&payload), "board accepted frame");
                self.accepted.push(payload);
                self.work = self.work.saturating_add(self.config.work_per_packet);
                STATUS_OK
            }
            Err(err) => {
                debug!(error = %err, "board rejected frame");
                self.rejected += 1;
                STATUS_ERROR
            }
        };
        self.pending_reply = Some((self.config.busy_polls, code));
    }

    /// Answer one status request.
    pub fn poll_status(&mut self) -> StatusBytes {
        self.status_polls += 1;
        if let Some(code) = self.scripted.pop_front() {
            return status_vector(code);
        }
        if self.silent {
            return status_vector(0);
        }
        if let Some((busy, code)) = self.pending_reply {
            if busy > 0 {
                self.pending_reply = Some((busy - 1, code));
                return status_vector(STATUS_BUSY);
            }
            self.pending_reply = None;
            return status_vector(code);
        }
        if self.work > 0 {
            self.work = self.work.saturating_sub(self.config.work_per_poll.max(1));
            self.finish_pending = self.work == 0;
            return status_vector(STATUS_BUSY);
        }
        if self.finish_pending {
            self.finish_pending = false;
            return status_vector(STATUS_FINISH);
        }
        status_vector(STATUS_OK)
    }

    pub fn chip_version(&self) -> u32 {
        self.config.chip_version
    }

    /// Queue raw status codes returned ahead of modelled replies.
    pub fn script_statuses(&mut self, codes: impl IntoIterator<Item = u8>) {
        self.scripted.extend(codes);
    }

    /// Reply with status 0 once the script runs out.
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Flip a payload bit in the next `count` frames received.
    pub fn corrupt_next_writes(&mut self, count: u32) {
        self.corrupt_writes = count;
    }

    /// Fail the next `count` status reads with an I/O error.
    pub fn fail_next_status_reads(&mut self, count: u32) {
        self.status_failures = count;
    }

    /// Frames accepted so far, in arrival order.
    pub fn accepted(&self) -> &[[u8; PAYLOAD_LEN]] {
        &self.accepted
    }

    pub fn rejected(&self) -> usize {
        self.rejected
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn status_polls(&self) -> usize {
        self.status_polls
    }

    pub fn open_attempts(&self) -> usize {
        self.open_attempts
    }

    /// True when no reply is pending and no work is queued.
    pub fn is_idle(&self) -> bool {
        self.pending_reply.is_none() && self.work == 0
    }

    fn take_status_failure(&mut self) -> bool {
        if self.status_failures == 0 {
            return false;
        }
        self.status_failures -= 1;
        true
    }

    fn try_open(&mut self) -> bool {
        self.open_attempts += 1;
        if self.refusals_left == 0 {
            return true;
        }
        self.refusals_left = self.refusals_left.saturating_sub(1);
        false
    }
}

/// Lock a shared model, recovering from poisoning.
pub fn lock_model(model: &Mutex<BoardModel>) -> MutexGuard<'_, BoardModel> {
    model.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// [`Transport`] backed by an in-process [`BoardModel`].
///
/// Clones share the model, so a test can keep one to inspect the board.
#[derive(Debug, Clone)]
pub struct SimulatedBoard {
    model: Arc<Mutex<BoardModel>>,
    open: bool,
}

impl SimulatedBoard {
    pub fn new(config: SimulatedBoardConfig) -> Self {
        Self::from_model(Arc::new(Mutex::new(BoardModel::new(config))))
    }

    pub fn from_model(model: Arc<Mutex<BoardModel>>) -> Self {
        Self { model, open: false }
    }

    pub fn model(&self) -> Arc<Mutex<BoardModel>> {
        Arc::clone(&self.model)
    }

    /// Run `f` against the locked model.
    pub fn with_model<R>(&self, f: impl FnOnce(&mut BoardModel) -> R) -> R {
        f(&mut lock_model(&self.model))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(TransportError::NotOpen)
        }
    }
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::new(SimulatedBoardConfig::default())
    }
}

impl Transport for SimulatedBoard {
    fn open(&mut self) -> Result<()> {
        if self.open {
            return Ok(());
        }
        if !lock_model(&self.model).try_open() {
            return Err(TransportError::Refused {
                target: "simulated board".to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no board attached"),
            });
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        lock_model(&self.model).write(data);
        Ok(())
    }

    fn get_status(&mut self) -> Result<StatusBytes> {
        self.ensure_open()?;
        let mut model = lock_model(&self.model);
        if model.take_status_failure() {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated status read failure",
            )));
        }
        Ok(model.poll_status())
    }

    fn get_chip_version(&mut self) -> Result<u32> {
        self.ensure_open()?;
        Ok(lock_model(&self.model).chip_version())
    }

    fn transport_name(&self) -> &'static str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use lhylink_frame::{next_packet, wire_frame, StatusCode};

    use super::*;

    fn poll(model: &mut BoardModel) -> StatusCode {
        StatusCode::from_vector(&model.poll_status())
    }

    #[test]
    fn valid_frame_goes_busy_then_ok_then_finishes() {
        let mut model = BoardModel::new(SimulatedBoardConfig {
            busy_polls: 1,
            work_per_packet: 2,
            work_per_poll: 1,
            ..SimulatedBoardConfig::default()
        });
        let payload = next_packet(b"G0X0Y0\n").unwrap().payload.unwrap();
        model.write(&wire_frame(&payload));

        assert_eq!(poll(&mut model), StatusCode::Busy);
        assert_eq!(poll(&mut model), StatusCode::Ok);
        assert_eq!(poll(&mut model), StatusCode::Busy);
        assert_eq!(poll(&mut model), StatusCode::Busy);
        assert_eq!(poll(&mut model), StatusCode::Finish);
        assert_eq!(poll(&mut model), StatusCode::Ok);
        assert_eq!(model.accepted(), &[payload]);
        assert!(model.is_idle());
    }

    #[test]
    fn corrupt_frame_is_rejected() {
        let mut model = BoardModel::new(SimulatedBoardConfig {
            busy_polls: 0,
            ..SimulatedBoardConfig::default()
        });
        let payload = next_packet(b"IPP\n").unwrap().payload.unwrap();
        model.corrupt_next_writes(1);
        model.write(&wire_frame(&payload));
        assert_eq!(poll(&mut model), StatusCode::Error);
        assert_eq!(model.rejected(), 1);
        assert!(model.accepted().is_empty());

        model.write(&wire_frame(&payload));
        assert_eq!(poll(&mut model), StatusCode::Ok);
    }

    #[test]
    fn script_and_silence_override_model() {
        let mut model = BoardModel::new(SimulatedBoardConfig::default());
        model.script_statuses([STATUS_ERROR, 17]);
        model.set_silent(true);
        assert_eq!(poll(&mut model), StatusCode::Error);
        assert_eq!(poll(&mut model), StatusCode::Unknown(17));
        assert_eq!(poll(&mut model), StatusCode::NoReply);
        assert_eq!(model.status_polls(), 3);
    }

    #[test]
    fn refused_opens_then_connects() {
        let mut board = SimulatedBoard::new(SimulatedBoardConfig {
            refuse_opens: 2,
            ..SimulatedBoardConfig::default()
        });
        assert!(board.open().unwrap_err().is_refusal());
        assert!(board.open().unwrap_err().is_refusal());
        board.open().unwrap();
        assert!(board.is_open());
        assert_eq!(board.with_model(|m| m.open_attempts()), 3);
        assert_eq!(board.get_chip_version().unwrap(), 0x30);
    }

    #[test]
    fn closed_board_refuses_io() {
        let mut board = SimulatedBoard::default();
        assert!(matches!(board.write(&[0; 32]), Err(TransportError::NotOpen)));
        assert!(matches!(board.get_status(), Err(TransportError::NotOpen)));
    }

    #[test]
    fn injected_status_failure_is_io_error() {
        let mut board = SimulatedBoard::default();
        board.open().unwrap();
        board.with_model(|m| m.fail_next_status_reads(1));
        assert!(matches!(board.get_status(), Err(TransportError::Io(_))));
        assert!(board.get_status().is_ok());
    }
}
