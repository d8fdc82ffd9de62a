use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use lhylink_frame::{Immediate, PostSend};
use lhylink_transport::Transport;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::buffer::{CommandBuffers, HeadId, Queue, QueuedPacket};
use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::link::{BoardSession, SendOutcome};
use crate::notify::{Notifier, NullNotifier};
use crate::state::{ControllerState, StateCell};

const NAP_SLICE: Duration = Duration::from_millis(10);

/// Counters accumulated over the controller's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ControllerStats {
    /// Frames confirmed or optimistically accepted.
    pub packets_sent: u64,
    /// Frames the board rejected and that were resent.
    pub rejected: u64,
    /// ERROR replies taken as delivery after a failed status read.
    pub optimistic_accepts: u64,
    /// Transient failures that closed the connection.
    pub connection_errors: u64,
    /// Refused open attempts.
    pub refusals: u64,
}

#[derive(Default)]
struct Counters {
    packets_sent: AtomicU64,
    rejected: AtomicU64,
    optimistic_accepts: AtomicU64,
    connection_errors: AtomicU64,
    refusals: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ControllerStats {
        ControllerStats {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            optimistic_accepts: self.optimistic_accepts.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            refusals: self.refusals.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    buffers: CommandBuffers,
    state: StateCell,
    counters: Counters,
    config: ControllerConfig,
    notifier: Arc<dyn Notifier>,
    /// Single-run lock: true while a send loop owns the transport.
    running: AtomicBool,
    /// Graceful exit request from `stop()`.
    shutdown: AtomicBool,
    /// Parked here between runs.
    transport: Mutex<Option<Box<dyn Transport>>>,
}

impl Shared {
    fn cancelled(&self) -> bool {
        self.shutdown.load(Ordering::Acquire) || self.state.get().is_finished()
    }

    /// Sleep up to `duration`, returning early once cancelled.
    fn nap(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        loop {
            if self.cancelled() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep(NAP_SLICE.min(deadline - now));
        }
    }

    fn abort(&self) {
        self.state.transition(
            &[
                ControllerState::Unknown,
                ControllerState::Initialize,
                ControllerState::Active,
                ControllerState::Idle,
                ControllerState::Paused,
                ControllerState::Busy,
                ControllerState::Wait,
            ],
            ControllerState::Terminate,
        );
        self.buffers.clear();
    }

    fn park_transport(&self) -> MutexGuard<'_, Option<Box<dyn Transport>>> {
        self.transport
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle to a buffered send loop driving one board.
///
/// Producers enqueue command bytes from any thread. A single background
/// thread frames them, sends them to the board, and waits for each frame to
/// be confirmed before sending the next.
pub struct Controller {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl Controller {
    /// Create a stopped controller with default timing and no observer.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self::with_config(transport, ControllerConfig::default(), Arc::new(NullNotifier))
    }

    /// Create a stopped controller.
    pub fn with_config(
        transport: Box<dyn Transport>,
        config: ControllerConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                buffers: CommandBuffers::new(Arc::clone(&notifier)),
                state: StateCell::new(Arc::clone(&notifier)),
                counters: Counters::default(),
                config,
                notifier,
                running: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                transport: Mutex::new(Some(transport)),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Queue bytes on the normal queue.
    pub fn enqueue(&self, bytes: impl AsRef<[u8]>) -> &Self {
        self.shared.buffers.enqueue(bytes.as_ref());
        self
    }

    /// Queue bytes on the realtime queue, ahead of all normal traffic.
    pub fn enqueue_priority(&self, bytes: impl AsRef<[u8]>) -> &Self {
        self.shared.buffers.enqueue_priority(bytes.as_ref());
        self
    }

    /// Total bytes not yet sent.
    pub fn pending_len(&self) -> usize {
        self.shared.buffers.len()
    }

    pub fn state(&self) -> ControllerState {
        self.shared.state.get()
    }

    pub fn stats(&self) -> ControllerStats {
        self.shared.counters.snapshot()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Spawn the send loop. Idempotent while a loop is running.
    ///
    /// A loop that is already terminating is joined first, so `start()`
    /// after `abort()` begins a fresh run.
    pub fn start(&self) -> Result<()> {
        self.launch(ControllerState::Initialize).map(|_| ())
    }

    /// Stop framing the normal queue. Realtime commands keep flowing.
    ///
    /// Starts the loop first if it is not running; it then comes up paused.
    pub fn pause(&self) -> Result<()> {
        if !self.launch(ControllerState::Paused)? {
            self.shared.state.transition(
                &[
                    ControllerState::Unknown,
                    ControllerState::Initialize,
                    ControllerState::Active,
                    ControllerState::Idle,
                    ControllerState::Wait,
                ],
                ControllerState::Paused,
            );
        }
        Ok(())
    }

    /// Spawn a loop entering `initial`. Returns `false` if one is running.
    fn launch(&self, initial: ControllerState) -> Result<bool> {
        let mut worker = self.worker_slot();
        if self.shared.running.load(Ordering::Acquire) && !self.shared.state.get().is_finished() {
            return Ok(false);
        }
        if let Some(handle) = worker.take() {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(error = %err, "previous send loop ended with error"),
                Err(_) => warn!("previous send loop panicked"),
            }
        }

        let transport = self
            .shared
            .park_transport()
            .take()
            .ok_or(ControllerError::TransportBusy)?;

        self.shared.shutdown.store(false, Ordering::Release);
        self.shared.running.store(true, Ordering::Release);
        self.shared.state.set(initial);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("lhylink-send-loop".to_string())
            .spawn(move || run_loop(shared, transport));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(true)
            }
            Err(err) => {
                self.shared.state.set(ControllerState::End);
                self.shared.running.store(false, Ordering::Release);
                Err(ControllerError::Spawn(err))
            }
        }
    }

    /// Resume framing the normal queue.
    pub fn resume(&self) {
        self.shared.state.transition(
            &[ControllerState::Paused, ControllerState::Busy],
            ControllerState::Active,
        );
    }

    /// Discard every queued byte and terminate the loop.
    pub fn abort(&self) {
        info!("controller aborted");
        self.shared.abort();
    }

    /// Finish the current frame, exit the loop, and wait for it.
    ///
    /// Queued data is kept. Returns the fatal error that ended the loop, if
    /// any.
    pub fn stop(&self) -> Result<()> {
        self.shared.shutdown.store(true, Ordering::Release);
        let handle = self.worker_slot().take();
        match handle {
            Some(handle) => handle.join().map_err(|_| ControllerError::WorkerPanicked)?,
            None => Ok(()),
        }
    }

    /// Wait until every queued byte has been sent and the loop went idle.
    ///
    /// Returns `false` on timeout or if the loop stopped with data queued.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.shared.state.get();
            let drained = self.shared.buffers.is_empty();
            if drained && matches!(state, ControllerState::Idle | ControllerState::End) {
                return true;
            }
            if !drained && !self.is_running() {
                return false;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(NAP_SLICE);
        }
    }

    fn worker_slot(&self) -> MutexGuard<'_, Option<JoinHandle<Result<()>>>> {
        self.worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            debug!(error = %err, "send loop ended with error during drop");
        }
    }
}

fn run_loop(shared: Arc<Shared>, transport: Box<dyn Transport>) -> Result<()> {
    let session = BoardSession::new(
        transport,
        shared.config.clone(),
        Arc::clone(&shared.notifier),
    );
    let mut worker = SendLoop {
        shared: Arc::clone(&shared),
        session,
        refusals: 0,
        idle_count: 0,
        applied: Vec::new(),
    };
    info!("send loop started");
    let result = worker.run();

    *shared.park_transport() = Some(worker.session.into_transport());
    shared.state.set(ControllerState::End);
    shared.running.store(false, Ordering::Release);
    match &result {
        Ok(()) => info!("send loop ended"),
        Err(err) => error!(error = %err, "send loop ended with error"),
    }
    result
}

struct SendLoop {
    shared: Arc<Shared>,
    session: BoardSession<Box<dyn Transport>>,
    refusals: u32,
    idle_count: u32,
    /// Unconsumed heads whose pause/resume suffixes already took effect, at
    /// most one per queue.
    applied: Vec<HeadId>,
}

impl SendLoop {
    fn run(&mut self) -> Result<()> {
        loop {
            if self.shared.cancelled() {
                return Ok(());
            }
            self.shared.state.transition(
                &[ControllerState::Unknown, ControllerState::Initialize],
                ControllerState::Active,
            );
            self.shared.buffers.drain_ingress();

            let paused = self.shared.state.get().is_paused();
            if paused && !self.shared.buffers.has_realtime() && !self.normal_head_started() {
                self.shared.nap(self.shared.config.paused_poll_interval);
                continue;
            }

            match self.process_queue(paused) {
                Ok(true) => {
                    self.idle_count = 0;
                    self.shared
                        .state
                        .transition(&[ControllerState::Idle], ControllerState::Active);
                }
                Ok(false) => {
                    self.shared
                        .state
                        .transition(&[ControllerState::Active], ControllerState::Idle);
                    self.idle_count = (self.idle_count + 1).min(self.shared.config.idle_max_steps);
                    self.shared
                        .nap(self.shared.config.idle_backoff(self.idle_count));
                }
                Err(ControllerError::Aborted) => {}
                Err(err) if err.is_refusal() => self.on_refusal(err)?,
                Err(err) if err.is_transient() => self.on_connection_error(err),
                Err(err) => {
                    self.shared.state.set(ControllerState::Terminate);
                    self.shared.notifier.fatal(&err);
                    return Err(err);
                }
            }
        }
    }

    fn on_refusal(&mut self, err: ControllerError) -> Result<()> {
        self.refusals += 1;
        Counters::bump(&self.shared.counters.refusals);
        self.shared.notifier.refused(self.refusals);

        let max = self.shared.config.max_open_attempts;
        warn!(attempt = self.refusals, max, error = %err, "board refused connection");
        if self.refusals >= max {
            let fatal = ControllerError::RefusalLimit {
                attempts: self.refusals,
            };
            self.shared.state.set(ControllerState::Terminate);
            self.shared.notifier.fatal(&fatal);
            return Err(fatal);
        }
        self.shared.nap(self.shared.config.refusal_backoff);
        Ok(())
    }

    fn on_connection_error(&mut self, err: ControllerError) {
        Counters::bump(&self.shared.counters.connection_errors);
        warn!(error = %err, "connection error, reconnecting");
        self.shared.notifier.connection_error(&err);
        self.session.close();
        self.shared.nap(self.shared.config.error_backoff);
    }

    fn open(&mut self) -> Result<()> {
        if self.session.open()? {
            self.refusals = 0;
        }
        Ok(())
    }

    /// True when a normal-queue line already paused the loop but is not
    /// yet sent. It still goes out while paused.
    fn normal_head_started(&self) -> bool {
        self.applied.iter().any(|id| id.queue() == Queue::Normal)
    }

    /// Frame and send one packet. Returns `false` when nothing was ready.
    fn process_queue(&mut self, paused: bool) -> Result<bool> {
        let allow_normal = !paused || self.normal_head_started();
        let Some(head) = self.shared.buffers.peek(allow_normal) else {
            return Ok(false);
        };
        let id = head.id();
        if paused && head.queue == Queue::Normal && !self.applied.contains(&id) {
            // Buffers were cleared since the pausing line was framed.
            self.applied.retain(|applied| applied.queue() != Queue::Normal);
            return Ok(false);
        }

        let terminate = head.packet.immediate.contains(&Immediate::Terminate);
        if !self.applied.contains(&id) {
            self.applied.retain(|applied| applied.queue() != id.queue());
            self.applied.push(id);
            for action in &head.packet.immediate {
                if *action != Immediate::Terminate {
                    self.apply_immediate(*action);
                }
            }
        }

        let Some(payload) = head.packet.payload else {
            self.applied.retain(|applied| *applied != id);
            if !self.shared.buffers.consume(&head) {
                return Ok(true);
            }
            if terminate {
                self.apply_immediate(Immediate::Terminate);
                return Ok(true);
            }
            self.run_post_send(&head)?;
            return Ok(true);
        };

        self.open()?;
        let shared = Arc::clone(&self.shared);
        let cancelled = move || shared.cancelled();
        match self.session.send_packet(&payload, &cancelled)? {
            SendOutcome::Rejected => {
                Counters::bump(&self.shared.counters.rejected);
                return Ok(true);
            }
            SendOutcome::AcceptedOptimistically => {
                Counters::bump(&self.shared.counters.optimistic_accepts);
            }
            SendOutcome::Confirmed => {}
        }
        Counters::bump(&self.shared.counters.packets_sent);
        self.shared.notifier.packet_sent(&payload);
        debug!(
            queue = ?head.queue,
            payload = %String::from_utf8_lossy(&payload),
            "packet sent"
        );

        self.applied.retain(|applied| *applied != id);
        if !self.shared.buffers.consume(&head) {
            debug!("buffers cleared while sending, dropping post-send action");
            return Ok(true);
        }
        self.run_post_send(&head)?;
        if terminate {
            self.apply_immediate(Immediate::Terminate);
        }
        Ok(true)
    }

    fn apply_immediate(&self, action: Immediate) {
        let state = &self.shared.state;
        match action {
            Immediate::Pause => {
                state.transition(
                    &[
                        ControllerState::Active,
                        ControllerState::Idle,
                        ControllerState::Wait,
                    ],
                    ControllerState::Paused,
                );
            }
            Immediate::Resume => {
                state.transition(
                    &[ControllerState::Paused, ControllerState::Busy],
                    ControllerState::Active,
                );
            }
            Immediate::Terminate => {
                info!("in-band terminate received");
                state.set(ControllerState::Terminate);
            }
        }
    }

    fn run_post_send(&mut self, head: &QueuedPacket) -> Result<()> {
        match head.packet.post_send {
            None => Ok(()),
            Some(PostSend::Abort) => {
                info!("in-band abort received");
                self.shared.abort();
                Ok(())
            }
            Some(PostSend::WaitFinished) => self.wait_finished(),
        }
    }

    /// Hold in Wait (or Busy when paused) until the board drains, then
    /// restore the previous state unless it was changed meanwhile.
    fn wait_finished(&mut self) -> Result<()> {
        self.open()?;
        let state = &self.shared.state;
        let previous = state.get();
        let hold = if previous.is_paused() {
            ControllerState::Busy
        } else {
            ControllerState::Wait
        };
        state.transition(&[previous], hold);

        let shared = Arc::clone(&self.shared);
        let cancelled = move || shared.cancelled();
        let result = self.session.wait_finished(&cancelled);

        self.shared.state.transition(&[hold], previous);
        result
    }
}
