//! Board emulator served over the socket link.
//!
//! Lets the socket transport and the CLI run end to end without hardware.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use lhylink_transport::{BoardLink, BoardSocketListener, LinkRequest, TransportError};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::sim::{lock_model, BoardModel, SimulatedBoardConfig};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Serves a [`BoardModel`] to socket-link clients, one at a time.
pub struct BoardEmulator {
    listener: BoardSocketListener,
    model: Arc<Mutex<BoardModel>>,
}

impl BoardEmulator {
    /// Bind the emulator socket.
    pub fn bind(path: impl AsRef<Path>, config: SimulatedBoardConfig) -> Result<Self> {
        let listener = BoardSocketListener::bind(path)?;
        Ok(Self {
            listener,
            model: Arc::new(Mutex::new(BoardModel::new(config))),
        })
    }

    /// The board state, shared with every connection.
    pub fn model(&self) -> Arc<Mutex<BoardModel>> {
        Arc::clone(&self.model)
    }

    pub fn path(&self) -> &Path {
        self.listener.path()
    }

    /// Accept and serve clients until `running` is cleared.
    pub fn serve(&self, running: &AtomicBool) -> Result<()> {
        self.listener.set_nonblocking(true)?;
        while running.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok(link) => {
                    if let Err(err) = self.serve_link(link, running) {
                        warn!(error = %err, "board link client failed");
                    }
                }
                Err(TransportError::Accept(err)) if err.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(POLL_INTERVAL);
                }
                Err(err) => return Err(err.into()),
            }
        }
        info!("board emulator stopped");
        Ok(())
    }

    /// Accept one client and serve it until it hangs up.
    pub fn serve_one(&self) -> Result<()> {
        self.listener.set_nonblocking(false)?;
        let link = self.listener.accept()?;
        self.serve_link(link, &AtomicBool::new(true))
    }

    fn serve_link(&self, mut link: BoardLink, running: &AtomicBool) -> Result<()> {
        link.set_read_timeout(Some(POLL_INTERVAL * 4))?;
        debug!("board link client connected");
        while running.load(Ordering::Acquire) {
            let request = match link.next_request() {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(TransportError::Io(err))
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            match request {
                LinkRequest::Write(frame) => lock_model(&self.model).write(&frame),
                LinkRequest::Status => {
                    let status = lock_model(&self.model).poll_status();
                    link.reply_status(&status)?;
                }
                LinkRequest::ChipVersion => {
                    let version = lock_model(&self.model).chip_version();
                    link.reply_chip_version(version)?;
                }
            }
        }
        debug!("board link client disconnected");
        Ok(())
    }
}
