//! Buffered send-loop controller for Lihuiyu laser boards.
//!
//! Producers enqueue raw command bytes; a background thread frames them
//! into 30-byte packets, sends each one, and polls the board's status until
//! it is confirmed before moving on. The loop survives transient USB
//! failures by reconnecting and resending, and gives up after a bounded
//! number of refused opens.

pub mod buffer;
pub mod config;
pub mod connector;
pub mod controller;
#[cfg(unix)]
pub mod emulator;
pub mod error;
pub mod link;
pub mod notify;
pub mod sim;
pub mod state;

pub use buffer::{CommandBuffers, HeadId, Queue, QueuedPacket};
pub use config::ControllerConfig;
pub use connector::{select_transport, TransportSpec};
pub use controller::{Controller, ControllerStats};
#[cfg(unix)]
pub use emulator::BoardEmulator;
pub use error::{ControllerError, Result};
pub use link::{BoardSession, SendOutcome};
pub use notify::{ChannelNotifier, ControllerEvent, Notifier, NullNotifier};
pub use sim::{lock_model, BoardModel, SimulatedBoard, SimulatedBoardConfig};
pub use state::ControllerState;
