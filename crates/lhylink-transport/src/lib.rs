//! Transport abstraction for Lihuiyu laser boards.
//!
//! The board itself sits behind a USB chip emulating a parallel port. This
//! crate only describes the capability the controller consumes:
//! - open/close the device
//! - write a 32-byte frame
//! - read the 6-byte status vector and the chip version
//!
//! It also provides a Unix-socket transport that talks to an out-of-process
//! board bridge (or emulator) through a tiny request/reply link protocol.

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use traits::{StatusBytes, Transport, STATUS_LEN};

#[cfg(unix)]
pub use uds::{BoardLink, BoardSocketListener, LinkRequest, SocketTransport};
