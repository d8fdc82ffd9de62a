//! Buffered packet controller for Lihuiyu laser boards.
//!
//! Streams raw board commands to the laser, one confirmed 30-byte packet at
//! a time, surviving flaky USB links along the way.
//!
//! # Crate Structure
//!
//! - [`transport`]: device capability (open, write, status) and the socket link
//! - [`frame`]: packet framing, CRC, in-band control bytes, status codes
//! - [`controller`]: the buffered send loop, simulator, and emulator

/// Re-export transport types.
pub mod transport {
    pub use lhylink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use lhylink_frame::*;
}

/// Re-export controller types.
pub mod controller {
    pub use lhylink_controller::*;
}
