//! In-band control bytes.
//!
//! A control byte placed just before a line end is stripped from the payload
//! and turned into a controller action.

/// Line terminator inside the command stream.
pub const LINE_END: u8 = b'\n';

/// Wait until the board drained its buffer, after the frame is confirmed.
pub const WAIT_FINISHED: u8 = b'-';

/// Abort the controller, after the frame is confirmed.
pub const ABORT: u8 = b'*';

/// Resume a paused controller immediately.
pub const RESUME: u8 = b'&';

/// Pause the controller immediately.
pub const PAUSE: u8 = b'!';

/// Pad the payload with its last byte instead of the filler.
pub const REPEAT_PAD: u8 = b'#';

/// Terminate the controller immediately.
pub const TERMINATE: u8 = 0x18;

/// Classification of one byte at the end of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlToken {
    Data,
    WaitFinished,
    Abort,
    Resume,
    Pause,
    RepeatPad,
    Terminate,
}

impl ControlToken {
    /// Classify a byte.
    pub fn classify(byte: u8) -> Self {
        match byte {
            WAIT_FINISHED => ControlToken::WaitFinished,
            ABORT => ControlToken::Abort,
            RESUME => ControlToken::Resume,
            PAUSE => ControlToken::Pause,
            REPEAT_PAD => ControlToken::RepeatPad,
            TERMINATE => ControlToken::Terminate,
            _ => ControlToken::Data,
        }
    }

    /// True for every token except [`ControlToken::Data`].
    pub fn is_control(self) -> bool {
        self != ControlToken::Data
    }

    /// Human-readable token name.
    pub fn name(self) -> &'static str {
        match self {
            ControlToken::Data => "data",
            ControlToken::WaitFinished => "wait-finished",
            ControlToken::Abort => "abort",
            ControlToken::Resume => "resume",
            ControlToken::Pause => "pause",
            ControlToken::RepeatPad => "repeat-pad",
            ControlToken::Terminate => "terminate",
        }
    }
}
