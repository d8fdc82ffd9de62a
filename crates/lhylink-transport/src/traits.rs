use crate::error::Result;

/// Length of the status vector returned by the board.
pub const STATUS_LEN: usize = 6;

/// Raw status vector. Byte 1 carries the status code.
pub type StatusBytes = [u8; STATUS_LEN];

/// Device capability consumed by the controller.
///
/// Implementations are driven from a single controller thread, so methods
/// take `&mut self` and never need internal locking. `open()` fails with
/// [`TransportError::Refused`](crate::TransportError::Refused) when the
/// device cannot be reached; every other failure is a mid-operation error
/// that the controller recovers from by closing and reopening.
pub trait Transport: Send {
    /// Open the device. Opening an already open transport is a no-op.
    fn open(&mut self) -> Result<()>;

    /// Close the device. Closing a closed transport is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Whether `open()` has succeeded and `close()` has not been called since.
    fn is_open(&self) -> bool;

    /// Write one complete wire frame.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Request the 6-byte status vector.
    fn get_status(&mut self) -> Result<StatusBytes>;

    /// Read the USB chip version.
    fn get_chip_version(&mut self) -> Result<u32>;

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn get_status(&mut self) -> Result<StatusBytes> {
        (**self).get_status()
    }

    fn get_chip_version(&mut self) -> Result<u32> {
        (**self).get_chip_version()
    }

    fn transport_name(&self) -> &'static str {
        (**self).transport_name()
    }
}
