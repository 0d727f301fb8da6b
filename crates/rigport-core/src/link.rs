//! Byte-level link to a serial device.
//!
//! The [`SerialLink`] trait abstracts over the physical port so that the
//! reader, writer and PTT logic in `rigport-io` can run against a real
//! tokio-serial port or against `MockPort` from `rigport-test-harness` with
//! a paused clock.
//!
//! Reads are non-blocking: [`SerialLink::read_available`] drains whatever has
//! arrived and returns immediately. Deadlines and polling are the frame
//! reader's job, not the link's.

use async_trait::async_trait;

use crate::config::PortConfig;
use crate::error::Result;
use crate::types::ControlLine;

/// An opened serial device.
#[async_trait]
pub trait SerialLink: Send + Sync {
    /// Write bytes to the device, returning how many were accepted.
    ///
    /// A return value smaller than `data.len()` is a short write; it is not
    /// an error at this layer.
    async fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Append every byte currently buffered by the OS to `buf`.
    ///
    /// Returns the number of bytes appended, which is zero when nothing has
    /// arrived. Never waits.
    async fn read_available(&mut self, buf: &mut Vec<u8>) -> Result<usize>;

    /// Discard stale input already received but not yet read.
    fn clear_input(&mut self) -> Result<()>;

    /// Drive a control line high (`true`) or low (`false`).
    fn set_control_line(&mut self, line: ControlLine, high: bool) -> Result<()>;

    /// Release the device. Further calls should fail with
    /// [`Error::HandleClosed`](crate::error::Error::HandleClosed).
    async fn close(&mut self) -> Result<()>;

    /// Whether the device is still held.
    fn is_open(&self) -> bool;
}

/// Something that can turn a [`PortConfig`] into an opened [`SerialLink`].
///
/// The worker uses this to reopen the device after a reconfiguration.
#[async_trait]
pub trait LinkOpener: Send + Sync {
    async fn open(&self, config: &PortConfig) -> Result<Box<dyn SerialLink>>;
}
