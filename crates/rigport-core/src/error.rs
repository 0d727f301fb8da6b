//! Error types for rigport.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Open failures, write failures, reply
//! timeouts, malformed replies and use of a closed handle are all captured
//! here, so a rig driver can decide per kind whether the rig is unreachable
//! or the failure is transient.

use crate::types::ControlLine;

/// Why a serial device could not be acquired.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OpenFailure {
    /// The device path does not exist.
    #[error("device not found")]
    NotFound,

    /// The process lacks permission to open the device.
    #[error("permission denied")]
    PermissionDenied,

    /// Another process holds the device exclusively.
    #[error("device busy")]
    Busy,

    /// The handle already owns an open device and must be closed first.
    #[error("handle already open")]
    AlreadyOpen,

    /// Any other OS-level failure.
    #[error("{0}")]
    Other(String),
}

/// The error type for all rigport operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The serial device could not be opened or configured.
    ///
    /// Fatal to this attempt, but the caller may retry once cabling or
    /// permissions are fixed.
    #[error("failed to open {device}: {reason}")]
    Open {
        /// Device path that was being opened.
        device: String,
        /// Failure category.
        reason: OpenFailure,
    },

    /// The underlying write failed.
    #[error("write failed: {0}")]
    Write(String),

    /// The write completed but fewer bytes than requested left the port.
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite {
        /// Bytes accepted by the port.
        written: usize,
        /// Bytes in the command frame.
        expected: usize,
    },

    /// No qualifying reply arrived within the deadline on any attempt.
    ///
    /// This typically indicates the rig is powered off, the baud rate is
    /// wrong, or the cable is not connected.
    #[error("timed out waiting for reply")]
    TimedOut,

    /// A reply arrived but did not parse as the driver expected.
    #[error("malformed reply: {0}")]
    MalformedReply(String),

    /// The handle was never opened or has been closed.
    #[error("handle closed")]
    HandleClosed,

    /// Setting an RTS/DTR level failed at the OS level.
    #[error("control line {line} failed: {reason}")]
    ControlLine {
        /// Line that was being driven.
        line: ControlLine,
        /// OS error description.
        reason: String,
    },

    /// The port configuration is inconsistent or could not be parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The requested operation is not supported by this rig or link.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` for failures a caller may reasonably retry later
    /// (rig off, cable unplugged, garbled reply) as opposed to programming
    /// or configuration errors.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Open { .. } | Error::TimedOut | Error::MalformedReply(_)
        )
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_open() {
        let e = Error::Open {
            device: "/dev/ttyUSB0".into(),
            reason: OpenFailure::Busy,
        };
        assert_eq!(e.to_string(), "failed to open /dev/ttyUSB0: device busy");
    }

    #[test]
    fn error_display_open_other() {
        let e = Error::Open {
            device: "COM3".into(),
            reason: OpenFailure::Other("driver fault".into()),
        };
        assert_eq!(e.to_string(), "failed to open COM3: driver fault");
    }

    #[test]
    fn error_display_short_write() {
        let e = Error::ShortWrite {
            written: 2,
            expected: 5,
        };
        assert_eq!(e.to_string(), "short write: 2 of 5 bytes");
    }

    #[test]
    fn error_display_timed_out() {
        assert_eq!(Error::TimedOut.to_string(), "timed out waiting for reply");
    }

    #[test]
    fn error_display_malformed() {
        let e = Error::MalformedReply("expected 14 bytes, got 9".into());
        assert_eq!(e.to_string(), "malformed reply: expected 14 bytes, got 9");
    }

    #[test]
    fn error_display_handle_closed() {
        assert_eq!(Error::HandleClosed.to_string(), "handle closed");
    }

    #[test]
    fn error_display_control_line() {
        let e = Error::ControlLine {
            line: ControlLine::Dtr,
            reason: "ioctl failed".into(),
        };
        assert_eq!(e.to_string(), "control line DTR failed: ioctl failed");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn recoverable_kinds() {
        assert!(Error::TimedOut.is_recoverable());
        assert!(Error::MalformedReply("x".into()).is_recoverable());
        assert!(
            Error::Open {
                device: "x".into(),
                reason: OpenFailure::NotFound
            }
            .is_recoverable()
        );
        assert!(!Error::HandleClosed.is_recoverable());
        assert!(!Error::Write("x".into()).is_recoverable());
        assert!(!Error::InvalidConfig("x".into()).is_recoverable());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
