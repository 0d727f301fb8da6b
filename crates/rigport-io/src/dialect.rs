//! Framing dialects.
//!
//! A [`FrameDialect`] looks at the bytes accumulated so far and decides
//! whether the generic completion rules in [`Expect`] may be applied yet,
//! or whether the dialect needs to hold the frame open or strip an echo.
//!
//! - [`AsciiTerminated`]: printable command sets ending in a sentinel such
//!   as `;` or `\r` (Kenwood, Elecraft, newer Yaesu).
//! - [`FixedLength`]: binary commands with fixed-size replies (older Yaesu).
//! - [`CivEcho`]: Icom CI-V, where the bus echoes our own command before the
//!   rig's reply.

use rigport_core::trace::Encoding;

use crate::reader::Expect;

/// What a dialect decided about the current buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inspection {
    /// Apply the [`Expect`] rules to the buffer as it stands.
    Ready,
    /// A frame is in progress; not complete regardless of length.
    Hold,
    /// An echo was removed from the front of the buffer.
    EchoStripped(Vec<u8>),
}

/// Strategy for recognising frames of one protocol family.
pub trait FrameDialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// How payloads of this dialect are best shown in traces.
    fn encoding(&self) -> Encoding;

    /// Examine (and possibly trim) the accumulated buffer.
    fn inspect(&self, buf: &mut Vec<u8>) -> Inspection;

    /// Reply shape to wait for when a command has nothing more specific.
    fn reply_expect(&self) -> Expect;
}

/// Printable commands terminated by a sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsciiTerminated {
    pub terminator: Vec<u8>,
}

impl AsciiTerminated {
    pub fn new(terminator: &[u8]) -> Self {
        AsciiTerminated {
            terminator: terminator.to_vec(),
        }
    }

    /// Kenwood/Elecraft style `;` terminator.
    pub fn semicolon() -> Self {
        Self::new(b";")
    }
}

impl FrameDialect for AsciiTerminated {
    fn name(&self) -> &'static str {
        "ascii"
    }

    fn encoding(&self) -> Encoding {
        Encoding::Ascii
    }

    fn inspect(&self, _buf: &mut Vec<u8>) -> Inspection {
        Inspection::Ready
    }

    fn reply_expect(&self) -> Expect {
        Expect::terminator(&self.terminator)
    }
}

/// Binary commands answered with a fixed number of bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedLength {
    pub reply_len: usize,
}

impl FrameDialect for FixedLength {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn encoding(&self) -> Encoding {
        Encoding::Hex
    }

    fn inspect(&self, _buf: &mut Vec<u8>) -> Inspection {
        Inspection::Ready
    }

    fn reply_expect(&self) -> Expect {
        Expect::at_least(self.reply_len)
    }
}

/// CI-V frame preamble byte.
pub const PREAMBLE: u8 = 0xFE;

/// CI-V end-of-message byte.
pub const TERMINATOR: u8 = 0xFD;

/// Default CI-V address of the controlling computer.
pub const CONTROLLER_ADDR: u8 = 0xE0;

/// Icom CI-V with bus echo.
///
/// A buffer starting with `FE FE` is held open until `FD` is its last byte.
/// A frame whose source address (byte 3) is the host's own address is our
/// command coming back; it is discarded through its `FD` and accumulation
/// continues with whatever follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CivEcho {
    pub host_addr: u8,
}

impl Default for CivEcho {
    fn default() -> Self {
        CivEcho {
            host_addr: CONTROLLER_ADDR,
        }
    }
}

impl FrameDialect for CivEcho {
    fn name(&self) -> &'static str {
        "civ"
    }

    fn encoding(&self) -> Encoding {
        Encoding::Hex
    }

    fn inspect(&self, buf: &mut Vec<u8>) -> Inspection {
        if buf.len() < 2 || buf[0] != PREAMBLE || buf[1] != PREAMBLE {
            return Inspection::Ready;
        }

        if buf.len() > 3 && buf[3] == self.host_addr {
            if let Some(end) = buf.iter().position(|&b| b == TERMINATOR) {
                let echo: Vec<u8> = buf.drain(..=end).collect();
                return Inspection::EchoStripped(echo);
            }
        }

        if buf.last() != Some(&TERMINATOR) {
            return Inspection::Hold;
        }
        Inspection::Ready
    }

    fn reply_expect(&self) -> Expect {
        Expect::terminator(&[TERMINATOR])
    }
}
