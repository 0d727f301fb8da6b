//! Example rig drivers built on the rigport command engine.
//!
//! Each driver owns a [`RigIo`](rigport_io::RigIo) worker and implements the capability traits
//! from `rigport-core` for its rig family. They exist to exercise the three
//! framing dialects end to end:
//!
//! | Module      | Protocol                        | Dialect          |
//! |-------------|---------------------------------|------------------|
//! | [`kenwood`] | `;`-terminated ASCII (Elecraft K4 timing) | `AsciiTerminated` |
//! | [`icom`]    | CI-V binary with bus echo       | `CivEcho`        |
//! | [`yaesu`]   | FT-890 5-byte binary CAT        | `FixedLength`    |
//!
//! Drivers never touch the serial link. Every command is a
//! [`CommandFrame`](rigport_io::CommandFrame) plus an
//! [`Expect`](rigport_io::Expect) sent through the worker, and replies are
//! parsed here into typed values. A reply that arrives complete but cannot
//! be parsed is an [`Error::MalformedReply`].

pub mod icom;
pub mod kenwood;
pub mod yaesu;

use rigport_core::error::{Error, Result};
use rigport_core::trace::{Encoding, render};
use rigport_io::ReplyBuffer;

/// How a driver keys the transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PttMethod {
    /// A CAT command.
    #[default]
    Cat,
    /// The RTS/DTR lines designated as PTT in the port configuration.
    Line,
}

/// Reject a frequency the rig's frequency field cannot hold.
pub(crate) fn check_frequency(freq_hz: u64, limit_hz: u64, field: &str) -> Result<()> {
    if freq_hz >= limit_hz {
        return Err(Error::InvalidConfig(format!(
            "frequency {freq_hz} Hz does not fit {field}"
        )));
    }
    Ok(())
}

pub(crate) fn malformed(what: &str, reply: &ReplyBuffer, encoding: Encoding) -> Error {
    Error::MalformedReply(format!("{what}: {}", render(encoding, reply.as_bytes())))
}
