//! Diagnostic trace of bytes crossing the serial link.
//!
//! The reader and writer report every frame to a [`TraceSink`]. The default
//! [`TracingSink`] forwards to `tracing` at DEBUG level; tests use a
//! recording sink to assert on what was seen.

use std::fmt;
use std::fmt::Write as _;

/// Which way the bytes travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Host to device.
    Write,
    /// Device to host.
    Read,
    /// The device's copy of our own command, discarded before the reply.
    Echo,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Write => write!(f, "write"),
            Direction::Read => write!(f, "read"),
            Direction::Echo => write!(f, "echo"),
        }
    }
}

/// How a payload should be rendered for humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Ascii,
    Hex,
}

impl Encoding {
    /// Hex if any byte is neither printable ASCII nor CR/LF.
    pub fn detect(bytes: &[u8]) -> Encoding {
        let printable = bytes
            .iter()
            .all(|&b| (0x20..=0x7E).contains(&b) || b == b'\r' || b == b'\n');
        if printable {
            Encoding::Ascii
        } else {
            Encoding::Hex
        }
    }
}

/// Render a payload, e.g. `FE FE 94 E0 03 FD` or `FA00014070000;<cr>`.
pub fn render(encoding: Encoding, bytes: &[u8]) -> String {
    match encoding {
        Encoding::Hex => {
            let mut out = String::with_capacity(bytes.len() * 3);
            for (i, b) in bytes.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                let _ = write!(out, "{b:02X}");
            }
            out
        }
        Encoding::Ascii => String::from_utf8_lossy(bytes)
            .replace('\r', "<cr>")
            .replace('\n', "<lf>"),
    }
}

/// Receiver of link traffic.
pub trait TraceSink: Send + Sync {
    fn record(&self, direction: Direction, encoding: Encoding, label: &str, bytes: &[u8]);
}

/// Forwards traffic to `tracing` at DEBUG level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn record(&self, direction: Direction, encoding: Encoding, label: &str, bytes: &[u8]) {
        tracing::debug!(
            label,
            %direction,
            len = bytes.len(),
            "{}",
            render(encoding, bytes)
        );
    }
}

/// Drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl TraceSink for NullSink {
    fn record(&self, _: Direction, _: Encoding, _: &str, _: &[u8]) {}
}
