//! Small value types shared by the port layer and the rig drivers.

use std::fmt;
use std::str::FromStr;

/// A hardware handshake line on the serial port.
///
/// Either line may be repurposed as a push-to-talk signal, or (for RTS)
/// consumed by hardware flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlLine {
    /// Request To Send.
    Rts,
    /// Data Terminal Ready.
    Dtr,
}

impl ControlLine {
    /// Both lines, RTS first.
    pub const ALL: [ControlLine; 2] = [ControlLine::Rts, ControlLine::Dtr];
}

impl fmt::Display for ControlLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlLine::Rts => write!(f, "RTS"),
            ControlLine::Dtr => write!(f, "DTR"),
        }
    }
}

impl FromStr for ControlLine {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "RTS" => Ok(ControlLine::Rts),
            "DTR" => Ok(ControlLine::Dtr),
            _ => Err(format!("unknown control line: {s}")),
        }
    }
}

/// Receiver selector for rigs with two VFOs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Vfo {
    /// VFO A (main).
    #[default]
    A,
    /// VFO B (sub).
    B,
}

impl fmt::Display for Vfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vfo::A => write!(f, "VFO-A"),
            Vfo::B => write!(f, "VFO-B"),
        }
    }
}

/// Operating mode of the transceiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Upper sideband voice.
    USB,
    /// Lower sideband voice.
    LSB,
    /// CW, upper sideband offset.
    CW,
    /// CW reverse.
    CWR,
    /// Amplitude modulation.
    AM,
    /// Frequency modulation.
    FM,
    /// Radio teletype (FSK).
    RTTY,
    /// Radio teletype, reverse.
    RTTYR,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::USB => "USB",
            Mode::LSB => "LSB",
            Mode::CW => "CW",
            Mode::CWR => "CWR",
            Mode::AM => "AM",
            Mode::FM => "FM",
            Mode::RTTY => "RTTY",
            Mode::RTTYR => "RTTYR",
        };
        write!(f, "{s}")
    }
}

/// Error returned when a string cannot be parsed into a [`Mode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseModeError(String);

impl fmt::Display for ParseModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown mode: {}", self.0)
    }
}

impl std::error::Error for ParseModeError {}

impl FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "USB" => Ok(Mode::USB),
            "LSB" => Ok(Mode::LSB),
            "CW" => Ok(Mode::CW),
            "CWR" | "CW-R" => Ok(Mode::CWR),
            "AM" => Ok(Mode::AM),
            "FM" => Ok(Mode::FM),
            "RTTY" => Ok(Mode::RTTY),
            "RTTYR" | "RTTY-R" => Ok(Mode::RTTYR),
            _ => Err(ParseModeError(s.to_string())),
        }
    }
}
