//! Serial port configuration.
//!
//! [`PortConfig`] is the only persisted state in rigport. It can be built in
//! code with chained setters or loaded from a TOML document:
//!
//! ```toml
//! device = "/dev/ttyUSB0"
//! baud_rate = 38400
//! stop_bits = 1
//! flow_control = "none"
//! read_timeout_ms = 100
//! write_delay_ms = 0
//! post_write_delay_ms = 5
//! retries = 5
//!
//! [dtr]
//! idle_high = false
//! ptt = true
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::ControlLine;

/// Supported serial line speeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BaudRate {
    B300,
    B1200,
    B2400,
    B4800,
    B9600,
    B19200,
    B38400,
    B57600,
    B115200,
}

impl BaudRate {
    /// Every supported rate, slowest first.
    pub const ALL: [BaudRate; 9] = [
        BaudRate::B300,
        BaudRate::B1200,
        BaudRate::B2400,
        BaudRate::B4800,
        BaudRate::B9600,
        BaudRate::B19200,
        BaudRate::B38400,
        BaudRate::B57600,
        BaudRate::B115200,
    ];

    /// The rate in bits per second.
    pub fn as_u32(self) -> u32 {
        match self {
            BaudRate::B300 => 300,
            BaudRate::B1200 => 1200,
            BaudRate::B2400 => 2400,
            BaudRate::B4800 => 4800,
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115_200,
        }
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = Error;

    fn try_from(bps: u32) -> Result<Self> {
        BaudRate::ALL
            .into_iter()
            .find(|b| b.as_u32() == bps)
            .ok_or_else(|| Error::InvalidConfig(format!("unsupported baud rate {bps}")))
    }
}

impl From<BaudRate> for u32 {
    fn from(b: BaudRate) -> u32 {
        b.as_u32()
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Number of stop bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    #[default]
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = Error;

    fn try_from(n: u8) -> Result<Self> {
        match n {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            n => Err(Error::InvalidConfig(format!("unsupported stop bits {n}"))),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(s: StopBits) -> u8 {
        match s {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// Flow control discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    /// No flow control; RTS and DTR are free for PTT or fixed levels.
    #[default]
    None,
    /// RTS/CTS hardware handshake; RTS belongs to the UART.
    Hardware,
}

/// How one control line is driven.
///
/// `idle_high` is both the level applied right after open and the level
/// meaning "not transmitting" when the line is used for PTT. Asserting PTT
/// drives the opposite level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LineConfig {
    /// Level of the line at rest.
    pub idle_high: bool,
    /// Whether the line keys the transmitter.
    pub ptt: bool,
}

impl LineConfig {
    /// A line held at a fixed level and never toggled.
    pub const fn fixed(idle_high: bool) -> Self {
        LineConfig {
            idle_high,
            ptt: false,
        }
    }

    /// A line used as push-to-talk with the given resting level.
    pub const fn ptt(idle_high: bool) -> Self {
        LineConfig {
            idle_high,
            ptt: true,
        }
    }
}

/// Hardware and timing configuration for one serial port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// OS device path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub device: String,
    pub baud_rate: BaudRate,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    /// Deadline for one reply attempt.
    #[serde(rename = "read_timeout_ms", with = "millis")]
    pub read_timeout: Duration,
    /// Pause between bytes when pacing a command. Zero sends in one write.
    #[serde(rename = "write_delay_ms", with = "millis")]
    pub write_delay: Duration,
    /// Pause after a command is written, before reading.
    #[serde(rename = "post_write_delay_ms", with = "millis")]
    pub post_write_delay: Duration,
    /// Total attempts per command, first one included. Zero counts as one.
    pub retries: u32,
    pub rts: LineConfig,
    pub dtr: LineConfig,
}

impl Default for PortConfig {
    fn default() -> Self {
        PortConfig {
            device: "/dev/ttyUSB0".into(),
            baud_rate: BaudRate::B9600,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            read_timeout: Duration::from_millis(100),
            write_delay: Duration::ZERO,
            post_write_delay: Duration::ZERO,
            retries: 5,
            rts: LineConfig::default(),
            dtr: LineConfig::default(),
        }
    }
}

impl PortConfig {
    /// Default configuration for the given device.
    pub fn new(device: &str) -> Self {
        PortConfig {
            device: device.to_string(),
            ..PortConfig::default()
        }
    }

    pub fn baud_rate(mut self, baud: BaudRate) -> Self {
        self.baud_rate = baud;
        self
    }

    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn flow_control(mut self, flow: FlowControl) -> Self {
        self.flow_control = flow;
        self
    }

    pub fn rts(mut self, line: LineConfig) -> Self {
        self.rts = line;
        self
    }

    pub fn dtr(mut self, line: LineConfig) -> Self {
        self.dtr = line;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn post_write_delay(mut self, delay: Duration) -> Self {
        self.post_write_delay = delay;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Number of times a command is issued before giving up.
    pub fn attempts(&self) -> u32 {
        self.retries.max(1)
    }

    /// Configuration for a single control line.
    pub fn line(&self, line: ControlLine) -> &LineConfig {
        match line {
            ControlLine::Rts => &self.rts,
            ControlLine::Dtr => &self.dtr,
        }
    }

    /// Whether the UART owns this line for handshaking.
    pub fn consumed_by_flow_control(&self, line: ControlLine) -> bool {
        self.flow_control == FlowControl::Hardware && line == ControlLine::Rts
    }

    /// Lines that may be toggled for push-to-talk.
    pub fn ptt_lines(&self) -> impl Iterator<Item = ControlLine> + '_ {
        ControlLine::ALL
            .into_iter()
            .filter(|&l| self.line(l).ptt && !self.consumed_by_flow_control(l))
    }

    /// Check the configuration for contradictions.
    pub fn validate(&self) -> Result<()> {
        if self.device.trim().is_empty() {
            return Err(Error::InvalidConfig("device path is empty".into()));
        }
        if self.flow_control == FlowControl::Hardware && self.rts.ptt {
            return Err(Error::InvalidConfig(
                "RTS cannot be used for PTT with hardware flow control".into(),
            ));
        }
        if self.read_timeout.is_zero() {
            return Err(Error::InvalidConfig("read timeout must be non-zero".into()));
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: PortConfig =
            toml::from_str(s).map_err(|e| Error::InvalidConfig(e.message().to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as a TOML document.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::InvalidConfig(e.to_string()))
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
