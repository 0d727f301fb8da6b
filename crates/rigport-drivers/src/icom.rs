//! Icom CI-V driver.
//!
//! CI-V frames are `FE FE <dst> <src> <cmd> [<sub>] [<data>...] FD`. On the
//! shared bus every command we send comes back to us before the rig answers;
//! the [`CivEcho`] dialect strips that echo so replies here always start with
//! the rig's own frame.
//!
//! Set commands are answered with `FB` (ACK) or `FA` (NAK) frames, which is
//! why they wait on an alternative terminator.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};

use rigport_core::capability::{
    FrequencyControl, MeterReadable, ModeControl, PttControl, SplitControl,
};
use rigport_core::error::{Error, Result};
use rigport_core::trace::Encoding;
use rigport_core::types::{Mode, Vfo};
use rigport_io::dialect::{CONTROLLER_ADDR, PREAMBLE, TERMINATOR};
use rigport_io::{CivEcho, CommandFrame, Expect, FrameDialect, PortHandle, ReplyBuffer, RigIo};

use crate::{PttMethod, check_frequency, malformed};

/// Positive acknowledgement.
pub const ACK: u8 = 0xFB;

/// Negative acknowledgement.
pub const NAK: u8 = 0xFA;

const CMD_READ_FREQ: u8 = 0x03;
const CMD_READ_MODE: u8 = 0x04;
const CMD_SET_FREQ: u8 = 0x05;
const CMD_SET_MODE: u8 = 0x06;
const CMD_SPLIT: u8 = 0x0F;
const CMD_METER: u8 = 0x15;
const CMD_PTT: u8 = 0x1C;
/// Selected/unselected VFO frequency.
const CMD_VFO_FREQ: u8 = 0x25;

const SUB_S_METER: u8 = 0x02;
const SUB_POWER_METER: u8 = 0x11;
const SUB_SWR_METER: u8 = 0x12;
const SUB_PTT: u8 = 0x00;

/// Default filter passed with mode changes.
const FILTER_1: u8 = 0x01;

/// Mode bytes for commands 0x04/0x06.
const MODE_CODES: [(Mode, u8); 8] = [
    (Mode::LSB, 0x00),
    (Mode::USB, 0x01),
    (Mode::AM, 0x02),
    (Mode::CW, 0x03),
    (Mode::RTTY, 0x04),
    (Mode::FM, 0x05),
    (Mode::CWR, 0x07),
    (Mode::RTTYR, 0x08),
];

/// CI-V mode byte for `mode`, if the rig has one.
pub fn mode_code(mode: Mode) -> Option<u8> {
    MODE_CODES.iter().find(|(m, _)| *m == mode).map(|(_, c)| *c)
}

/// Encode a frame from the controller to the rig at `dst_addr`.
pub fn encode_frame(dst_addr: u8, cmd: u8, sub_cmd: Option<u8>, data: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(6 + sub_cmd.is_some() as usize + data.len());
    buf.put_u8(PREAMBLE);
    buf.put_u8(PREAMBLE);
    buf.put_u8(dst_addr);
    buf.put_u8(CONTROLLER_ADDR);
    buf.put_u8(cmd);
    if let Some(sub) = sub_cmd {
        buf.put_u8(sub);
    }
    buf.put_slice(data);
    buf.put_u8(TERMINATOR);
    buf.to_vec()
}

/// First frequency 5 BCD bytes cannot hold.
const FREQ_LIMIT_HZ: u64 = 10_000_000_000;

/// Frequency in hertz as 5 BCD bytes, least significant pair first.
/// Digits above the tenth are dropped.
pub fn freq_to_bcd(freq_hz: u64) -> [u8; 5] {
    let mut out = [0u8; 5];
    let mut f = freq_hz;
    for byte in &mut out {
        let lo = (f % 10) as u8;
        f /= 10;
        let hi = (f % 10) as u8;
        f /= 10;
        *byte = (hi << 4) | lo;
    }
    out
}

/// Inverse of [`freq_to_bcd`]. Fails on a nibble above 9.
pub fn bcd_to_freq(bcd: &[u8]) -> Result<u64> {
    let mut freq = 0u64;
    for &byte in bcd.iter().rev() {
        let hi = byte >> 4;
        let lo = byte & 0x0F;
        if hi > 9 || lo > 9 {
            return Err(Error::MalformedReply(format!(
                "invalid BCD byte 0x{byte:02X}"
            )));
        }
        freq = freq * 100 + (hi as u64) * 10 + lo as u64;
    }
    Ok(freq)
}

/// Decode a 2-byte big-endian BCD meter value (0000..=0255).
fn bcd_meter(data: &[u8]) -> Result<u16> {
    let [hi, lo] = data else {
        return Err(Error::MalformedReply(format!(
            "expected 2 meter bytes, got {}",
            data.len()
        )));
    };
    let digits = [hi >> 4, hi & 0x0F, lo >> 4, lo & 0x0F];
    if digits.iter().any(|&d| d > 9) {
        return Err(Error::MalformedReply(format!(
            "invalid BCD meter {hi:02X} {lo:02X}"
        )));
    }
    Ok(digits.iter().fold(0u16, |acc, &d| acc * 10 + d as u16))
}

/// The framing used by this family.
pub fn dialect() -> Arc<dyn FrameDialect> {
    Arc::new(CivEcho::default())
}

pub struct IcomRig {
    io: RigIo,
    addr: u8,
    ptt: PttMethod,
}

impl IcomRig {
    /// A driver for the rig at CI-V address `addr` (e.g. `0x94` for IC-7300).
    pub fn new(io: RigIo, addr: u8) -> Self {
        IcomRig {
            io,
            addr,
            ptt: PttMethod::Cat,
        }
    }

    pub fn ptt_method(mut self, method: PttMethod) -> Self {
        self.ptt = method;
        self
    }

    pub fn addr(&self) -> u8 {
        self.addr
    }

    pub fn io(&self) -> &RigIo {
        &self.io
    }

    pub async fn shutdown(self) -> Result<PortHandle> {
        self.io.shutdown().await
    }

    /// Send a read command and return the data after `cmd` and `sub`.
    async fn read(&self, cmd: u8, sub: Option<u8>) -> Result<Vec<u8>> {
        let frame = CommandFrame::binary(encode_frame(self.addr, cmd, sub, &[]));
        let reply = self
            .io
            .execute(frame, Expect::terminator(&[TERMINATOR]))
            .await?;
        self.payload(&reply, cmd, sub)
    }

    /// Send a set command and wait for ACK.
    async fn set(&self, cmd: u8, sub: Option<u8>, data: &[u8]) -> Result<()> {
        let frame = CommandFrame::binary(encode_frame(self.addr, cmd, sub, data));
        let expect = Expect::terminator(&[ACK, TERMINATOR]).or_terminator(&[NAK, TERMINATOR]);
        let reply = self.io.execute(frame, expect).await?;
        match self.body(&reply)? {
            [ACK] => Ok(()),
            [NAK] => Err(malformed("rig refused command (NAK)", &reply, Encoding::Hex)),
            _ => Err(malformed("expected ACK", &reply, Encoding::Hex)),
        }
    }

    /// Everything between the addresses and the terminator of a reply from
    /// this rig to us.
    fn body<'a>(&self, reply: &'a ReplyBuffer) -> Result<&'a [u8]> {
        match reply.as_bytes() {
            [PREAMBLE, PREAMBLE, dst, src, body @ .., TERMINATOR]
                if *dst == CONTROLLER_ADDR && *src == self.addr && !body.is_empty() =>
            {
                Ok(body)
            }
            _ => Err(malformed("not a CI-V reply from the rig", reply, Encoding::Hex)),
        }
    }

    fn payload(&self, reply: &ReplyBuffer, cmd: u8, sub: Option<u8>) -> Result<Vec<u8>> {
        let body = self.body(reply)?;
        if body == [NAK] {
            return Err(malformed("rig refused command (NAK)", reply, Encoding::Hex));
        }
        let header_len = 1 + sub.is_some() as usize;
        let header_ok = body.len() >= header_len
            && body[0] == cmd
            && sub.is_none_or(|s| body[1] == s);
        if !header_ok {
            return Err(malformed(
                &format!("reply to command 0x{cmd:02X} expected"),
                reply,
                Encoding::Hex,
            ));
        }
        Ok(body[header_len..].to_vec())
    }
}

#[async_trait]
impl FrequencyControl for IcomRig {
    async fn get_frequency(&self, vfo: Vfo) -> Result<u64> {
        let data = match vfo {
            Vfo::A => self.read(CMD_READ_FREQ, None).await?,
            Vfo::B => self.read(CMD_VFO_FREQ, Some(0x01)).await?,
        };
        if data.len() != 5 {
            return Err(Error::MalformedReply(format!(
                "expected 5 BCD frequency bytes, got {}",
                data.len()
            )));
        }
        bcd_to_freq(&data)
    }

    async fn set_frequency(&self, vfo: Vfo, freq_hz: u64) -> Result<()> {
        check_frequency(freq_hz, FREQ_LIMIT_HZ, "10 BCD digits")?;
        let bcd = freq_to_bcd(freq_hz);
        match vfo {
            Vfo::A => self.set(CMD_SET_FREQ, None, &bcd).await,
            Vfo::B => self.set(CMD_VFO_FREQ, Some(0x01), &bcd).await,
        }
    }
}

#[async_trait]
impl ModeControl for IcomRig {
    async fn get_mode(&self, vfo: Vfo) -> Result<Mode> {
        if vfo == Vfo::B {
            return Err(Error::Unsupported("VFO-B mode readback".into()));
        }
        let data = self.read(CMD_READ_MODE, None).await?;
        let code = data
            .first()
            .ok_or_else(|| Error::MalformedReply("empty mode reply".into()))?;
        MODE_CODES
            .iter()
            .find(|(_, c)| c == code)
            .map(|(m, _)| *m)
            .ok_or_else(|| Error::MalformedReply(format!("unknown mode byte 0x{code:02X}")))
    }

    async fn set_mode(&self, vfo: Vfo, mode: Mode) -> Result<()> {
        if vfo == Vfo::B {
            return Err(Error::Unsupported("VFO-B mode selection".into()));
        }
        let Some(code) = mode_code(mode) else {
            return Err(Error::Unsupported(format!("mode {mode}")));
        };
        self.set(CMD_SET_MODE, None, &[code, FILTER_1]).await
    }
}

#[async_trait]
impl PttControl for IcomRig {
    async fn get_ptt(&self) -> Result<bool> {
        if self.ptt == PttMethod::Line {
            return self.io.get_ptt().await;
        }
        let data = self.read(CMD_PTT, Some(SUB_PTT)).await?;
        match data.as_slice() {
            [0x00] => Ok(false),
            [0x01] => Ok(true),
            other => Err(Error::MalformedReply(format!("unexpected PTT data {other:02X?}"))),
        }
    }

    async fn set_ptt(&self, on: bool) -> Result<()> {
        match self.ptt {
            PttMethod::Line => self.io.set_ptt(on).await,
            PttMethod::Cat => self.set(CMD_PTT, Some(SUB_PTT), &[on as u8]).await,
        }
    }
}

#[async_trait]
impl MeterReadable for IcomRig {
    async fn get_s_meter(&self) -> Result<f32> {
        let data = self.read(CMD_METER, Some(SUB_S_METER)).await?;
        Ok(bcd_meter(&data)? as f32 / 255.0)
    }

    async fn get_power_meter(&self) -> Result<f32> {
        let data = self.read(CMD_METER, Some(SUB_POWER_METER)).await?;
        Ok(bcd_meter(&data)? as f32 / 255.0)
    }

    /// Meter 0 is 1:1, 48 is 1.5:1, 80 is 2:1 and 120 is 3:1; interpolated
    /// linearly between those points.
    async fn get_swr(&self) -> Result<f32> {
        let data = self.read(CMD_METER, Some(SUB_SWR_METER)).await?;
        let raw = bcd_meter(&data)? as f32;
        let swr = if raw <= 48.0 {
            1.0 + raw / 48.0 * 0.5
        } else if raw <= 80.0 {
            1.5 + (raw - 48.0) / 32.0 * 0.5
        } else {
            2.0 + (raw - 80.0) / 40.0
        };
        Ok(swr)
    }
}

#[async_trait]
impl SplitControl for IcomRig {
    async fn get_split(&self) -> Result<bool> {
        let data = self.read(CMD_SPLIT, None).await?;
        match data.as_slice() {
            [0x00] => Ok(false),
            [0x01] => Ok(true),
            other => Err(Error::MalformedReply(format!("unexpected split data {other:02X?}"))),
        }
    }

    async fn set_split(&self, on: bool) -> Result<()> {
        self.set(CMD_SPLIT, None, &[on as u8]).await
    }
}
