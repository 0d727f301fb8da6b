//! Yaesu FT-890 binary CAT driver.
//!
//! Every command is five bytes: four parameter bytes followed by an opcode.
//! Replies have a fixed length and no terminator, so they are framed purely
//! by byte count. The rig wants its commands paced a byte at a time and a
//! settle delay after each one; [`port_config`] carries those timings.
//!
//! Frequency and mode are read from the 18-byte status update (opcode
//! `0x10`, parameter `0x03`), which holds nine bytes per VFO.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use rigport_core::capability::{
    FrequencyControl, MeterReadable, ModeControl, PttControl, SplitControl,
};
use rigport_core::config::{BaudRate, PortConfig, StopBits};
use rigport_core::error::{Error, Result};
use rigport_core::trace::Encoding;
use rigport_core::types::{Mode, Vfo};
use rigport_io::{CommandFrame, Expect, FixedLength, FrameDialect, PortHandle, ReplyBuffer, RigIo};

use crate::{PttMethod, check_frequency, malformed};

const OP_SPLIT: u8 = 0x01;
const OP_SET_FREQ_A: u8 = 0x0A;
const OP_SET_FREQ_B: u8 = 0x8A;
const OP_SET_MODE: u8 = 0x0C;
const OP_PTT: u8 = 0x0F;
const OP_STATUS: u8 = 0x10;
const OP_METER: u8 = 0xF7;
const OP_FLAGS: u8 = 0xFA;

/// Status update parameter selecting both VFOs.
const STATUS_VFOS: u8 = 0x03;

const STATUS_LEN: usize = 18;
const FLAGS_LEN: usize = 5;
const METER_LEN: usize = 5;

/// Offset of the VFO-B record in the status update.
const VFO_B_OFFSET: usize = 9;

/// Meter readings run 0..=240 for full scale.
const METER_FULL_SCALE: f32 = 240.0;

/// Fixed reply time of the FT-890 CAT interface.
pub const REPLY_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial settings the FT-890 expects: 4800 baud, 8N2, 5 ms between bytes,
/// 50 ms after each command.
pub fn port_config(device: &str) -> PortConfig {
    PortConfig::new(device)
        .baud_rate(BaudRate::B4800)
        .stop_bits(StopBits::Two)
        .read_timeout(Duration::from_millis(50))
        .write_delay(Duration::from_millis(5))
        .post_write_delay(Duration::from_millis(50))
        .retries(2)
}

/// The framing used by this rig.
pub fn dialect() -> Arc<dyn FrameDialect> {
    Arc::new(FixedLength {
        reply_len: STATUS_LEN,
    })
}

fn command(params: [u8; 4], opcode: u8) -> CommandFrame {
    let [p1, p2, p3, p4] = params;
    CommandFrame::binary([p1, p2, p3, p4, opcode])
}

/// First frequency 8 digits of 10 Hz steps cannot hold.
const FREQ_LIMIT_HZ: u64 = 1_000_000_000;

/// Frequency in 10 Hz steps as 4 BCD bytes, least significant pair first.
/// Digits above the eighth are dropped.
pub fn freq_to_bcd(freq_hz: u64) -> [u8; 4] {
    let mut out = [0u8; 4];
    let mut f = freq_hz / 10;
    for byte in &mut out {
        let lo = (f % 10) as u8;
        f /= 10;
        let hi = (f % 10) as u8;
        f /= 10;
        *byte = (hi << 4) | lo;
    }
    out
}

/// Mode parameter for the set-mode command. Narrow variants are not used.
fn mode_param(mode: Mode) -> Option<u8> {
    match mode {
        Mode::LSB => Some(0),
        Mode::USB => Some(1),
        Mode::CW => Some(2),
        Mode::AM => Some(4),
        Mode::FM => Some(6),
        _ => None,
    }
}

/// Decode the mode byte of a status record.
fn status_mode(byte: u8) -> Option<Mode> {
    match byte & 0x07 {
        0 if byte & 0x40 != 0 => Some(Mode::USB),
        0 => Some(Mode::LSB),
        1 => Some(Mode::CW),
        2 => Some(Mode::AM),
        3 => Some(Mode::FM),
        _ => None,
    }
}

/// Frequency and mode of one VFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VfoStatus {
    pub freq_hz: u64,
    pub mode: Mode,
    /// Narrow filter selected.
    pub narrow: bool,
}

/// Parse the VFO record at `offset` of an 18-byte status update.
pub(crate) fn parse_status(reply: &ReplyBuffer, offset: usize) -> Result<VfoStatus> {
    let b = reply.as_bytes();
    if b.len() < STATUS_LEN {
        return Err(malformed("short status update", reply, Encoding::Hex));
    }
    let rec = &b[offset..offset + VFO_B_OFFSET];
    let freq_hz = 10 * (((rec[1] as u64) << 16) | ((rec[2] as u64) << 8) | rec[3] as u64);
    let mode = status_mode(rec[6])
        .ok_or_else(|| malformed("unknown mode in status update", reply, Encoding::Hex))?;
    Ok(VfoStatus {
        freq_hz,
        mode,
        narrow: rec[0] & 0x01 != 0,
    })
}

fn vfo_offset(vfo: Vfo) -> usize {
    match vfo {
        Vfo::A => 0,
        Vfo::B => VFO_B_OFFSET,
    }
}

pub struct Ft890Rig {
    io: RigIo,
    ptt: PttMethod,
}

impl Ft890Rig {
    pub fn new(io: RigIo) -> Self {
        Ft890Rig {
            io,
            ptt: PttMethod::Cat,
        }
    }

    pub fn ptt_method(mut self, method: PttMethod) -> Self {
        self.ptt = method;
        self
    }

    pub fn io(&self) -> &RigIo {
        &self.io
    }

    pub async fn shutdown(self) -> Result<PortHandle> {
        self.io.shutdown().await
    }

    async fn read(&self, frame: CommandFrame, len: usize) -> Result<ReplyBuffer> {
        let expect = Expect::at_least(len).within(REPLY_TIMEOUT);
        self.io.execute(frame, expect).await
    }

    async fn send(&self, frame: CommandFrame) -> Result<()> {
        self.io.execute(frame, Expect::none()).await.map(|_| ())
    }

    /// Read frequency and mode of `vfo` from a status update.
    pub async fn status(&self, vfo: Vfo) -> Result<VfoStatus> {
        let reply = self
            .read(command([0, 0, 0, STATUS_VFOS], OP_STATUS), STATUS_LEN)
            .await?;
        parse_status(&reply, vfo_offset(vfo))
    }

    async fn flags(&self) -> Result<[u8; FLAGS_LEN]> {
        let reply = self.read(command([0; 4], OP_FLAGS), FLAGS_LEN).await?;
        reply.as_bytes()[..]
            .try_into()
            .map_err(|_| malformed("flag bytes", &reply, Encoding::Hex))
    }

    async fn meter(&self) -> Result<[u8; METER_LEN]> {
        let reply = self.read(command([0; 4], OP_METER), METER_LEN).await?;
        reply.as_bytes()[..]
            .try_into()
            .map_err(|_| malformed("meter bytes", &reply, Encoding::Hex))
    }
}

#[async_trait]
impl FrequencyControl for Ft890Rig {
    async fn get_frequency(&self, vfo: Vfo) -> Result<u64> {
        Ok(self.status(vfo).await?.freq_hz)
    }

    async fn set_frequency(&self, vfo: Vfo, freq_hz: u64) -> Result<()> {
        check_frequency(freq_hz, FREQ_LIMIT_HZ, "8 BCD digits of 10 Hz")?;
        let opcode = match vfo {
            Vfo::A => OP_SET_FREQ_A,
            Vfo::B => OP_SET_FREQ_B,
        };
        self.send(command(freq_to_bcd(freq_hz), opcode)).await
    }
}

#[async_trait]
impl ModeControl for Ft890Rig {
    async fn get_mode(&self, vfo: Vfo) -> Result<Mode> {
        Ok(self.status(vfo).await?.mode)
    }

    async fn set_mode(&self, vfo: Vfo, mode: Mode) -> Result<()> {
        let mut param =
            mode_param(mode).ok_or_else(|| Error::Unsupported(format!("mode {mode}")))?;
        if vfo == Vfo::B {
            param |= 0x80;
        }
        self.send(command([0, 0, 0, param], OP_SET_MODE)).await
    }
}

#[async_trait]
impl PttControl for Ft890Rig {
    async fn get_ptt(&self) -> Result<bool> {
        if self.ptt == PttMethod::Line {
            return self.io.get_ptt().await;
        }
        Ok(self.flags().await?[2] & 0x80 != 0)
    }

    async fn set_ptt(&self, on: bool) -> Result<()> {
        match self.ptt {
            PttMethod::Line => self.io.set_ptt(on).await,
            PttMethod::Cat => self.send(command([0, 0, 0, on as u8], OP_PTT)).await,
        }
    }
}

#[async_trait]
impl MeterReadable for Ft890Rig {
    async fn get_s_meter(&self) -> Result<f32> {
        let m = self.meter().await?;
        Ok((m[METER_LEN - 2] as f32 / METER_FULL_SCALE).min(1.0))
    }

    /// Only meaningful while transmitting.
    async fn get_power_meter(&self) -> Result<f32> {
        let m = self.meter().await?;
        Ok((m[0] as f32 / METER_FULL_SCALE).min(1.0))
    }
}

#[async_trait]
impl SplitControl for Ft890Rig {
    async fn get_split(&self) -> Result<bool> {
        Ok(self.flags().await?[0] & 0x04 != 0)
    }

    async fn set_split(&self, on: bool) -> Result<()> {
        self.send(command([0, 0, 0, on as u8], OP_SPLIT)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigport_io::{CommandEngine, spawn_worker};
    use rigport_test_harness::{MockEvent, MockOpener, MockPort};
    use tokio::time::Instant;

    /// VFO-A 5.000 MHz CW, VFO-B 5.000 MHz FM.
    const STATUS: [u8; 18] = [
        0x08, 0x07, 0xA1, 0x20, 0x00, 0x00, 0x01, 0x04, 0x04, //
        0x08, 0x07, 0xA1, 0x20, 0x00, 0x00, 0x03, 0x04, 0x85,
    ];

    const READ_STATUS: [u8; 5] = [0x00, 0x00, 0x00, 0x03, 0x10];

    async fn rig(mock: &MockPort) -> Ft890Rig {
        let handle = PortHandle::attach(Box::new(mock.clone()), port_config("/dev/mock"))
            .await
            .unwrap();
        let io = spawn_worker(
            handle,
            CommandEngine::new(dialect()),
            Arc::new(MockOpener::new(mock.clone())),
        );
        Ft890Rig::new(io)
    }

    fn reply(bytes: &[u8]) -> ReplyBuffer {
        ReplyBuffer {
            bytes: bytes.to_vec(),
            attempt: 1,
        }
    }

    #[test]
    fn status_parsing() {
        let a = parse_status(&reply(&STATUS), 0).unwrap();
        assert_eq!(a.freq_hz, 5_000_000);
        assert_eq!(a.mode, Mode::CW);
        assert!(!a.narrow);

        let b = parse_status(&reply(&STATUS), VFO_B_OFFSET).unwrap();
        assert_eq!(b.mode, Mode::FM);

        assert!(matches!(
            parse_status(&reply(&STATUS[..10]), 0),
            Err(Error::MalformedReply(_))
        ));
    }

    #[test]
    fn sideband_from_mode_byte() {
        assert_eq!(status_mode(0x00), Some(Mode::LSB));
        assert_eq!(status_mode(0x40), Some(Mode::USB));
        assert_eq!(status_mode(0x02), Some(Mode::AM));
        assert_eq!(status_mode(0x05), None);
    }

    #[test]
    fn frequency_bcd_drops_units() {
        assert_eq!(freq_to_bcd(14_070_000), [0x00, 0x70, 0x40, 0x01]);
        assert_eq!(freq_to_bcd(7_030_005), [0x00, 0x30, 0x70, 0x00]);
    }

    #[tokio::test(start_paused = true)]
    async fn status_read_is_paced() {
        let mock = MockPort::new();
        mock.expect_delayed(&READ_STATUS, Duration::from_millis(5), &STATUS);
        let rig = rig(&mock).await;

        let start = Instant::now();
        assert_eq!(rig.get_frequency(Vfo::A).await.unwrap(), 5_000_000);

        // Five single-byte writes, 5 ms apart.
        let writes: Vec<_> = mock
            .events()
            .into_iter()
            .filter_map(|e| match e {
                MockEvent::Write { at, bytes } => Some((at - start, bytes)),
                _ => None,
            })
            .collect();
        assert_eq!(writes.len(), 5);
        assert!(writes.iter().all(|(_, b)| b.len() == 1));
        assert_eq!(writes[4].0, Duration::from_millis(20));
        // 25 ms of pacing plus 50 ms settle before the read starts.
        assert!(start.elapsed() >= Duration::from_millis(75));
    }

    #[tokio::test(start_paused = true)]
    async fn short_status_times_out_after_two_attempts() {
        let mock = MockPort::new();
        mock.expect(&READ_STATUS, &STATUS[..9]);
        mock.expect(&READ_STATUS, &STATUS[..9]);
        let rig = rig(&mock).await;

        assert!(matches!(
            rig.get_mode(Vfo::B).await,
            Err(Error::TimedOut)
        ));
        assert_eq!(mock.remaining_expectations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn set_commands() {
        let mock = MockPort::new();
        mock.expect(&[0x00, 0x70, 0x40, 0x01, OP_SET_FREQ_A], b"");
        mock.expect(&[0x00, 0x00, 0x00, 0x81, OP_SET_MODE], b"");
        mock.expect(&[0x00, 0x00, 0x00, 0x01, OP_SPLIT], b"");
        mock.expect(&[0x00, 0x00, 0x00, 0x01, OP_PTT], b"");
        let rig = rig(&mock).await;

        rig.set_frequency(Vfo::A, 14_070_000).await.unwrap();
        rig.set_mode(Vfo::B, Mode::USB).await.unwrap();
        rig.set_split(true).await.unwrap();
        rig.set_ptt(true).await.unwrap();
        assert_eq!(mock.remaining_expectations(), 0);

        assert!(matches!(
            rig.set_mode(Vfo::A, Mode::RTTY).await,
            Err(Error::Unsupported(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn set_frequency_at_or_above_one_gigahertz_is_refused() {
        let mock = MockPort::new();
        let rig = rig(&mock).await;

        // Would key the rig to 234.567890 MHz.
        assert!(matches!(
            rig.set_frequency(Vfo::A, 1_234_567_890).await,
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            rig.set_frequency(Vfo::B, 1_000_000_000).await,
            Err(Error::InvalidConfig(_))
        ));
        assert_eq!(mock.write_count(), 0);

        mock.expect(&[0x99, 0x99, 0x99, 0x99, OP_SET_FREQ_A], b"");
        rig.set_frequency(Vfo::A, 999_999_990).await.unwrap();
        assert_eq!(mock.remaining_expectations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn flags_and_meter() {
        let mock = MockPort::new();
        mock.expect(&[0, 0, 0, 0, OP_FLAGS], &[0x04, 0xFF, 0x80, 0xFF, 0xFF]);
        mock.expect(&[0, 0, 0, 0, OP_FLAGS], &[0x04, 0xFF, 0x80, 0xFF, 0xFF]);
        mock.expect(&[0, 0, 0, 0, OP_METER], &[0x00, 0x00, 0x00, 120, OP_METER]);
        let rig = rig(&mock).await;

        assert!(rig.get_split().await.unwrap());
        assert!(rig.get_ptt().await.unwrap());
        assert!((rig.get_s_meter().await.unwrap() - 0.5).abs() < f32::EPSILON);
    }
}
