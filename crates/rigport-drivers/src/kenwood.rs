//! Kenwood-style ASCII CAT driver.
//!
//! Commands are two-letter prefixes with ASCII parameters terminated by `;`.
//! Timing and reply lengths follow the Elecraft K4, which answers within
//! 800 ms and returns 11-digit frequencies (`FA00014070000;`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use rigport_core::capability::{
    FrequencyControl, MeterReadable, ModeControl, PttControl, SplitControl,
};
use rigport_core::error::{Error, Result};
use rigport_core::trace::Encoding;
use rigport_core::types::{Mode, Vfo};
use rigport_io::{AsciiTerminated, CommandFrame, Expect, FrameDialect, PortHandle, RigIo};

use crate::{PttMethod, check_frequency, malformed};

/// How long the rig may take to answer a query.
pub const REPLY_TIMEOUT: Duration = Duration::from_millis(800);

/// `FA` + 11 digits + `;`.
const FREQ_REPLY_LEN: usize = 14;

/// First frequency the 11-digit field cannot hold.
const FREQ_LIMIT_HZ: u64 = 100_000_000_000;

/// Highest raw S-meter reading (`SM0nnnn;`).
const S_METER_FULL_SCALE: f32 = 30.0;

/// Mode codes used by `MD`. 8 is unassigned.
const MODE_CODES: [(Mode, char); 8] = [
    (Mode::LSB, '1'),
    (Mode::USB, '2'),
    (Mode::CW, '3'),
    (Mode::FM, '4'),
    (Mode::AM, '5'),
    (Mode::RTTY, '6'),
    (Mode::CWR, '7'),
    (Mode::RTTYR, '9'),
];

fn mode_code(mode: Mode) -> char {
    MODE_CODES
        .iter()
        .find(|(m, _)| *m == mode)
        .map(|(_, c)| *c)
        .unwrap_or('2')
}

fn code_mode(code: char) -> Option<Mode> {
    MODE_CODES.iter().find(|(_, c)| *c == code).map(|(m, _)| *m)
}

fn freq_prefix(vfo: Vfo) -> &'static str {
    match vfo {
        Vfo::A => "FA",
        Vfo::B => "FB",
    }
}

/// The parameter text of the last `prefix...;` response in `reply`.
fn field<'a>(reply: &'a str, prefix: &str) -> Option<&'a str> {
    let start = reply.rfind(prefix)? + prefix.len();
    let rest = &reply[start..];
    let end = rest.find(';')?;
    Some(&rest[..end])
}

/// The framing used by this family.
pub fn dialect() -> Arc<dyn FrameDialect> {
    Arc::new(AsciiTerminated::semicolon())
}

pub struct KenwoodRig {
    io: RigIo,
    ptt: PttMethod,
}

impl KenwoodRig {
    pub fn new(io: RigIo) -> Self {
        KenwoodRig {
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

    /// Stop the worker and recover the closed port handle.
    pub async fn shutdown(self) -> Result<PortHandle> {
        self.io.shutdown().await
    }

    /// Send a query and return the reply text.
    async fn query(&self, cmd: &str, reply_len: usize) -> Result<String> {
        let expect = Expect::terminator(b";")
            .with_len(reply_len)
            .within(REPLY_TIMEOUT);
        let reply = self.io.execute(CommandFrame::ascii(cmd), expect).await?;
        let text = reply.as_str()?;
        if text.ends_with("?;") {
            return Err(malformed(&format!("{cmd} rejected"), &reply, Encoding::Ascii));
        }
        Ok(text.to_string())
    }

    /// Send a command that has no reply.
    async fn send(&self, cmd: &str) -> Result<()> {
        self.io
            .execute(CommandFrame::ascii(cmd), Expect::none())
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl FrequencyControl for KenwoodRig {
    async fn get_frequency(&self, vfo: Vfo) -> Result<u64> {
        let prefix = freq_prefix(vfo);
        let reply = self.query(&format!("{prefix};"), FREQ_REPLY_LEN).await?;
        parse_frequency(&reply, prefix)
    }

    async fn set_frequency(&self, vfo: Vfo, freq_hz: u64) -> Result<()> {
        check_frequency(freq_hz, FREQ_LIMIT_HZ, "11 digits")?;
        self.send(&format!("{}{freq_hz:011};", freq_prefix(vfo)))
            .await
    }
}

pub(crate) fn parse_frequency(reply: &str, prefix: &str) -> Result<u64> {
    let digits = field(reply, prefix)
        .filter(|d| d.len() == 11)
        .ok_or_else(|| Error::MalformedReply(format!("expected {prefix} + 11 digits: {reply:?}")))?;
    digits
        .parse()
        .map_err(|e| Error::MalformedReply(format!("invalid frequency digits {digits:?}: {e}")))
}

#[async_trait]
impl ModeControl for KenwoodRig {
    async fn get_mode(&self, vfo: Vfo) -> Result<Mode> {
        let (cmd, prefix) = match vfo {
            Vfo::A => ("MD;", "MD"),
            Vfo::B => ("MD$;", "MD$"),
        };
        let reply = self.query(cmd, prefix.len() + 2).await?;
        parse_mode(&reply, prefix)
    }

    async fn set_mode(&self, vfo: Vfo, mode: Mode) -> Result<()> {
        let prefix = match vfo {
            Vfo::A => "MD",
            Vfo::B => "MD$",
        };
        self.send(&format!("{prefix}{};", mode_code(mode))).await
    }
}

pub(crate) fn parse_mode(reply: &str, prefix: &str) -> Result<Mode> {
    field(reply, prefix)
        .and_then(|d| d.chars().next())
        .and_then(code_mode)
        .ok_or_else(|| Error::MalformedReply(format!("unknown mode reply: {reply:?}")))
}

#[async_trait]
impl PttControl for KenwoodRig {
    async fn get_ptt(&self) -> Result<bool> {
        if self.ptt == PttMethod::Line {
            return self.io.get_ptt().await;
        }
        let reply = self.query("TQ;", 4).await?;
        match field(&reply, "TQ") {
            Some("0") => Ok(false),
            Some("1") => Ok(true),
            _ => Err(Error::MalformedReply(format!("unexpected TQ reply: {reply:?}"))),
        }
    }

    async fn set_ptt(&self, on: bool) -> Result<()> {
        match self.ptt {
            PttMethod::Line => self.io.set_ptt(on).await,
            PttMethod::Cat => self.send(if on { "TX;" } else { "RX;" }).await,
        }
    }
}

#[async_trait]
impl MeterReadable for KenwoodRig {
    async fn get_s_meter(&self) -> Result<f32> {
        let reply = self.query("SM0;", 8).await?;
        let raw: u16 = field(&reply, "SM0")
            .filter(|d| d.len() == 4)
            .and_then(|d| d.parse().ok())
            .ok_or_else(|| Error::MalformedReply(format!("unexpected SM reply: {reply:?}")))?;
        Ok((raw as f32 / S_METER_FULL_SCALE).min(1.0))
    }
}

#[async_trait]
impl SplitControl for KenwoodRig {
    /// Reads the split flag from the 38-byte `IF;` status reply.
    async fn get_split(&self) -> Result<bool> {
        let reply = self.query("IF;", 38).await?;
        let status = field(&reply, "IF")
            .filter(|d| d.len() >= 31)
            .ok_or_else(|| Error::MalformedReply(format!("short IF reply: {reply:?}")))?;
        match status.as_bytes()[30] {
            b'0' => Ok(false),
            b'1' => Ok(true),
            other => Err(Error::MalformedReply(format!(
                "unexpected split flag {:?}",
                other as char
            ))),
        }
    }

    async fn set_split(&self, on: bool) -> Result<()> {
        self.send(if on { "FT1;" } else { "FT0;" }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rigport_core::config::{LineConfig, PortConfig};
    use rigport_core::types::ControlLine;
    use rigport_io::{CommandEngine, spawn_worker};
    use rigport_test_harness::{MockOpener, MockPort};

    async fn rig_with(mock: &MockPort, config: PortConfig) -> KenwoodRig {
        let handle = PortHandle::attach(Box::new(mock.clone()), config)
            .await
            .unwrap();
        let io = spawn_worker(
            handle,
            CommandEngine::new(dialect()),
            Arc::new(MockOpener::new(mock.clone())),
        );
        KenwoodRig::new(io)
    }

    async fn rig(mock: &MockPort) -> KenwoodRig {
        rig_with(mock, PortConfig::new("/dev/mock")).await
    }

    // =======================================================================
    // Parsing
    // =======================================================================

    #[test]
    fn frequency_parsing() {
        assert_eq!(parse_frequency("FA00014070000;", "FA").unwrap(), 14_070_000);
        assert_eq!(parse_frequency("FB00007030000;", "FB").unwrap(), 7_030_000);
        assert!(matches!(
            parse_frequency("FA0001407;", "FA"),
            Err(Error::MalformedReply(_))
        ));
        assert!(matches!(
            parse_frequency("FA0001407000X;", "FA"),
            Err(Error::MalformedReply(_))
        ));
    }

    #[test]
    fn mode_table_round_trips() {
        for (mode, code) in MODE_CODES {
            assert_eq!(mode_code(mode), code);
            assert_eq!(parse_mode(&format!("MD{code};"), "MD").unwrap(), mode);
        }
        assert!(parse_mode("MD8;", "MD").is_err());
        assert_eq!(parse_mode("MD$3;", "MD$").unwrap(), Mode::CW);
    }

    #[test]
    fn field_uses_last_response() {
        assert_eq!(field("FA00000000001;FA00014070000;", "FA"), Some("00014070000"));
        assert_eq!(field("FA0001", "FA"), None);
    }

    // =======================================================================
    // Through the worker
    // =======================================================================

    #[tokio::test(start_paused = true)]
    async fn get_frequency() {
        let mock = MockPort::new();
        mock.expect_delayed(b"FA;", Duration::from_millis(20), b"FA00014070000;");
        let rig = rig(&mock).await;

        assert_eq!(rig.get_frequency(Vfo::A).await.unwrap(), 14_070_000);
        assert_eq!(mock.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reply_within_k4_window() {
        let mock = MockPort::new();
        // Longer than the 100 ms port default, inside the 800 ms window.
        mock.expect_delayed(b"FB;", Duration::from_millis(400), b"FB00007030000;");
        let rig = rig(&mock).await;

        assert_eq!(rig.get_frequency(Vfo::B).await.unwrap(), 7_030_000);
        assert_eq!(mock.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn set_frequency_is_write_only() {
        let mock = MockPort::new();
        let rig = rig(&mock).await;

        rig.set_frequency(Vfo::A, 14_074_000).await.unwrap();
        assert_eq!(mock.writes(), vec![b"FA00014074000;".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn set_frequency_beyond_eleven_digits_is_refused() {
        let mock = MockPort::new();
        let rig = rig(&mock).await;

        assert!(matches!(
            rig.set_frequency(Vfo::A, 100_000_000_000).await,
            Err(Error::InvalidConfig(_))
        ));
        assert_eq!(mock.write_count(), 0);

        rig.set_frequency(Vfo::B, 99_999_999_999).await.unwrap();
        assert_eq!(mock.writes(), vec![b"FB99999999999;".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_command() {
        let mock = MockPort::new();
        mock.expect(b"MD;", b"?;");
        let rig = rig(&mock).await;

        assert!(matches!(
            rig.get_mode(Vfo::A).await,
            Err(Error::MalformedReply(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn mode_query_and_set() {
        let mock = MockPort::new();
        mock.expect(b"MD;", b"MD3;");
        let rig = rig(&mock).await;

        assert_eq!(rig.get_mode(Vfo::A).await.unwrap(), Mode::CW);
        rig.set_mode(Vfo::A, Mode::USB).await.unwrap();
        assert_eq!(mock.writes()[1], b"MD2;".to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn cat_ptt() {
        let mock = MockPort::new();
        mock.expect(b"TX;", b"");
        mock.expect(b"TQ;", b"TQ1;");
        mock.expect(b"RX;", b"");
        let rig = rig(&mock).await;

        rig.set_ptt(true).await.unwrap();
        assert!(rig.get_ptt().await.unwrap());
        rig.set_ptt(false).await.unwrap();
        assert_eq!(mock.remaining_expectations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn line_ptt() {
        let mock = MockPort::new();
        let config = PortConfig::new("/dev/mock").dtr(LineConfig::ptt(false));
        let rig = rig_with(&mock, config).await.ptt_method(PttMethod::Line);

        rig.set_ptt(true).await.unwrap();
        assert_eq!(mock.line_level(ControlLine::Dtr), Some(true));
        assert!(rig.get_ptt().await.unwrap());

        let handle = rig.shutdown().await.unwrap();
        assert!(!handle.is_open());
        assert_eq!(mock.line_level(ControlLine::Dtr), Some(false));
        assert_eq!(mock.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn s_meter_is_normalised() {
        let mock = MockPort::new();
        mock.expect(b"SM0;", b"SM00015;");
        let rig = rig(&mock).await;

        let v = rig.get_s_meter().await.unwrap();
        assert!((v - 0.5).abs() < f32::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn split_from_if_status() {
        let mock = MockPort::new();
        mock.expect(b"IF;", b"IF00014070000     -000000 0002001011 ;");
        mock.expect(b"FT0;", b"");
        let rig = rig(&mock).await;

        assert!(rig.get_split().await.unwrap());
        rig.set_split(false).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_rig_times_out() {
        let mock = MockPort::new();
        let config = PortConfig::new("/dev/mock").retries(2);
        let rig = rig_with(&mock, config).await;

        assert!(matches!(
            rig.get_frequency(Vfo::A).await,
            Err(Error::TimedOut)
        ));
        assert_eq!(mock.write_count(), 2);
    }
}
