//! Frame reader: accumulate reply bytes until a completion rule or deadline.
//!
//! The framing decisions live in [`FrameAccumulator`], a pure state machine
//! with no I/O and no clock. [`read_frame`] drives it by polling the link
//! every [`POLL_INTERVAL`] on the tokio clock.

use std::time::Duration;

use rigport_core::error::Result;
use rigport_core::trace::{Direction, TraceSink};
use tokio::time::Instant;

use crate::dialect::{FrameDialect, Inspection};
use crate::handle::PortHandle;

/// Granularity of the read loop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// What constitutes a complete reply.
///
/// A reply is complete as soon as any configured rule holds: at least
/// `min_len` bytes, or the buffer ends with `terminator`, or it ends with
/// `alt_terminator`. Zero / empty disables a rule. With every rule disabled
/// the command expects no reply at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expect {
    pub min_len: usize,
    pub terminator: Vec<u8>,
    pub alt_terminator: Vec<u8>,
    /// Overrides the port's per-attempt read timeout.
    pub timeout: Option<Duration>,
}

impl Expect {
    /// No reply expected; the command is write-only.
    pub fn none() -> Self {
        Self::default()
    }

    /// Complete once `n` bytes have arrived.
    pub fn at_least(n: usize) -> Self {
        Expect {
            min_len: n,
            ..Self::default()
        }
    }

    /// Complete when the buffer ends with `t`.
    pub fn terminator(t: &[u8]) -> Self {
        Expect {
            terminator: t.to_vec(),
            ..Self::default()
        }
    }

    pub fn with_len(mut self, n: usize) -> Self {
        self.min_len = n;
        self
    }

    /// Also complete when the buffer ends with `t`.
    pub fn or_terminator(mut self, t: &[u8]) -> Self {
        self.alt_terminator = t.to_vec();
        self
    }

    pub fn within(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_none(&self) -> bool {
        self.min_len == 0 && self.terminator.is_empty() && self.alt_terminator.is_empty()
    }

    pub fn is_satisfied_by(&self, buf: &[u8]) -> bool {
        (self.min_len > 0 && buf.len() >= self.min_len)
            || (!self.terminator.is_empty() && buf.ends_with(&self.terminator))
            || (!self.alt_terminator.is_empty() && buf.ends_with(&self.alt_terminator))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccumState {
    Collecting,
    Complete,
}

/// Pure framing state machine for one reply.
pub struct FrameAccumulator<'a> {
    expect: &'a Expect,
    dialect: &'a dyn FrameDialect,
    buf: Vec<u8>,
    state: AccumState,
}

impl<'a> FrameAccumulator<'a> {
    pub fn new(expect: &'a Expect, dialect: &'a dyn FrameDialect) -> Self {
        FrameAccumulator {
            expect,
            dialect,
            buf: Vec::new(),
            state: AccumState::Collecting,
        }
    }

    /// Append a chunk and re-evaluate completion.
    ///
    /// Returns any echoes the dialect discarded. Bytes pushed after the
    /// reply is complete are ignored.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut echoes = Vec::new();
        if self.state == AccumState::Complete {
            return echoes;
        }
        self.buf.extend_from_slice(chunk);

        loop {
            match self.dialect.inspect(&mut self.buf) {
                Inspection::EchoStripped(echo) => echoes.push(echo),
                Inspection::Hold => break,
                Inspection::Ready => {
                    if self.expect.is_satisfied_by(&self.buf) {
                        self.state = AccumState::Complete;
                    }
                    break;
                }
            }
        }
        echoes
    }

    pub fn is_complete(&self) -> bool {
        self.state == AccumState::Complete
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Result of one read attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    pub bytes: Vec<u8>,
    /// `false` when the deadline passed first; `bytes` is then the partial
    /// buffer.
    pub complete: bool,
}

/// Poll the handle until `expect` is satisfied or `timeout` elapses.
///
/// `expect.timeout`, when set, replaces `timeout`. A missed deadline is not
/// an error here; the caller decides whether to retry.
pub async fn read_frame(
    handle: &mut PortHandle,
    expect: &Expect,
    dialect: &dyn FrameDialect,
    timeout: Duration,
    trace: &dyn TraceSink,
    label: &str,
) -> Result<ReadOutcome> {
    let timeout = expect.timeout.unwrap_or(timeout);
    let start = Instant::now();
    let mut acc = FrameAccumulator::new(expect, dialect);
    let mut chunk = Vec::new();

    loop {
        chunk.clear();
        handle.link_mut()?.read_available(&mut chunk).await?;
        if !chunk.is_empty() {
            for echo in acc.push(&chunk) {
                trace.record(Direction::Echo, dialect.encoding(), label, &echo);
            }
        }

        if acc.is_complete() {
            let bytes = acc.into_bytes();
            trace.record(Direction::Read, dialect.encoding(), label, &bytes);
            return Ok(ReadOutcome {
                bytes,
                complete: true,
            });
        }

        if start.elapsed() >= timeout {
            let bytes = acc.into_bytes();
            tracing::debug!(
                label,
                partial = bytes.len(),
                timeout_ms = timeout.as_millis() as u64,
                "Reply deadline passed"
            );
            if !bytes.is_empty() {
                trace.record(Direction::Read, dialect.encoding(), label, &bytes);
            }
            return Ok(ReadOutcome {
                bytes,
                complete: false,
            });
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{AsciiTerminated, CivEcho, FixedLength};
    use proptest::prelude::*;
    use rigport_core::config::PortConfig;
    use rigport_core::trace::NullSink;
    use rigport_test_harness::{MockPort, RecordingSink};

    // =======================================================================
    // Expect / FrameAccumulator
    // =======================================================================

    #[test]
    fn expect_rules() {
        let e = Expect::terminator(b";").with_len(14);
        assert!(!e.is_satisfied_by(b"FA0001"));
        assert!(e.is_satisfied_by(b"?;"));
        assert!(e.is_satisfied_by(b"FA00014070000X"));

        let e = Expect::terminator(&[0xFB, 0xFD]).or_terminator(&[0xFA, 0xFD]);
        assert!(e.is_satisfied_by(&[0xFE, 0xFE, 0xE0, 0x94, 0xFA, 0xFD]));
        assert!(!e.is_satisfied_by(&[0xFE, 0xFE, 0xE0, 0x94, 0xFD]));

        assert!(Expect::none().is_none());
        assert!(!Expect::none().is_satisfied_by(b"anything"));
    }

    #[test]
    fn accumulator_terminator_across_chunks() {
        let expect = Expect::terminator(b";");
        let dialect = AsciiTerminated::semicolon();
        let mut acc = FrameAccumulator::new(&expect, &dialect);

        acc.push(b"FA000");
        assert!(!acc.is_complete());
        acc.push(b"14070");
        assert!(!acc.is_complete());
        acc.push(b"000;");
        assert!(acc.is_complete());
        assert_eq!(acc.buffer(), b"FA00014070000;");
    }

    #[test]
    fn accumulator_fixed_length() {
        let expect = Expect::at_least(18);
        let dialect = FixedLength { reply_len: 18 };
        let mut acc = FrameAccumulator::new(&expect, &dialect);
        acc.push(&[0u8; 17]);
        assert!(!acc.is_complete());
        acc.push(&[0u8; 1]);
        assert!(acc.is_complete());
    }

    #[test]
    fn accumulator_ignores_bytes_after_completion() {
        let expect = Expect::terminator(b";");
        let dialect = AsciiTerminated::semicolon();
        let mut acc = FrameAccumulator::new(&expect, &dialect);
        acc.push(b"ID017;");
        acc.push(b"junk");
        assert_eq!(acc.into_bytes(), b"ID017;");
    }

    #[test]
    fn civ_length_alone_does_not_complete_open_frame() {
        let expect = Expect::at_least(4);
        let dialect = CivEcho::default();
        let mut acc = FrameAccumulator::new(&expect, &dialect);
        acc.push(&[0xFE, 0xFE, 0xE0, 0x94, 0x03]);
        assert!(!acc.is_complete());
        acc.push(&[0xFD]);
        assert!(acc.is_complete());
    }

    #[test]
    fn civ_echo_and_reply_in_one_chunk() {
        let expect = Expect::terminator(&[0xFD]);
        let dialect = CivEcho::default();
        let mut acc = FrameAccumulator::new(&expect, &dialect);
        let echoes = acc.push(&[
            0xFE, 0xFE, 0x94, 0xE0, 0x03, 0xFD, // echo
            0xFE, 0xFE, 0xE0, 0x94, 0x03, 0x00, 0x00, 0x07, 0x14, 0x00, 0xFD,
        ]);
        assert_eq!(echoes, vec![vec![0xFE, 0xFE, 0x94, 0xE0, 0x03, 0xFD]]);
        assert!(acc.is_complete());
        assert_eq!(
            acc.buffer(),
            &[0xFE, 0xFE, 0xE0, 0x94, 0x03, 0x00, 0x00, 0x07, 0x14, 0x00, 0xFD]
        );
    }

    fn civ_frame(to: u8, from: u8, payload: &[u8]) -> Vec<u8> {
        let mut f = vec![0xFE, 0xFE, to, from];
        f.extend_from_slice(payload);
        f.push(0xFD);
        f
    }

    proptest! {
        #[test]
        fn echo_suppression_returns_exact_reply(
            rig in any::<u8>().prop_filter("not host", |a| *a != 0xE0 && *a != 0xFD && *a != 0xFE),
            cmd in proptest::collection::vec(0u8..0xFD, 1..8),
            reply in proptest::collection::vec(0u8..0xFD, 1..12),
            cuts in proptest::collection::vec(1usize..6, 0..24),
        ) {
            let echo = civ_frame(rig, 0xE0, &cmd);
            let answer = civ_frame(0xE0, rig, &reply);
            let mut stream = echo.clone();
            stream.extend_from_slice(&answer);

            let expect = Expect::terminator(&[0xFD]);
            let dialect = CivEcho::default();
            let mut acc = FrameAccumulator::new(&expect, &dialect);

            let mut echoes = Vec::new();
            let mut rest: &[u8] = &stream;
            let mut cuts = cuts.into_iter();
            while !rest.is_empty() {
                let n = cuts.next().unwrap_or(rest.len()).min(rest.len());
                let (chunk, tail) = rest.split_at(n);
                prop_assert!(!acc.is_complete());
                echoes.extend(acc.push(chunk));
                rest = tail;
            }

            prop_assert!(acc.is_complete());
            prop_assert_eq!(echoes, vec![echo]);
            prop_assert_eq!(acc.into_bytes(), answer);
        }
    }

    // =======================================================================
    // read_frame
    // =======================================================================

    fn assert_within_poll(elapsed: Duration, expected: Duration) {
        assert!(
            elapsed >= expected && elapsed <= expected + POLL_INTERVAL,
            "elapsed {elapsed:?}, expected {expected:?}"
        );
    }

    async fn open(mock: &MockPort) -> PortHandle {
        PortHandle::attach(Box::new(mock.clone()), PortConfig::new("/dev/mock"))
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn read_completes_when_reply_arrives() {
        let mock = MockPort::new();
        let mut handle = open(&mock).await;
        mock.inject_after(Duration::from_millis(20), b"FA00014070000;");

        let start = Instant::now();
        let out = read_frame(
            &mut handle,
            &Expect::terminator(b";"),
            &AsciiTerminated::semicolon(),
            Duration::from_millis(100),
            &NullSink,
            "FA",
        )
        .await
        .unwrap();

        assert!(out.complete);
        assert_eq!(out.bytes, b"FA00014070000;");
        assert_within_poll(start.elapsed(), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn read_times_out_with_partial_buffer() {
        let mock = MockPort::new();
        let mut handle = open(&mock).await;
        mock.inject_after(Duration::from_millis(5), b"FA0001");

        let start = Instant::now();
        let out = read_frame(
            &mut handle,
            &Expect::terminator(b";"),
            &AsciiTerminated::semicolon(),
            Duration::from_millis(50),
            &NullSink,
            "FA",
        )
        .await
        .unwrap();

        assert!(!out.complete);
        assert_eq!(out.bytes, b"FA0001");
        assert_within_poll(start.elapsed(), Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn per_call_timeout_overrides_port_timeout() {
        let mock = MockPort::new();
        let mut handle = open(&mock).await;

        let start = Instant::now();
        let out = read_frame(
            &mut handle,
            &Expect::terminator(b";").within(Duration::from_millis(800)),
            &AsciiTerminated::semicolon(),
            Duration::from_millis(100),
            &NullSink,
            "K4",
        )
        .await
        .unwrap();

        assert!(!out.complete);
        assert_within_poll(start.elapsed(), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn read_traces_echo_and_reply() {
        let mock = MockPort::new();
        let mut handle = open(&mock).await;
        mock.inject(&civ_frame(0x94, 0xE0, &[0x03]));
        mock.inject_after(
            Duration::from_millis(3),
            &civ_frame(0xE0, 0x94, &[0x03, 0x00, 0x00, 0x07, 0x14, 0x00]),
        );
        let sink = RecordingSink::new();

        let out = read_frame(
            &mut handle,
            &Expect::terminator(&[0xFD]),
            &CivEcho::default(),
            Duration::from_millis(100),
            &sink,
            "read freq",
        )
        .await
        .unwrap();

        assert!(out.complete);
        assert_eq!(sink.payloads(Direction::Echo), vec![civ_frame(0x94, 0xE0, &[0x03])]);
        assert_eq!(sink.payloads(Direction::Read), vec![out.bytes.clone()]);
    }

    #[tokio::test(start_paused = true)]
    async fn read_on_closed_handle_fails() {
        let mut handle = PortHandle::new(PortConfig::new("/dev/mock"));
        let res = read_frame(
            &mut handle,
            &Expect::terminator(b";"),
            &AsciiTerminated::semicolon(),
            Duration::from_millis(10),
            &NullSink,
            "FA",
        )
        .await;
        assert!(matches!(res, Err(rigport_core::Error::HandleClosed)));
    }
}
