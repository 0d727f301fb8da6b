//! Mock serial port for deterministic testing of the port layer.
//!
//! [`MockPort`] implements [`SerialLink`] with a script of expected commands
//! and timed replies. Reply bytes become readable at
//! `write time + delay` on the tokio clock, so tests run with
//! `#[tokio::test(start_paused = true)]` and assert on exact timings.
//!
//! `MockPort` is a cheap clone over shared state: hand one clone to the code
//! under test as a `Box<dyn SerialLink>` and keep another to inspect writes,
//! control line levels and events afterwards.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use rigport_test_harness::MockPort;
//!
//! let mock = MockPort::new();
//! // When "FA;" has been written, make the reply readable 20 ms later.
//! mock.expect_delayed(b"FA;", Duration::from_millis(20), b"FA00014070000;");
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rigport_core::error::{Error, Result};
use rigport_core::link::SerialLink;
use rigport_core::types::ControlLine;
use tokio::time::Instant;

/// Something that happened on the mock port, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// Bytes accepted by a `write` call.
    Write { at: Instant, bytes: Vec<u8> },
    /// A control line was driven.
    ControlLine {
        at: Instant,
        line: ControlLine,
        high: bool,
    },
    /// Stale input was discarded.
    ClearInput { at: Instant },
    /// `close` was called.
    Close { at: Instant },
}

impl MockEvent {
    /// When the event happened.
    pub fn at(&self) -> Instant {
        match self {
            MockEvent::Write { at, .. }
            | MockEvent::ControlLine { at, .. }
            | MockEvent::ClearInput { at }
            | MockEvent::Close { at } => *at,
        }
    }
}

/// A scripted command and the reply chunks it triggers.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be written (possibly across several
    /// paced writes).
    request: Vec<u8>,
    /// Reply chunks, each readable `delay` after the request completes.
    replies: Vec<(Duration, Vec<u8>)>,
}

#[derive(Debug)]
struct MockState {
    expectations: VecDeque<Expectation>,
    /// Written bytes not yet matched against the next expectation.
    partial: Vec<u8>,
    /// Bytes scheduled to become readable, ordered by arrival time.
    inbound: VecDeque<(Instant, Vec<u8>)>,
    echo: bool,
    open: bool,
    levels: [Option<bool>; 2],
    events: Vec<MockEvent>,
    writes: Vec<Vec<u8>>,
    close_calls: usize,
    short_write: Option<usize>,
    fail_line: Option<ControlLine>,
    fail_writes: Option<String>,
}

impl MockState {
    fn schedule(&mut self, at: Instant, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        let idx = self
            .inbound
            .iter()
            .position(|(t, _)| *t > at)
            .unwrap_or(self.inbound.len());
        self.inbound.insert(idx, (at, bytes));
    }

    fn match_expectation(&mut self, now: Instant) -> Result<()> {
        let Some(next) = self.expectations.front() else {
            // Unscripted writes are accepted and ignored.
            self.partial.clear();
            return Ok(());
        };

        if !next.request.starts_with(&self.partial) {
            let err = Error::Write(format!(
                "unexpected write: expected {:02X?}, got {:02X?}",
                next.request, self.partial
            ));
            self.partial.clear();
            return Err(err);
        }
        if self.partial.len() < next.request.len() {
            return Ok(());
        }

        self.partial.clear();
        if let Some(done) = self.expectations.pop_front() {
            for (delay, bytes) in done.replies {
                self.schedule(now + delay, bytes);
            }
        }
        Ok(())
    }
}

/// A scripted [`SerialLink`] for tests.
#[derive(Debug, Clone)]
pub struct MockPort {
    state: Arc<Mutex<MockState>>,
}

impl MockPort {
    /// Create a new mock port in the open state with no script.
    pub fn new() -> Self {
        MockPort {
            state: Arc::new(Mutex::new(MockState {
                expectations: VecDeque::new(),
                partial: Vec::new(),
                inbound: VecDeque::new(),
                echo: false,
                open: true,
                levels: [None, None],
                events: Vec::new(),
                writes: Vec::new(),
                close_calls: 0,
                short_write: None,
                fail_line: None,
                fail_writes: None,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// When `request` has been written, make `response` readable at once.
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        self.expect_chunks(request, &[(Duration::ZERO, response)]);
    }

    /// When `request` has been written, make `response` readable after `delay`.
    pub fn expect_delayed(&self, request: &[u8], delay: Duration, response: &[u8]) {
        self.expect_chunks(request, &[(delay, response)]);
    }

    /// When `request` has been written, deliver each chunk after its delay
    /// (measured from the end of the write).
    pub fn expect_chunks(&self, request: &[u8], chunks: &[(Duration, &[u8])]) {
        self.state().expectations.push_back(Expectation {
            request: request.to_vec(),
            replies: chunks.iter().map(|(d, b)| (*d, b.to_vec())).collect(),
        });
    }

    /// Expect `request` but never answer it.
    pub fn expect_silence(&self, request: &[u8]) {
        self.expect_chunks(request, &[]);
    }

    /// Make bytes readable `delay` from now, independent of any write.
    pub fn inject_after(&self, delay: Duration, bytes: &[u8]) {
        let at = Instant::now() + delay;
        self.state().schedule(at, bytes.to_vec());
    }

    /// Make bytes readable immediately.
    pub fn inject(&self, bytes: &[u8]) {
        self.inject_after(Duration::ZERO, bytes);
    }

    /// Echo every written byte back, the way a CI-V bus does.
    pub fn set_echo(&self, echo: bool) {
        self.state().echo = echo;
    }

    /// Accept at most `limit` bytes per write call.
    pub fn set_short_write(&self, limit: Option<usize>) {
        self.state().short_write = limit;
    }

    /// Make writes fail with the given OS message.
    pub fn fail_writes(&self, reason: Option<&str>) {
        self.state().fail_writes = reason.map(str::to_string);
    }

    /// Make driving `line` fail.
    pub fn fail_control_line(&self, line: Option<ControlLine>) {
        self.state().fail_line = line;
    }

    /// Mark the port open again, as if the device had been reopened.
    pub fn reopen(&self) {
        self.state().open = true;
    }

    /// Bytes accepted by each `write` call, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    /// Number of `write` calls that accepted bytes.
    pub fn write_count(&self) -> usize {
        self.state().writes.len()
    }

    /// Last level driven on `line`, or `None` if it was never touched.
    pub fn line_level(&self, line: ControlLine) -> Option<bool> {
        self.state().levels[line_index(line)]
    }

    /// Everything that happened, in order.
    pub fn events(&self) -> Vec<MockEvent> {
        self.state().events.clone()
    }

    /// Number of times `close` was called while open.
    pub fn close_count(&self) -> usize {
        self.state().close_calls
    }

    /// Number of scripted commands not yet written.
    pub fn remaining_expectations(&self) -> usize {
        self.state().expectations.len()
    }
}

impl Default for MockPort {
    fn default() -> Self {
        Self::new()
    }
}

fn line_index(line: ControlLine) -> usize {
    match line {
        ControlLine::Rts => 0,
        ControlLine::Dtr => 1,
    }
}

#[async_trait]
impl SerialLink for MockPort {
    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let now = Instant::now();
        let mut st = self.state();
        if !st.open {
            return Err(Error::HandleClosed);
        }
        if let Some(reason) = &st.fail_writes {
            return Err(Error::Write(reason.clone()));
        }

        let n = st.short_write.map_or(data.len(), |limit| limit.min(data.len()));
        let accepted = data[..n].to_vec();
        if accepted.is_empty() {
            return Ok(0);
        }

        st.writes.push(accepted.clone());
        st.events.push(MockEvent::Write {
            at: now,
            bytes: accepted.clone(),
        });
        if st.echo {
            st.schedule(now, accepted.clone());
        }
        st.partial.extend_from_slice(&accepted);
        st.match_expectation(now)?;
        Ok(n)
    }

    async fn read_available(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let now = Instant::now();
        let mut st = self.state();
        if !st.open {
            return Err(Error::HandleClosed);
        }
        let mut n = 0;
        while st.inbound.front().is_some_and(|(at, _)| *at <= now) {
            if let Some((_, bytes)) = st.inbound.pop_front() {
                n += bytes.len();
                buf.extend_from_slice(&bytes);
            }
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> Result<()> {
        let now = Instant::now();
        let mut st = self.state();
        if !st.open {
            return Err(Error::HandleClosed);
        }
        st.inbound.retain(|(at, _)| *at > now);
        st.events.push(MockEvent::ClearInput { at: now });
        Ok(())
    }

    fn set_control_line(&mut self, line: ControlLine, high: bool) -> Result<()> {
        let now = Instant::now();
        let mut st = self.state();
        if !st.open {
            return Err(Error::HandleClosed);
        }
        if st.fail_line == Some(line) {
            return Err(Error::ControlLine {
                line,
                reason: "injected failure".into(),
            });
        }
        st.levels[line_index(line)] = Some(high);
        st.events.push(MockEvent::ControlLine {
            at: now,
            line,
            high,
        });
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let now = Instant::now();
        let mut st = self.state();
        if st.open {
            st.open = false;
            st.close_calls += 1;
            st.events.push(MockEvent::Close { at: now });
            st.inbound.clear();
            st.partial.clear();
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state().open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn scripted_reply_arrives_after_delay() {
        let mock = MockPort::new();
        mock.expect_delayed(b"FA;", Duration::from_millis(20), b"FA00014070000;");
        let mut link = mock.clone();

        assert_eq!(link.write(b"FA;").await.unwrap(), 3);

        let mut buf = Vec::new();
        assert_eq!(link.read_available(&mut buf).await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(19)).await;
        assert_eq!(link.read_available(&mut buf).await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(link.read_available(&mut buf).await.unwrap(), 14);
        assert_eq!(buf, b"FA00014070000;");
        assert_eq!(mock.remaining_expectations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn paced_writes_accumulate_into_one_command() {
        let mock = MockPort::new();
        mock.expect(b"ID;", b"ID017;");
        let mut link = mock.clone();

        for b in b"ID;" {
            link.write(&[*b]).await.unwrap();
        }
        assert_eq!(mock.write_count(), 3);

        let mut buf = Vec::new();
        link.read_available(&mut buf).await.unwrap();
        assert_eq!(buf, b"ID017;");
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_bytes_error() {
        let mock = MockPort::new();
        mock.expect(b"FA;", b"FA00014070000;");
        let mut link = mock.clone();

        let result = link.write(b"FB;").await;
        assert!(matches!(result, Err(Error::Write(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn unscripted_writes_are_silent() {
        let mut mock = MockPort::new();
        mock.write(b"TX;").await.unwrap();
        let mut buf = Vec::new();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(mock.read_available(&mut buf).await.unwrap(), 0);
        assert_eq!(mock.writes(), vec![b"TX;".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn echo_precedes_reply() {
        let mock = MockPort::new();
        mock.set_echo(true);
        mock.expect_delayed(b"\xFE\xFE\x94\xE0\x03\xFD", Duration::from_millis(5), b"REPLY");
        let mut link = mock.clone();

        link.write(b"\xFE\xFE\x94\xE0\x03\xFD").await.unwrap();
        let mut buf = Vec::new();
        link.read_available(&mut buf).await.unwrap();
        assert_eq!(buf, b"\xFE\xFE\x94\xE0\x03\xFD");

        tokio::time::sleep(Duration::from_millis(5)).await;
        link.read_available(&mut buf).await.unwrap();
        assert_eq!(buf, b"\xFE\xFE\x94\xE0\x03\xFDREPLY");
    }

    #[tokio::test(start_paused = true)]
    async fn clear_input_drops_arrived_bytes_only() {
        let mut mock = MockPort::new();
        mock.inject(b"stale");
        mock.inject_after(Duration::from_millis(10), b"fresh");

        mock.clear_input().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut buf = Vec::new();
        mock.read_available(&mut buf).await.unwrap();
        assert_eq!(buf, b"fresh");
    }

    #[tokio::test(start_paused = true)]
    async fn short_write_limits_accepted_bytes() {
        let mut mock = MockPort::new();
        mock.set_short_write(Some(2));
        assert_eq!(mock.write(b"FA;").await.unwrap(), 2);
        assert_eq!(mock.writes(), vec![b"FA".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn control_lines_are_tracked() {
        let mut mock = MockPort::new();
        assert_eq!(mock.line_level(ControlLine::Dtr), None);
        mock.set_control_line(ControlLine::Dtr, true).unwrap();
        assert_eq!(mock.line_level(ControlLine::Dtr), Some(true));

        mock.fail_control_line(Some(ControlLine::Rts));
        assert!(matches!(
            mock.set_control_line(ControlLine::Rts, true),
            Err(Error::ControlLine { line: ControlLine::Rts, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_counted_once() {
        let mut mock = MockPort::new();
        mock.close().await.unwrap();
        mock.close().await.unwrap();
        assert!(!mock.is_open());
        assert_eq!(mock.close_count(), 1);
        assert!(matches!(mock.write(b"x").await, Err(Error::HandleClosed)));
    }
}
