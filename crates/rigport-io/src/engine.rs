//! Command/response engine.
//!
//! [`CommandEngine::execute`] performs one synchronous exchange on a borrowed
//! [`PortHandle`]: write the command, wait for a framed reply, and reissue
//! the same command on timeout until the port's attempt budget is spent.
//!
//! Retry contract: with `retries = N` the command is written exactly N times
//! and, with no pacing or settle delay and a per-attempt timeout T, a silent
//! rig yields [`Error::TimedOut`] after N·T (within one poll interval).
//!
//! Replies that complete but do not parse are not retried here; drivers
//! report them as [`Error::MalformedReply`]. Write failures and short writes
//! are returned immediately.

use std::sync::Arc;

use rigport_core::error::{Error, Result};
use rigport_core::trace::{Direction, TraceSink, TracingSink};

use crate::dialect::FrameDialect;
use crate::frame::{CommandFrame, ReplyBuffer};
use crate::handle::PortHandle;
use crate::reader::{self, Expect};
use crate::writer;

/// Where the engine is in the current (or last) exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeState {
    #[default]
    Idle,
    Sending,
    AwaitingReply,
    Complete,
    TimedOut,
    /// The exchange ended with a write or link error.
    Failed,
}

pub struct CommandEngine {
    dialect: Arc<dyn FrameDialect>,
    trace: Arc<dyn TraceSink>,
    state: ExchangeState,
}

impl CommandEngine {
    /// An engine for `dialect` that traces through `tracing`.
    pub fn new(dialect: Arc<dyn FrameDialect>) -> Self {
        CommandEngine {
            dialect,
            trace: Arc::new(TracingSink),
            state: ExchangeState::Idle,
        }
    }

    pub fn with_trace(mut self, trace: Arc<dyn TraceSink>) -> Self {
        self.trace = trace;
        self
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn dialect(&self) -> &dyn FrameDialect {
        &*self.dialect
    }

    /// Send `cmd` and wait for a reply matching `expect`.
    pub async fn execute(
        &mut self,
        handle: &mut PortHandle,
        cmd: &CommandFrame,
        expect: &Expect,
    ) -> Result<ReplyBuffer> {
        let result = self.exchange(handle, cmd, expect).await;
        if let Err(e) = &result {
            if !matches!(e, Error::TimedOut) {
                self.state = ExchangeState::Failed;
            }
        }
        result
    }

    async fn exchange(
        &mut self,
        handle: &mut PortHandle,
        cmd: &CommandFrame,
        expect: &Expect,
    ) -> Result<ReplyBuffer> {
        let config = handle.config();
        let attempts = config.attempts();
        let pace = config.write_delay;
        let settle = config.post_write_delay;
        let timeout = config.read_timeout;

        for attempt in 1..=attempts {
            if attempt > 1 {
                tracing::debug!(label = cmd.label(), attempt, "command retry");
            }

            self.state = ExchangeState::Sending;
            self.trace
                .record(Direction::Write, cmd.encoding(), cmd.label(), cmd.bytes());
            let written = writer::write_frame(handle, cmd.bytes(), pace, settle).await?;
            if written < cmd.len() {
                return Err(Error::ShortWrite {
                    written,
                    expected: cmd.len(),
                });
            }

            if expect.is_none() {
                self.state = ExchangeState::Complete;
                return Ok(ReplyBuffer {
                    bytes: Vec::new(),
                    attempt,
                });
            }

            self.state = ExchangeState::AwaitingReply;
            let outcome = reader::read_frame(
                handle,
                expect,
                &*self.dialect,
                timeout,
                &*self.trace,
                cmd.label(),
            )
            .await?;

            if outcome.complete {
                self.state = ExchangeState::Complete;
                return Ok(ReplyBuffer {
                    bytes: outcome.bytes,
                    attempt,
                });
            }
        }

        self.state = ExchangeState::TimedOut;
        tracing::warn!(
            device = %handle.device(),
            label = cmd.label(),
            attempts,
            "no reply from rig"
        );
        Err(Error::TimedOut)
    }
}
