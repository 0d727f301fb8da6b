//! Port worker task.
//!
//! One tokio task owns a [`PortHandle`] and a [`CommandEngine`] and serves
//! requests from a single mpsc channel, strictly in the order they were
//! issued. Callers talk to it through [`RigIo`]; drivers never see the link.
//!
//! A PTT request issued while an exchange is waiting for its reply is queued
//! behind that exchange, never interleaved with it.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use rigport_core::config::PortConfig;
use rigport_core::error::{Error, Result};
use rigport_core::link::LinkOpener;
use rigport_core::types::ControlLine;

use crate::engine::CommandEngine;
use crate::frame::{CommandFrame, ReplyBuffer};
use crate::handle::PortHandle;
use crate::reader::Expect;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Requests queue depth.
const CHANNEL_CAPACITY: usize = 32;

/// A request sent to the worker task.
pub enum Request {
    /// One command/response exchange.
    Execute {
        frame: CommandFrame,
        expect: Expect,
        reply: oneshot::Sender<Result<ReplyBuffer>>,
    },
    /// Assert or release line PTT.
    SetPtt {
        on: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    GetPtt {
        reply: oneshot::Sender<bool>,
    },
    /// Drive RTS or DTR directly.
    SetControlLine {
        line: ControlLine,
        high: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Close, apply a new configuration, and reopen.
    Reconfigure {
        config: PortConfig,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Close the port and hand the handle back.
    Shutdown {
        reply: oneshot::Sender<PortHandle>,
    },
}

/// Handle to a running worker.
pub struct RigIo {
    pub tx: mpsc::Sender<Request>,
    /// Cancelling stops the worker after closing the port.
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

impl RigIo {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| Error::HandleClosed)?;
        reply_rx.await.map_err(|_| Error::HandleClosed)
    }

    /// Send `frame` and wait for a reply shaped like `expect`.
    pub async fn execute(&self, frame: CommandFrame, expect: Expect) -> Result<ReplyBuffer> {
        self.request(|reply| Request::Execute {
            frame,
            expect,
            reply,
        })
        .await?
    }

    pub async fn set_ptt(&self, on: bool) -> Result<()> {
        self.request(|reply| Request::SetPtt { on, reply }).await?
    }

    pub async fn get_ptt(&self) -> Result<bool> {
        self.request(|reply| Request::GetPtt { reply }).await
    }

    pub async fn set_control_line(&self, line: ControlLine, high: bool) -> Result<()> {
        self.request(|reply| Request::SetControlLine { line, high, reply })
            .await?
    }

    /// Reopen the port with `config`. The old port is closed first.
    pub async fn reconfigure(&self, config: PortConfig) -> Result<()> {
        self.request(|reply| Request::Reconfigure { config, reply })
            .await?
    }

    /// Stop the worker after queued requests and recover the closed handle.
    pub async fn shutdown(self) -> Result<PortHandle> {
        let handle = self.request(|reply| Request::Shutdown { reply }).await?;
        let _ = self.task.await;
        Ok(handle)
    }

    /// Stop immediately. An exchange in flight fails with
    /// [`Error::HandleClosed`]; queued requests are dropped.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Spawn the worker. `opener` is used when the port is reconfigured.
pub fn spawn_worker(
    handle: PortHandle,
    engine: CommandEngine,
    opener: Arc<dyn LinkOpener>,
) -> RigIo {
    let (tx, rx) = mpsc::channel::<Request>(CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();

    let task = tokio::spawn(worker_loop(handle, engine, opener, rx, cancel.clone()));

    RigIo { tx, cancel, task }
}

// ---------------------------------------------------------------------------
// Worker loop
// ---------------------------------------------------------------------------

async fn worker_loop(
    mut handle: PortHandle,
    mut engine: CommandEngine,
    opener: Arc<dyn LinkOpener>,
    mut rx: mpsc::Receiver<Request>,
    cancel: CancellationToken,
) {
    loop {
        let req = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(device = %handle.device(), "worker cancelled");
                break;
            }

            req = rx.recv() => match req {
                Some(req) => req,
                None => {
                    debug!(device = %handle.device(), "request channel closed, exiting worker");
                    break;
                }
            },
        };

        match req {
            Request::Execute {
                frame,
                expect,
                reply,
            } => {
                let result = tokio::select! {
                    biased;

                    _ = cancel.cancelled() => Err(Error::HandleClosed),
                    res = engine.execute(&mut handle, &frame, &expect) => res,
                };
                let _ = reply.send(result);
            }
            Request::SetPtt { on, reply } => {
                let _ = reply.send(handle.set_ptt(on));
            }
            Request::GetPtt { reply } => {
                let _ = reply.send(handle.get_ptt());
            }
            Request::SetControlLine { line, high, reply } => {
                let _ = reply.send(handle.set_control_line(line, high));
            }
            Request::Reconfigure { config, reply } => {
                let _ = reply.send(reconfigure(&mut handle, &*opener, config).await);
            }
            Request::Shutdown { reply } => {
                debug!(device = %handle.device(), "worker shutdown requested");
                if let Err(e) = handle.close().await {
                    tracing::warn!(device = %handle.device(), error = %e, "close failed during shutdown");
                }
                let _ = reply.send(handle);
                return;
            }
        }
    }

    if let Err(e) = handle.close().await {
        tracing::warn!(device = %handle.device(), error = %e, "close failed while stopping worker");
    }
}

async fn reconfigure(
    handle: &mut PortHandle,
    opener: &dyn LinkOpener,
    config: PortConfig,
) -> Result<()> {
    config.validate()?;
    handle.close().await?;
    handle.set_config(config)?;
    handle.open(opener).await?;
    tracing::info!(device = %handle.device(), baud = %handle.config().baud_rate, "port reconfigured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::dialect::AsciiTerminated;
    use rigport_core::config::{BaudRate, LineConfig};
    use rigport_core::error::OpenFailure;
    use rigport_test_harness::{MockEvent, MockOpener, MockPort};
    use tokio::time::Instant;

    async fn spawn(mock: &MockPort, config: PortConfig) -> RigIo {
        let handle = PortHandle::attach(Box::new(mock.clone()), config)
            .await
            .unwrap();
        let engine = CommandEngine::new(Arc::new(AsciiTerminated::semicolon()));
        spawn_worker(handle, engine, Arc::new(MockOpener::new(mock.clone())))
    }

    fn ptt_config() -> PortConfig {
        PortConfig::new("/dev/mock").rts(LineConfig::ptt(false))
    }

    // =======================================================================
    // Ordering
    // =======================================================================

    #[tokio::test(start_paused = true)]
    async fn execute_through_worker() {
        let mock = MockPort::new();
        mock.expect_delayed(b"FA;", Duration::from_millis(20), b"FA00014070000;");
        let io = spawn(&mock, PortConfig::new("/dev/mock")).await;

        let reply = io
            .execute(CommandFrame::ascii("FA;"), Expect::terminator(b";"))
            .await
            .unwrap();
        assert_eq!(reply.bytes, b"FA00014070000;");
        io.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ptt_waits_for_outstanding_exchange() {
        let mock = MockPort::new();
        mock.expect_delayed(b"FA;", Duration::from_millis(20), b"FA00014070000;");
        let io = spawn(&mock, ptt_config()).await;

        let start = Instant::now();
        let (reply, ptt) = tokio::join!(
            io.execute(CommandFrame::ascii("FA;"), Expect::terminator(b";")),
            io.set_ptt(true),
        );
        reply.unwrap();
        ptt.unwrap();

        let events = mock.events();
        let write_at = events
            .iter()
            .find_map(|e| match e {
                MockEvent::Write { at, .. } => Some(*at),
                _ => None,
            })
            .unwrap();
        let ptt_at = events
            .iter()
            .rev()
            .find_map(|e| match e {
                MockEvent::ControlLine {
                    at,
                    line: ControlLine::Rts,
                    high: true,
                } => Some(*at),
                _ => None,
            })
            .unwrap();
        assert!(ptt_at > write_at);
        assert!(ptt_at - start >= Duration::from_millis(20));
        assert_eq!(mock.line_level(ControlLine::Rts), Some(true));
        assert!(io.get_ptt().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn requests_are_served_in_issue_order() {
        let mock = MockPort::new();
        mock.expect_delayed(b"FA;", Duration::from_millis(10), b"FA00007000000;");
        mock.expect_delayed(b"FB;", Duration::from_millis(10), b"FB00014000000;");
        let io = spawn(&mock, PortConfig::new("/dev/mock")).await;

        let (a, b) = tokio::join!(
            io.execute(CommandFrame::ascii("FA;"), Expect::terminator(b";")),
            io.execute(CommandFrame::ascii("FB;"), Expect::terminator(b";")),
        );
        assert_eq!(a.unwrap().bytes, b"FA00007000000;");
        assert_eq!(b.unwrap().bytes, b"FB00014000000;");
        assert_eq!(mock.writes(), vec![b"FA;".to_vec(), b"FB;".to_vec()]);
    }

    // =======================================================================
    // Abort / shutdown
    // =======================================================================

    #[tokio::test(start_paused = true)]
    async fn abort_fails_in_flight_exchange_and_closes() {
        let mock = MockPort::new();
        let config = ptt_config().read_timeout(Duration::from_millis(500));
        let io = spawn(&mock, config).await;
        io.set_ptt(true).await.unwrap();

        let (res, _) = tokio::join!(
            io.execute(CommandFrame::ascii("FA;"), Expect::terminator(b";")),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                io.abort();
            },
        );
        assert!(matches!(res, Err(Error::HandleClosed)));

        io.task.await.unwrap();
        assert_eq!(mock.close_count(), 1);
        assert_eq!(mock.line_level(ControlLine::Rts), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn requests_after_abort_fail() {
        let mock = MockPort::new();
        let io = spawn(&mock, PortConfig::new("/dev/mock")).await;
        io.abort();
        tokio::time::sleep(Duration::from_millis(1)).await;

        let res = io.set_ptt(true).await;
        assert!(matches!(res, Err(Error::HandleClosed)));
        assert!(!io.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_returns_closed_handle() {
        let mock = MockPort::new();
        let io = spawn(&mock, ptt_config()).await;
        io.set_ptt(true).await.unwrap();

        let handle = io.shutdown().await.unwrap();
        assert!(!handle.is_open());
        assert!(!handle.get_ptt());
        assert_eq!(mock.close_count(), 1);
        assert_eq!(mock.line_level(ControlLine::Rts), Some(false));
    }

    // =======================================================================
    // Reconfigure
    // =======================================================================

    #[tokio::test(start_paused = true)]
    async fn reconfigure_reopens_with_new_settings() {
        let mock = MockPort::new();
        let opener = MockOpener::new(mock.clone());
        let handle = PortHandle::attach(Box::new(mock.clone()), PortConfig::new("/dev/mock"))
            .await
            .unwrap();
        let engine = CommandEngine::new(Arc::new(AsciiTerminated::semicolon()));
        let io = spawn_worker(handle, engine, Arc::new(opener.clone()));

        let new = PortConfig::new("/dev/mock").baud_rate(BaudRate::B38400);
        io.reconfigure(new).await.unwrap();

        assert_eq!(mock.close_count(), 1);
        let opened = opener.opened();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].baud_rate, BaudRate::B38400);

        mock.expect(b"ID;", b"ID019;");
        let reply = io
            .execute(CommandFrame::ascii("ID;"), Expect::terminator(b";"))
            .await
            .unwrap();
        assert_eq!(reply.bytes, b"ID019;");
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_reconfigure_keeps_port_open() {
        let mock = MockPort::new();
        let io = spawn(&mock, PortConfig::new("/dev/mock")).await;

        let res = io.reconfigure(PortConfig::new("")).await;
        assert!(matches!(res, Err(Error::InvalidConfig(_))));
        assert_eq!(mock.close_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reopen_is_reported() {
        let mock = MockPort::new();
        let opener = MockOpener::new(mock.clone());
        opener.fail_with(Some(OpenFailure::Busy));
        let handle = PortHandle::attach(Box::new(mock.clone()), PortConfig::new("/dev/mock"))
            .await
            .unwrap();
        let engine = CommandEngine::new(Arc::new(AsciiTerminated::semicolon()));
        let io = spawn_worker(handle, engine, Arc::new(opener));

        let res = io.reconfigure(PortConfig::new("/dev/mock")).await;
        assert!(matches!(
            res,
            Err(Error::Open {
                reason: OpenFailure::Busy,
                ..
            })
        ));

        let res = io
            .execute(CommandFrame::ascii("FA;"), Expect::terminator(b";"))
            .await;
        assert!(matches!(res, Err(Error::HandleClosed)));
    }
}
