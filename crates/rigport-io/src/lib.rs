//! Serial command engine for radio transceivers.
//!
//! One [`PortHandle`] owns an opened serial link. The pieces layered on top
//! of it borrow the handle mutably, so at most one of them talks to the rig
//! at a time:
//!
//! - [`writer`]: transmits a command, with optional byte pacing and settle delay
//! - [`reader`]: accumulates reply bytes until a framing rule or deadline
//! - [`dialect`]: framing strategies (ASCII terminated, fixed length, CI-V echo)
//! - [`ptt`]: PTT over RTS/DTR honouring configured polarity
//! - [`engine`]: request/reply with per-attempt timeout and retry
//! - [`worker`]: a tokio task owning the handle and serialising requests

pub mod dialect;
pub mod engine;
pub mod frame;
pub mod handle;
pub mod ptt;
pub mod reader;
pub mod worker;
pub mod writer;

pub use dialect::{AsciiTerminated, CivEcho, FixedLength, FrameDialect, Inspection};
pub use engine::{CommandEngine, ExchangeState};
pub use frame::{CommandFrame, ReplyBuffer};
pub use handle::PortHandle;
pub use reader::{Expect, FrameAccumulator, POLL_INTERVAL, ReadOutcome, read_frame};
pub use worker::{Request, RigIo, spawn_worker};
pub use writer::write_frame;
