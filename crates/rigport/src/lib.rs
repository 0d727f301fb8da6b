//! # rigport -- serial transport and command engine for radio transceivers
//!
//! `rigport` opens a serial port to a transceiver, exchanges CAT commands
//! with it under a per-attempt timeout and retry budget, and keys the
//! transmitter over RTS/DTR with configurable polarity.
//!
//! ## Quick Start
//!
//! ```no_run
//! use rigport::{PortConfig, FrequencyControl, Vfo};
//! use rigport::kenwood::{self, KenwoodRig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PortConfig::new("/dev/ttyUSB0")
//!         .baud_rate(rigport::BaudRate::B38400);
//!     let io = rigport::connect(config, kenwood::dialect()).await?;
//!     let rig = KenwoodRig::new(io);
//!
//!     let freq = rig.get_frequency(Vfo::A).await?;
//!     println!("VFO-A: {} Hz", freq);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                  | Purpose                                          |
//! |------------------------|--------------------------------------------------|
//! | `rigport-core`         | Errors, [`PortConfig`], link and capability traits |
//! | `rigport-transport`    | tokio-serial backed link, port enumeration       |
//! | `rigport-io`           | Port handle, framing, PTT, engine, worker task   |
//! | `rigport-drivers`      | Kenwood, Icom and Yaesu example drivers          |
//! | **`rigport`**          | This facade crate -- re-exports everything       |
//!
//! Lower level use skips the worker: open a [`PortHandle`] with [`open`] and
//! drive it with a [`CommandEngine`] directly. Every piece borrows the
//! handle mutably, so one exchange is in flight at a time.

use std::sync::Arc;

pub use rigport_core::*;
pub use rigport_io::{
    AsciiTerminated, CivEcho, CommandEngine, CommandFrame, ExchangeState, Expect, FixedLength,
    FrameDialect, PortHandle, ReplyBuffer, RigIo, spawn_worker,
};

/// Serial device access.
pub mod transport {
    pub use rigport_transport::*;
}

/// Framing, reading and writing primitives.
pub mod io {
    pub use rigport_io::*;
}

/// Kenwood-style ASCII driver.
#[cfg(feature = "drivers")]
pub mod kenwood {
    pub use rigport_drivers::kenwood::*;
}

/// Icom CI-V driver.
#[cfg(feature = "drivers")]
pub mod icom {
    pub use rigport_drivers::icom::*;
}

/// Yaesu FT-890 driver.
#[cfg(feature = "drivers")]
pub mod yaesu {
    pub use rigport_drivers::yaesu::*;
}

#[cfg(feature = "drivers")]
pub use rigport_drivers::PttMethod;

/// Open the serial device named in `config`.
///
/// Both control lines are at their idle level when this returns.
pub async fn open(config: PortConfig) -> Result<PortHandle> {
    let link = rigport_transport::SerialTransport::open(&config).await?;
    PortHandle::attach(Box::new(link), config).await
}

/// Open the device and start a worker speaking `dialect`.
pub async fn connect(config: PortConfig, dialect: Arc<dyn FrameDialect>) -> Result<RigIo> {
    let handle = open(config).await?;
    Ok(spawn_worker(
        handle,
        CommandEngine::new(dialect),
        Arc::new(rigport_transport::SerialOpener),
    ))
}
