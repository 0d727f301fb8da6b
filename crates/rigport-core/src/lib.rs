//! rigport-core: Core types, configuration and error definitions for rigport.
//!
//! This crate defines the pieces every other rigport crate shares: the
//! serial port configuration, the [`SerialLink`] abstraction over an opened
//! device, the trace sink for link traffic, and the capability traits that
//! rig drivers implement.
//!
//! # Key types
//!
//! - [`PortConfig`] -- serial parameters, control line policy and timing
//! - [`SerialLink`] / [`LinkOpener`] -- byte-level access to a device
//! - [`TraceSink`] -- observer for bytes written, read and echoed
//! - [`Error`] / [`Result`] -- error handling

pub mod capability;
pub mod config;
pub mod error;
pub mod link;
pub mod trace;
pub mod types;

pub use capability::{FrequencyControl, MeterReadable, ModeControl, PttControl, SplitControl};
pub use config::{BaudRate, FlowControl, LineConfig, PortConfig, StopBits};
pub use error::{Error, OpenFailure, Result};
pub use link::{LinkOpener, SerialLink};
pub use trace::{Direction, Encoding, NullSink, TraceSink, TracingSink};
pub use types::*;
