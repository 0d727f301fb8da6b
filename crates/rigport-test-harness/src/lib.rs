//! rigport-test-harness: Test utilities and mock links for rigport.
//!
//! This crate provides [`MockPort`] for deterministic testing of the frame
//! reader, writer, PTT controller and command engine without a real radio,
//! plus [`MockOpener`] and [`RecordingSink`] for exercising the worker and
//! the trace output.

pub mod mock_serial;
pub mod opener;

pub use mock_serial::{MockEvent, MockPort};
pub use opener::{MockOpener, RecordingSink, TraceRecord};
