//! [`LinkOpener`] and [`TraceSink`] doubles.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rigport_core::config::PortConfig;
use rigport_core::error::{Error, OpenFailure, Result};
use rigport_core::link::{LinkOpener, SerialLink};
use rigport_core::trace::{Direction, Encoding, TraceSink};

use crate::mock_serial::MockPort;

/// Hands out clones of one [`MockPort`], reopening it each time.
#[derive(Debug, Clone)]
pub struct MockOpener {
    port: MockPort,
    fail: Arc<Mutex<Option<OpenFailure>>>,
    opened: Arc<Mutex<Vec<PortConfig>>>,
}

impl MockOpener {
    pub fn new(port: MockPort) -> Self {
        MockOpener {
            port,
            fail: Arc::new(Mutex::new(None)),
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make subsequent opens fail with `reason`, or succeed again with `None`.
    pub fn fail_with(&self, reason: Option<OpenFailure>) {
        *self.fail.lock().unwrap_or_else(|e| e.into_inner()) = reason;
    }

    /// Configurations passed to successful opens, in order.
    pub fn opened(&self) -> Vec<PortConfig> {
        self.opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl LinkOpener for MockOpener {
    async fn open(&self, config: &PortConfig) -> Result<Box<dyn SerialLink>> {
        config.validate()?;
        let fail = self.fail.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(reason) = fail {
            return Err(Error::Open {
                device: config.device.clone(),
                reason,
            });
        }
        self.port.reopen();
        self.opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(config.clone());
        Ok(Box::new(self.port.clone()))
    }
}

/// One observed trace call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    pub direction: Direction,
    pub encoding: Encoding,
    pub label: String,
    pub bytes: Vec<u8>,
}

/// A [`TraceSink`] that keeps everything it is given.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<TraceRecord>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TraceRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Payloads recorded with the given direction.
    pub fn payloads(&self, direction: Direction) -> Vec<Vec<u8>> {
        self.records()
            .into_iter()
            .filter(|r| r.direction == direction)
            .map(|r| r.bytes)
            .collect()
    }
}

impl TraceSink for RecordingSink {
    fn record(&self, direction: Direction, encoding: Encoding, label: &str, bytes: &[u8]) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(TraceRecord {
                direction,
                encoding,
                label: label.to_string(),
                bytes: bytes.to_vec(),
            });
    }
}
