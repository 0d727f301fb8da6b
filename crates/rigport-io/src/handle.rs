//! Port handle: one opened serial device and its configuration.
//!
//! A [`PortHandle`] is bound to a single [`PortConfig`] and exclusively owns
//! the [`SerialLink`] while open. The frame reader, writer, PTT controller
//! and command engine all borrow the handle mutably, so at most one of them
//! touches the device at a time.
//!
//! Control line levels are policed here: on attach both lines are driven to
//! their idle level, and on close every PTT line is returned to idle before
//! the link is released.

use std::fmt;

use rigport_core::config::PortConfig;
use rigport_core::error::{Error, OpenFailure, Result};
use rigport_core::link::{LinkOpener, SerialLink};
use rigport_core::types::ControlLine;

pub struct PortHandle {
    config: PortConfig,
    link: Option<Box<dyn SerialLink>>,
    pub(crate) ptt: bool,
}

impl PortHandle {
    /// A closed handle bound to `config`.
    pub fn new(config: PortConfig) -> Self {
        PortHandle {
            config,
            link: None,
            ptt: false,
        }
    }

    /// Bind an already opened link, e.g. from `SerialTransport::open` or a
    /// `MockPort` in tests.
    pub async fn attach(link: Box<dyn SerialLink>, config: PortConfig) -> Result<Self> {
        let mut handle = PortHandle::new(config);
        handle.open_with(link).await?;
        Ok(handle)
    }

    /// Open the configured device through `opener`.
    pub async fn open(&mut self, opener: &dyn LinkOpener) -> Result<()> {
        self.ensure_closed()?;
        self.config.validate()?;
        let link = opener.open(&self.config).await?;
        self.open_with(link).await
    }

    /// Take ownership of an opened link and force both lines to idle.
    pub async fn open_with(&mut self, link: Box<dyn SerialLink>) -> Result<()> {
        self.ensure_closed()?;
        self.config.validate()?;

        let mut link = link;
        for line in ControlLine::ALL {
            if self.config.consumed_by_flow_control(line) {
                continue;
            }
            let idle = self.config.line(line).idle_high;
            if let Err(e) = link.set_control_line(line, idle) {
                tracing::error!(device = %self.config.device, %line, error = %e, "Failed to force idle level");
                let _ = link.close().await;
                return Err(e);
            }
        }

        self.link = Some(link);
        self.ptt = false;
        tracing::debug!(device = %self.config.device, "Port handle opened");
        Ok(())
    }

    fn ensure_closed(&self) -> Result<()> {
        if self.link.is_some() {
            return Err(Error::Open {
                device: self.config.device.clone(),
                reason: OpenFailure::AlreadyOpen,
            });
        }
        Ok(())
    }

    /// Return PTT lines to idle and release the device.
    ///
    /// Closing a closed handle does nothing.
    pub async fn close(&mut self) -> Result<()> {
        let Some(mut link) = self.link.take() else {
            return Ok(());
        };

        for line in self.config.ptt_lines() {
            let idle = self.config.line(line).idle_high;
            if let Err(e) = link.set_control_line(line, idle) {
                tracing::warn!(device = %self.config.device, %line, error = %e, "Failed to release PTT line on close");
            }
        }
        self.ptt = false;

        tracing::debug!(device = %self.config.device, "Port handle closed");
        link.close().await
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    pub fn device(&self) -> &str {
        &self.config.device
    }

    /// Replace the configuration of a closed handle.
    pub fn set_config(&mut self, config: PortConfig) -> Result<()> {
        if self.is_open() {
            return Err(Error::InvalidConfig(
                "cannot reconfigure an open port".into(),
            ));
        }
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Drive a control line directly.
    ///
    /// A closed handle ignores the request. RTS cannot be driven while
    /// hardware flow control owns it.
    pub fn set_control_line(&mut self, line: ControlLine, high: bool) -> Result<()> {
        let Some(link) = self.link.as_mut() else {
            return Ok(());
        };
        if self.config.consumed_by_flow_control(line) {
            return Err(Error::Unsupported(format!(
                "{line} is owned by hardware flow control"
            )));
        }
        link.set_control_line(line, high)
    }

    pub(crate) fn link_mut(&mut self) -> Result<&mut Box<dyn SerialLink>> {
        self.link.as_mut().ok_or(Error::HandleClosed)
    }
}

impl fmt::Debug for PortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortHandle")
            .field("device", &self.config.device)
            .field("open", &self.is_open())
            .field("ptt", &self.ptt)
            .finish()
    }
}

impl Drop for PortHandle {
    fn drop(&mut self) {
        if let Some(link) = self.link.as_mut() {
            tracing::debug!(device = %self.config.device, "PortHandle dropped while open, releasing PTT");
            for line in self.config.ptt_lines() {
                let _ = link.set_control_line(line, self.config.line(line).idle_high);
            }
        }
    }
}
