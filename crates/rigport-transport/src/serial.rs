//! tokio-serial backed [`SerialLink`].
//!
//! [`SerialTransport`] opens a USB virtual COM port or RS-232 device with
//! 8 data bits, no parity, and the stop bits and flow control from the
//! [`PortConfig`]. On unix the device is opened for exclusive use.
//!
//! Right after open both control lines are driven to their configured idle
//! level (RTS is left to the UART when hardware flow control is on) and
//! stale input is discarded, so a rig never sees a spurious key-down.
//!
//! # Example
//!
//! ```no_run
//! use rigport_core::{PortConfig, SerialLink};
//! use rigport_transport::SerialTransport;
//!
//! # async fn example() -> rigport_core::Result<()> {
//! let config = PortConfig::new("/dev/ttyUSB0");
//! let mut link = SerialTransport::open(&config).await?;
//! link.write(b"FA;").await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use rigport_core::config::{FlowControl, PortConfig, StopBits};
use rigport_core::error::{Error, OpenFailure, Result};
use rigport_core::link::{LinkOpener, SerialLink};
use rigport_core::types::ControlLine;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};

fn stop_bits(bits: StopBits) -> tokio_serial::StopBits {
    match bits {
        StopBits::One => tokio_serial::StopBits::One,
        StopBits::Two => tokio_serial::StopBits::Two,
    }
}

fn flow_control(flow: FlowControl) -> tokio_serial::FlowControl {
    match flow {
        FlowControl::None => tokio_serial::FlowControl::None,
        FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
    }
}

/// Write until `data` is gone, the writer accepts nothing, or it fails.
/// Returns the bytes accepted, so a stalled device still shows up as short.
async fn write_fully<W: AsyncWrite + Unpin>(w: &mut W, data: &[u8]) -> std::io::Result<usize> {
    let mut written = 0;
    while written < data.len() {
        match w.write(&data[written..]).await? {
            0 => break,
            n => written += n,
        }
    }
    Ok(written)
}

/// Classify a tokio-serial open error.
fn open_failure(e: &tokio_serial::Error) -> OpenFailure {
    if e.description.to_lowercase().contains("busy") {
        return OpenFailure::Busy;
    }
    match e.kind {
        tokio_serial::ErrorKind::NoDevice => OpenFailure::NotFound,
        tokio_serial::ErrorKind::Io(std::io::ErrorKind::NotFound) => OpenFailure::NotFound,
        tokio_serial::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            OpenFailure::PermissionDenied
        }
        _ => OpenFailure::Other(e.description.clone()),
    }
}

/// Serial port link to a transceiver.
pub struct SerialTransport {
    /// The underlying serial port stream
    port: Option<SerialStream>,
    /// Port name for logging/debugging
    port_name: String,
}

impl SerialTransport {
    /// Open and configure the device named in `config`.
    pub async fn open(config: &PortConfig) -> Result<Self> {
        config.validate()?;
        let port = config.device.as_str();

        tracing::debug!(
            port = %port,
            baud_rate = config.baud_rate.as_u32(),
            stop_bits = ?config.stop_bits,
            flow_control = ?config.flow_control,
            "Opening serial port"
        );

        let open_err = |e: tokio_serial::Error| {
            tracing::error!(port = %port, error = %e, "Failed to open serial port");
            Error::Open {
                device: port.to_string(),
                reason: open_failure(&e),
            }
        };

        #[allow(unused_mut)]
        let mut serial_stream = tokio_serial::new(port, config.baud_rate.as_u32())
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(stop_bits(config.stop_bits))
            .flow_control(flow_control(config.flow_control))
            .open_native_async()
            .map_err(open_err)?;

        #[cfg(unix)]
        serial_stream.set_exclusive(true).map_err(|e| {
            tracing::error!(port = %port, error = %e, "Failed to claim exclusive access");
            Error::Open {
                device: port.to_string(),
                reason: OpenFailure::Busy,
            }
        })?;

        for line in ControlLine::ALL {
            if config.consumed_by_flow_control(line) {
                continue;
            }
            let high = config.line(line).idle_high;
            let res = match line {
                ControlLine::Rts => serial_stream.write_request_to_send(high),
                ControlLine::Dtr => serial_stream.write_data_terminal_ready(high),
            };
            if let Err(e) = res {
                tracing::warn!(port = %port, %line, error = %e, "Failed to set idle level");
            }
        }

        if let Err(e) = serial_stream.clear(ClearBuffer::Input) {
            tracing::warn!(port = %port, error = %e, "Failed to flush stale input");
        }

        tracing::info!(port = %port, baud_rate = config.baud_rate.as_u32(), "Serial port opened successfully");

        Ok(Self {
            port: Some(serial_stream),
            port_name: port.to_string(),
        })
    }

    /// Get the name of the serial port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[async_trait]
impl SerialLink for SerialTransport {
    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::HandleClosed)?;

        tracing::trace!(port = %self.port_name, bytes = data.len(), "Sending data");

        let n = write_fully(port, data).await.map_err(|e| {
            tracing::error!(port = %self.port_name, error = %e, "Failed to send data");
            Error::Write(e.to_string())
        })?;

        port.flush().await.map_err(|e| Error::Write(e.to_string()))?;

        if n < data.len() {
            tracing::warn!(port = %self.port_name, written = n, expected = data.len(), "Short write");
        }
        Ok(n)
    }

    async fn read_available(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::HandleClosed)?;

        let pending = port
            .bytes_to_read()
            .map_err(|e| Error::Io(e.into()))? as usize;
        if pending == 0 {
            return Ok(0);
        }

        let start = buf.len();
        buf.resize(start + pending, 0);
        let n = match port.read(&mut buf[start..]).await {
            Ok(n) => n,
            Err(e) => {
                buf.truncate(start);
                tracing::error!(port = %self.port_name, error = %e, "Failed to receive data");
                return Err(Error::Io(e));
            }
        };
        buf.truncate(start + n);

        tracing::trace!(port = %self.port_name, bytes = n, "Received data");
        Ok(n)
    }

    fn clear_input(&mut self) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::HandleClosed)?;
        port.clear(ClearBuffer::Input)
            .map_err(|e| Error::Io(e.into()))
    }

    fn set_control_line(&mut self, line: ControlLine, high: bool) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::HandleClosed)?;
        let res = match line {
            ControlLine::Rts => port.write_request_to_send(high),
            ControlLine::Dtr => port.write_data_terminal_ready(high),
        };
        res.map_err(|e| Error::ControlLine {
            line,
            reason: e.to_string(),
        })?;
        tracing::trace!(port = %self.port_name, %line, high, "Control line set");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            tracing::debug!(port = %self.port_name, "Closing serial port");

            if let Err(e) = port.flush().await {
                tracing::warn!(
                    port = %self.port_name,
                    error = %e,
                    "Failed to flush before closing (continuing anyway)"
                );
            }

            tracing::info!(port = %self.port_name, "Serial port closed");
        }

        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        if self.port.is_some() {
            tracing::debug!(port = %self.port_name, "SerialTransport dropped, closing port");
        }
    }
}

/// Opens [`SerialTransport`] links; the production [`LinkOpener`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialOpener;

#[async_trait]
impl LinkOpener for SerialOpener {
    async fn open(&self, config: &PortConfig) -> Result<Box<dyn SerialLink>> {
        Ok(Box::new(SerialTransport::open(config).await?))
    }
}
