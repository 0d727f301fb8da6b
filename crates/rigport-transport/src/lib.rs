//! Serial transport for rigport.
//!
//! This crate provides the production implementation of the
//! [`SerialLink`](rigport_core::SerialLink) trait from `rigport-core`:
//!
//! - [`SerialTransport`]: USB virtual COM ports and RS-232 serial connections
//! - [`SerialOpener`]: a [`LinkOpener`](rigport_core::LinkOpener) that opens
//!   `SerialTransport` links, used by the worker to reopen after a
//!   reconfiguration
//! - [`list_ports`]: enumerate the serial devices present on this machine

pub mod serial;

pub use serial::{SerialOpener, SerialTransport};

use rigport_core::error::{Error, Result};

/// A serial device visible to the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Path or name to pass as `PortConfig::device`.
    pub name: String,
    /// Manufacturer/product string for USB devices, if known.
    pub description: Option<String>,
}

/// Enumerate serial devices.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = tokio_serial::available_ports().map_err(|e| Error::Io(e.into()))?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let description = match p.port_type {
                tokio_serial::SerialPortType::UsbPort(usb) => {
                    let parts: Vec<String> = [usb.manufacturer, usb.product]
                        .into_iter()
                        .flatten()
                        .collect();
                    if parts.is_empty() {
                        Some(format!("USB {:04x}:{:04x}", usb.vid, usb.pid))
                    } else {
                        Some(parts.join(" "))
                    }
                }
                tokio_serial::SerialPortType::BluetoothPort => Some("Bluetooth".into()),
                tokio_serial::SerialPortType::PciPort => Some("PCI".into()),
                tokio_serial::SerialPortType::Unknown => None,
            };
            PortInfo {
                name: p.port_name,
                description,
            }
        })
        .collect())
}
