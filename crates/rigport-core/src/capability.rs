//! Capability traits implemented by rig drivers.
//!
//! Rather than one monolithic rig interface, each feature a transceiver may
//! offer is its own trait. A driver implements the subset its rig supports
//! and callers take `&dyn FrequencyControl`, `&dyn PttControl`, and so on.
//!
//! All methods are `async` because every one of them is a serial round-trip
//! through the driver's worker.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::types::{Mode, Vfo};

/// Reading and tuning the operating frequency.
#[async_trait]
pub trait FrequencyControl: Send + Sync {
    /// Current frequency of `vfo` in hertz.
    async fn get_frequency(&self, vfo: Vfo) -> Result<u64>;

    /// Tune `vfo` to `freq_hz`.
    async fn set_frequency(&self, vfo: Vfo, freq_hz: u64) -> Result<()>;
}

/// Reading and selecting the operating mode.
#[async_trait]
pub trait ModeControl: Send + Sync {
    async fn get_mode(&self, vfo: Vfo) -> Result<Mode>;

    async fn set_mode(&self, vfo: Vfo, mode: Mode) -> Result<()>;
}

/// Keying the transmitter.
///
/// Depending on configuration a driver keys through a CAT command or through
/// an RTS/DTR line on the port handle.
#[async_trait]
pub trait PttControl: Send + Sync {
    /// Whether the transmitter is keyed.
    async fn get_ptt(&self) -> Result<bool>;

    /// Key (`true`) or unkey (`false`) the transmitter.
    async fn set_ptt(&self, on: bool) -> Result<()>;
}

/// Reading receive and transmit meters.
#[async_trait]
pub trait MeterReadable: Send + Sync {
    /// Signal strength as a raw reading normalised to 0.0..=1.0.
    async fn get_s_meter(&self) -> Result<f32>;

    /// Forward power normalised to 0.0..=1.0.
    async fn get_power_meter(&self) -> Result<f32> {
        Err(Error::Unsupported("power meter not supported".into()))
    }

    /// SWR as a ratio (1.0 = perfect match).
    async fn get_swr(&self) -> Result<f32> {
        Err(Error::Unsupported("SWR meter not supported".into()))
    }
}

/// Split (transmit on the other VFO) operation.
#[async_trait]
pub trait SplitControl: Send + Sync {
    async fn get_split(&self) -> Result<bool> {
        Err(Error::Unsupported("split readback not supported".into()))
    }

    async fn set_split(&self, on: bool) -> Result<()>;
}
