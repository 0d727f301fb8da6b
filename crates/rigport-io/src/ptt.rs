//! Push-to-talk over RTS/DTR.
//!
//! A line designated as PTT rests at its configured idle level and is driven
//! to the opposite level while transmitting. Lines owned by hardware flow
//! control are never touched.

use rigport_core::config::LineConfig;
use rigport_core::error::{Error, Result};
use rigport_core::types::ControlLine;

use crate::handle::PortHandle;

/// Level to drive on a PTT line for the requested state.
pub fn ptt_level(line: &LineConfig, on: bool) -> bool {
    if on { !line.idle_high } else { line.idle_high }
}

impl PortHandle {
    /// Key or unkey the transmitter through the configured PTT lines.
    ///
    /// Does nothing when no line is designated for PTT. If any line fails,
    /// every PTT line is returned to idle on a best-effort basis, the cached
    /// state is cleared and the error is returned.
    pub fn set_ptt(&mut self, on: bool) -> Result<()> {
        let lines: Vec<ControlLine> = self.config().ptt_lines().collect();
        if lines.is_empty() {
            return Ok(());
        }
        if !self.is_open() {
            return Err(Error::HandleClosed);
        }

        let targets: Vec<(ControlLine, bool, bool)> = lines
            .iter()
            .map(|&l| {
                let cfg = self.config().line(l);
                (l, ptt_level(cfg, on), cfg.idle_high)
            })
            .collect();
        let device = self.device().to_string();

        let link = self.link_mut()?;
        for &(line, level, _) in &targets {
            if let Err(e) = link.set_control_line(line, level) {
                tracing::warn!(device = %device, %line, on, error = %e, "PTT line failed, releasing");
                for &(l, _, idle) in &targets {
                    let _ = link.set_control_line(l, idle);
                }
                self.ptt = false;
                return Err(e);
            }
        }

        self.ptt = on;
        tracing::debug!(device = %device, on, "PTT");
        Ok(())
    }

    /// Last PTT state set through [`set_ptt`](Self::set_ptt).
    pub fn get_ptt(&self) -> bool {
        self.ptt
    }
}
