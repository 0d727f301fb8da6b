//! Frame writer.

use std::time::Duration;

use rigport_core::error::Result;

use crate::handle::PortHandle;

/// Transmit a command.
///
/// Stale input is discarded first so the next read only sees the reply to
/// this command. With a non-zero `pace` the bytes go out one at a time with
/// `pace` after each; otherwise in a single write. `settle` is slept after
/// the last byte.
///
/// Returns the number of bytes the port accepted, which may be fewer than
/// `bytes.len()`.
pub async fn write_frame(
    handle: &mut PortHandle,
    bytes: &[u8],
    pace: Duration,
    settle: Duration,
) -> Result<usize> {
    let link = handle.link_mut()?;
    link.clear_input()?;

    let written = if pace.is_zero() {
        link.write(bytes).await?
    } else {
        let mut written = 0;
        for b in bytes {
            let n = link.write(std::slice::from_ref(b)).await?;
            if n == 0 {
                break;
            }
            written += n;
            tokio::time::sleep(pace).await;
        }
        written
    };

    if !settle.is_zero() {
        tokio::time::sleep(settle).await;
    }
    Ok(written)
}
