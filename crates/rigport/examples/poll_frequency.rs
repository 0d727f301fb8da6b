//! Frequency polling example.
//!
//! Opens a Kenwood-style rig (Elecraft K4 timing), reads VFO-A once a second
//! and prints changes. A missed reply is logged and polling continues.
//!
//! # Usage
//!
//! ```sh
//! RUST_LOG=rigport_io=debug cargo run -p rigport --example poll_frequency -- /dev/ttyUSB0
//! ```

use std::time::Duration;

use rigport::kenwood::{self, KenwoodRig};
use rigport::{BaudRate, Error, FrequencyControl, PortConfig, Vfo};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let device = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyUSB0".to_string());

    let config = PortConfig::new(&device)
        .baud_rate(BaudRate::B38400)
        .retries(2);

    println!("Opening {device}...");
    let rig = KenwoodRig::new(rigport::connect(config, kenwood::dialect()).await?);

    let mut last = None;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    for _ in 0..30 {
        ticker.tick().await;
        match rig.get_frequency(Vfo::A).await {
            Ok(freq) if Some(freq) != last => {
                println!("VFO-A: {} Hz ({:.3} MHz)", freq, freq as f64 / 1_000_000.0);
                last = Some(freq);
            }
            Ok(_) => {}
            Err(Error::TimedOut) => println!("no reply"),
            Err(e) => return Err(e.into()),
        }
    }

    rig.shutdown().await?;
    println!("Port closed.");
    Ok(())
}
