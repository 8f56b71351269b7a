//! Basic demo: discover nearby devices
//!
//! Run with: cargo run --example scan_devices

use imu_telemetry_ble::{BleTransport, LinkConfig, LinkManager, Result};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("imu_telemetry_ble=debug".parse().unwrap()),
        )
        .init();

    println!("Starting device discovery...\n");

    let transport = BleTransport::new()
        .await?
        .with_scan_duration(Duration::from_secs(10));
    let manager = LinkManager::new(Arc::new(transport), LinkConfig::default())?;
    manager.initialize().await?;

    let _handle = manager.on_devices_found(|devices| {
        println!("Discovery pass reported {} device(s)", devices.len());
    });

    let paired = manager.get_paired_devices().await?;
    println!("Already paired: {}", paired.len());
    for device in &paired {
        println!("  {}", device);
    }

    println!("\nScanning for 10 seconds...");
    manager.start_discovery().await?;

    println!("\n--- Scan Complete ---");
    let registry = manager.devices();
    println!("Total devices found: {}", registry.len());
    for device in registry {
        let marker = if device.bonded { "paired" } else { "new" };
        println!("  {} [{}]", device, marker);
    }

    manager.shutdown().await?;
    println!("\nDone!");

    Ok(())
}
