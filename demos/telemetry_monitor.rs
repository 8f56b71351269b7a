//! Real-time telemetry monitoring demo
//!
//! Run with: cargo run --example telemetry_monitor [device-name-or-address]

use imu_telemetry_ble::{
    g_to_mps2, BleTransport, ConnectionState, Error, LinkConfig, LinkManager, Result, SensorFrame,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (minimal)
    tracing_subscriber::fmt().with_env_filter("warn").init();

    let wanted = std::env::args().nth(1);

    println!("Telemetry Monitor");
    println!("=================\n");
    println!("Looking for devices...\n");

    let transport = BleTransport::new().await?;
    let manager = LinkManager::new(Arc::new(transport), LinkConfig::default())?;
    manager.initialize().await?;

    let devices = manager.start_discovery().await?;
    let device = devices
        .iter()
        .find(|device| match &wanted {
            Some(wanted) => device.address == *wanted || device.name.as_deref() == Some(wanted),
            None => device.name.is_some(),
        })
        .cloned()
        .ok_or(Error::ConnectionFailed {
            reason: "no matching device found".to_string(),
        })?;

    let _state_handle = manager.on_connection_change(|state| {
        if *state == ConnectionState::Lost {
            println!("\nConnection lost. Restart to reconnect.");
        }
    });

    println!("Connecting to {}...\n", device);
    manager.connect(&device).await?;

    println!("Connected! Monitoring telemetry...");
    println!("Press Ctrl+C to exit.\n");

    // Monitor loop
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\n\nExiting...");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                if !manager.state().is_connected() {
                    break;
                }
                display_frame(&manager, manager.latest_frame());
            }
        }
    }

    manager.shutdown().await?;

    Ok(())
}

fn display_frame(manager: &LinkManager, frame: Option<SensorFrame>) {
    // Clear screen and move cursor to top
    print!("\x1B[2J\x1B[1;1H");

    println!("=== Telemetry Monitor ===");
    if let Some(device) = manager.active_device() {
        println!("Device: {}", device);
    }
    println!("Connection: {}", manager.state());

    let stats = manager.hub().stats();
    println!(
        "Frames: {}  Dropped records: {}\n",
        stats.frames_published, stats.decode_errors
    );

    let Some(frame) = frame else {
        println!("Waiting for data...");
        return;
    };

    let gyro = frame.gyro();
    let accel = frame.accel();
    let tilt = frame.tilt();

    println!("Gyroscope:     x {:>8.3}  y {:>8.3}  z {:>8.3}", gyro.x, gyro.y, gyro.z);
    println!(
        "Accelerometer: x {:>8.3}  y {:>8.3}  z {:>8.3}  |a| {:.3} g ({:.2} m/s²)",
        accel.x,
        accel.y,
        accel.z,
        accel.magnitude(),
        g_to_mps2(accel.magnitude())
    );
    println!("Tilt:          x {:>8.2}° y {:>8.2}°", tilt.x, tilt.y);
    println!("Stroke:        {:.4} m", frame.z_stroke());
    println!("Temperature:   {:.1}°C", frame.temperature());
}
