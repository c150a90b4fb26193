//! Diagnostic monitor.
//!
//! Connects to one hub and logs the device directory, every update
//! (report/poll/force), every heartbeat, and every availability
//! transition until interrupted. Deliberately frameworkless: two
//! positional arguments, structured logs, ctrl-c to exit.

use std::process::ExitCode;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use shadelink_core::{Bridge, BridgeConfig, BridgeError};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_target(false)
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(ip), Some(key)) = (args.next(), args.next()) else {
        eprintln!("usage: shadelink-monitor <hub-ip> <key>");
        return ExitCode::from(2);
    };

    if let Err(e) = run(ip, key).await {
        error!(error = %e, "monitor failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(ip: String, key: String) -> Result<(), BridgeError> {
    let bridge = Bridge::new(BridgeConfig::new(ip, key))?;
    bridge.start().await?;
    info!(
        bridge = %bridge.name(),
        mac = bridge.id().as_deref().unwrap_or("?"),
        "connected"
    );

    for blind in bridge.list_devices().await? {
        info!(
            mac = %blind.mac,
            name = %blind.name,
            model = %blind.model,
            operation = %blind.state.operation,
            position = blind.state.position,
            battery = blind.state.battery_level,
            rssi = blind.state.signal_strength,
            "device"
        );
    }

    let mut updates = bridge.subscribe_updates();
    let mut heartbeats = bridge.client().subscribe_heartbeats();
    let mut availability = bridge.availability().subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => {
                if let Ok(update) = update {
                    info!(
                        origin = %update.origin,
                        mac = %update.device.mac,
                        operation = %update.device.state.operation,
                        position = update.device.state.position,
                        battery = update.device.state.battery_level,
                        "update"
                    );
                }
            }
            heartbeat = heartbeats.recv() => {
                if let Ok(hb) = heartbeat {
                    let devices = hb.data.as_ref().map(|d| d.number_of_devices);
                    info!(mac = %hb.mac, devices, "heartbeat");
                }
            }
            change = availability.recv() => {
                match change {
                    Ok(change) if change.available => info!("hub available"),
                    Ok(change) => warn!(error = ?change.error, "hub unavailable"),
                    Err(_) => break,
                }
            }
        }
    }

    info!("shutting down");
    bridge.close().await;
    Ok(())
}
