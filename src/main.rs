use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use log::{debug, warn};

use bluelink::bluetooth::{
    BluetoothAdapter, BtleAdapter, ConnectionEvent, ConnectionFactory, DeviceRecord, ScanEvent,
};
use bluelink::config::{AppConfig, LogLevel};
use bluelink::logging::{configure_logging, set_debug_flags, DebugFlags};
use bluelink::{ConnectionCoordinator, CoordinatorHandle};

#[tokio::main]
async fn main() {
    human_panic::setup_panic!();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");

    let result = match command {
        "scan" => run(|handle| async move { scan(&handle).await.map(|_| ()) }).await,
        "connect" => match args.get(2) {
            Some(target) => {
                let target = target.clone();
                run(move |handle| async move { connect(&handle, &target).await }).await
            }
            None => Err(anyhow!("connect needs a device name, address or id")),
        },
        _ => {
            print_usage();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Load settings, set up logging, start a coordinator and hand it to `command`
async fn run<F, Fut>(command: F) -> anyhow::Result<()>
where
    F: FnOnce(CoordinatorHandle) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let config = AppConfig::load().context("Failed to load settings")?;
    init_logging(&config)?;

    let adapter = match BtleAdapter::default_adapter()
        .await
        .context("Failed to open the Bluetooth adapter")?
    {
        Some(adapter) => Arc::new(adapter),
        None => bail!("Bluetooth is not supported on this system"),
    };

    let factory: Arc<dyn ConnectionFactory> = adapter.clone();
    let adapter: Arc<dyn BluetoothAdapter> = adapter;
    let handle =
        ConnectionCoordinator::new(Some(adapter), factory, config.to_coordinator_config()).spawn();

    let result = command(handle.clone()).await;
    if let Err(e) = handle.shutdown().await {
        debug!("Coordinator already stopped: {}", e);
    }
    result
}

fn init_logging(config: &AppConfig) -> anyhow::Result<()> {
    if std::env::var_os("RUST_LOG").is_some() {
        env_logger::init();
        return Ok(());
    }

    if let Ok(categories) = std::env::var("BLUELINK_DEBUG") {
        let flags = DebugFlags::parse(&categories)
            .map_err(|category| anyhow!("Unknown debug category '{}'", category))?;
        set_debug_flags(flags);
    }

    let level = if std::env::var_os("BLUELINK_DEBUG").is_some() {
        LogLevel::Debug
    } else {
        config.log_level
    };
    configure_logging(level, config.log_file.clone(), true).map_err(|e| anyhow!(e))
}

/// Print devices until the scan window closes
async fn scan(handle: &CoordinatorHandle) -> anyhow::Result<Vec<DeviceRecord>> {
    println!("Scanning for devices...");
    let mut subscription = handle.scan_for_devices().await?;
    let mut seen: Vec<DeviceRecord> = Vec::new();

    while let Some(event) = subscription.next_event().await {
        match event {
            ScanEvent::DeviceDiscovered(record) => {
                if !seen.iter().any(|known| known.device() == record.device()) {
                    println!("{}\n{}\n", record.display_title(), record.describe());
                }
                seen.retain(|known| known.device() != record.device());
                seen.push(record);
            }
            ScanEvent::Error(e) => bail!("Scan failed: {} ({})", e, e.code()),
            ScanEvent::ScanCompleted => break,
        }
    }

    println!("Scan complete, {} device(s) found", seen.len());
    Ok(seen)
}

/// Scan, pick the device matching `target` and connect to it
async fn connect(handle: &CoordinatorHandle, target: &str) -> anyhow::Result<()> {
    let devices = scan(handle).await?;
    let device = devices
        .iter()
        .find(|record| {
            record.name() == Some(target)
                || record.address() == Some(target)
                || record.device().as_str() == target
        })
        .ok_or_else(|| anyhow!("No device matching '{}' was found", target))?;

    println!("Connecting to {}...", device.display_title());
    let mut subscription = handle.connect_to_device(device.device().clone()).await?;

    match subscription.next_event().await {
        Some(ConnectionEvent::ConnectionSuccessful) => {
            println!("Connected to {}. Press Ctrl+C to disconnect.", device.display_title());
        }
        Some(ConnectionEvent::ConnectionError(e)) => bail!("Connection failed: {}", e),
        Some(ConnectionEvent::ConnectionEnded) | None => bail!("Connection ended unexpectedly"),
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl+C")?;
    handle.disconnect_from_current_device().await?;

    match subscription.next_event().await {
        Some(ConnectionEvent::ConnectionEnded) => println!("Disconnected"),
        other => warn!("Unexpected event after disconnect: {:?}", other),
    }
    Ok(())
}

fn print_usage() {
    println!("bluelink - Bluetooth discovery and connection");
    println!("\nUsage:");
    println!("  bluelink scan                        - Scan until discovery goes idle");
    println!("  bluelink connect <name|address|id>   - Scan, then connect to a device");
    println!("  bluelink help                        - Show this message");
    println!("\nSet BLUELINK_DEBUG=discovery,connection for debug output,");
    println!("or RUST_LOG to use env_logger instead.");
}
