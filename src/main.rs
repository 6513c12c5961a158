//! Print everything a BLE UART peripheral sends until Ctrl-C.

use ble_uart_serial::{init_logger, BleUart, BtleplugTransport, OpenMode, SettingsService};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Parser)]
#[command(name = "bleuart-monitor")]
#[command(about = "Read a Nordic UART Service peripheral like a serial port")]
struct Args {
    /// Bluetooth adapter to use, by position in the platform's list
    #[arg(long)]
    adapter: Option<usize>,

    /// Advertised device name
    #[arg(short, long)]
    name: Option<String>,

    /// Device address; takes precedence over --name
    #[arg(short, long)]
    address: Option<String>,

    /// Open mode: "r", "w" or "rw"
    #[arg(short, long)]
    mode: Option<OpenMode>,

    /// List nearby devices and exit
    #[arg(long)]
    scan: bool,

    /// Settings file (defaults to the per-user config directory)
    #[arg(long)]
    settings: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = match &args.settings {
        Some(path) => SettingsService::from_path(path),
        None => SettingsService::new()?,
    };
    let _log_guard = init_logger(&settings.get().log_settings)?;

    let adapter_index = args.adapter.unwrap_or(settings.get().adapter_index);
    let transport = BtleplugTransport::with_adapter_index(adapter_index);
    let mut uart = BleUart::with_settings(transport, settings.get());

    if args.scan {
        let devices = uart.scan().await?;
        if devices.is_empty() {
            println!("No devices found");
        }
        for device in devices {
            println!("{:<24} {}  {} dBm", device.name, device.address, device.rssi);
        }
        uart.close().await;
        return Ok(());
    }

    let config = settings.get();
    let name = args.name.or_else(|| config.device_name.clone());
    let address = args
        .address
        .or_else(|| config.device_address.clone())
        .or_else(|| {
            // Fall back to the last device only when nothing else names one
            name.is_none()
                .then(|| config.last_connected_address.clone())
                .flatten()
        });
    let mode = args.mode.unwrap_or(config.mode);

    uart.connect(name.as_deref(), address.as_deref(), mode).await?;
    if let Some(target) = uart.target() {
        println!("Connected to {}", target);
        let address = target.address.clone();
        if let Err(e) = settings.remember_device(&address) {
            warn!("Failed to save settings - {}", e);
        }
    }
    if let Some(rssi) = uart.get_rssi() {
        info!("RSSI {} dBm", rssi);
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {
                while let Some(chunk) = uart.read() {
                    print!("{}", String::from_utf8_lossy(&chunk));
                }
                std::io::stdout().flush()?;
                if !uart.check_link().await {
                    warn!("Device disconnected");
                    break;
                }
            }
        }
    }

    uart.close().await;
    Ok(())
}
