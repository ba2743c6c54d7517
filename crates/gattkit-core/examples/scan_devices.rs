//! Example: Scanning for BLE Devices
//!
//! This example drives a scan session end to end: adapter power-up,
//! filtered scanning with duplicate suppression, and the auto-stop
//! deadline. A mock transport plays the part of the platform stack so
//! the example runs without BLE hardware; swap in a real transport and
//! the engine code stays the same.
//!
//! Run with: `cargo run --example scan_devices`

use std::time::Duration;

use gattkit_core::mock::MockTransport;
use gattkit_core::{Adapter, AdapterEvent, AdapterState, ScanOptions, TransportEvent, uuids};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let (transport, indications) = MockTransport::new();
    let adapter = Adapter::new(transport.clone(), indications);
    let mut events = adapter.subscribe();

    // Power the adapter on and wait until the engine has seen it.
    transport.indicate(TransportEvent::AdapterStateChanged { state: AdapterState::PoweredOn });
    while let Ok(event) = events.recv().await {
        if matches!(event, AdapterEvent::StateChanged { state: AdapterState::PoweredOn }) {
            break;
        }
    }

    println!("Scanning for heart rate sensors...");
    println!();

    let options = ScanOptions::new()
        .service_filter(vec![uuids::HEART_RATE_SERVICE])
        .duration(Duration::from_secs(2));
    adapter.start_scan(options).await?;

    // Simulate a few sensors advertising; the first one twice, to show
    // duplicate suppression.
    let sim = transport.clone();
    tokio::spawn(async move {
        let sensors = [
            ("AA:BB:CC:DD:EE:01", "Polar H10", -48),
            ("AA:BB:CC:DD:EE:01", "Polar H10", -51),
            ("AA:BB:CC:DD:EE:02", "Wahoo TICKR", -63),
            ("AA:BB:CC:DD:EE:03", "Garmin HRM-Dual", -71),
        ];
        for (id, name, rssi) in sensors {
            tokio::time::sleep(Duration::from_millis(250)).await;
            sim.indicate(TransportEvent::AdvertisementObserved {
                id: id.into(),
                local_name: Some(name.to_string()),
                services: vec![uuids::HEART_RATE_SERVICE],
                rssi: Some(rssi),
            });
        }
    });

    while let Ok(event) = events.recv().await {
        match event {
            AdapterEvent::DeviceDiscovered { device } => {
                let rssi = device
                    .rssi
                    .map(|r| format!("{r} dBm"))
                    .unwrap_or_else(|| "N/A".to_string());
                println!("  {device}");
                println!("    RSSI: {rssi}");
                println!();
            }
            AdapterEvent::ScanStopped => {
                println!("Scan finished.");
                break;
            }
            _ => {}
        }
    }

    adapter.shutdown().await;
    Ok(())
}
