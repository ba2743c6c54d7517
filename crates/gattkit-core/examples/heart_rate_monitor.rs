//! Example: Heart Rate Monitor
//!
//! Connects to a heart rate sensor, discovers its GATT database,
//! subscribes to the heart rate measurement characteristic, and prints
//! the notified measurements. Everything after `connect` is event
//! driven: each request returns once accepted and its outcome arrives on
//! the peripheral's event stream.
//!
//! A mock transport scripts the sensor's side of the exchange so the
//! example runs without BLE hardware.
//!
//! Run with: `cargo run --example heart_rate_monitor`

use gattkit_core::mock::MockTransport;
use gattkit_core::{
    Adapter, AdapterEvent, AdapterState, CharacteristicInfo, CharacteristicProperties,
    DescriptorInfo, DeviceId, DisconnectReason, LinkInfo, PeripheralEvent, ServiceInfo,
    TransportEvent, uuids,
};

const HRM_HANDLE: u16 = 0x0020;

fn heart_rate_service() -> Vec<ServiceInfo> {
    vec![ServiceInfo {
        uuid: uuids::HEART_RATE_SERVICE,
        is_primary: true,
        characteristics: vec![CharacteristicInfo {
            uuid: uuids::HEART_RATE_MEASUREMENT,
            handle: HRM_HANDLE,
            properties: CharacteristicProperties::NOTIFY,
            descriptors: vec![DescriptorInfo {
                uuid: uuids::CLIENT_CHARACTERISTIC_CONFIGURATION,
                handle: HRM_HANDLE + 1,
            }],
        }],
    }]
}

/// Pulls the beats-per-minute field out of a heart rate measurement.
///
/// The first byte carries flags; bit 0 selects an 8 or 16 bit value.
fn parse_bpm(value: &[u8]) -> Option<u16> {
    match value {
        [flags, bpm, ..] if flags & 0x01 == 0 => Some(u16::from(*bpm)),
        [flags, lo, hi, ..] if flags & 0x01 != 0 => Some(u16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let (transport, indications) = MockTransport::new();
    let adapter = Adapter::new(transport.clone(), indications);

    let mut adapter_events = adapter.subscribe();
    transport.indicate(TransportEvent::AdapterStateChanged { state: AdapterState::PoweredOn });
    while let Ok(event) = adapter_events.recv().await {
        if matches!(event, AdapterEvent::StateChanged { state: AdapterState::PoweredOn }) {
            break;
        }
    }

    let id = DeviceId::from("AA:BB:CC:DD:EE:01");
    println!("Connecting to {id}...");

    let peripheral = adapter.connect(&id).await?;
    let mut events = peripheral.subscribe();

    // The sensor accepts the connection with a negotiated MTU.
    transport.indicate(TransportEvent::ConnectionResult {
        id: id.clone(),
        result: Ok(LinkInfo::with_mtu(185)),
    });

    let mut received = 0u32;
    while let Ok(event) = events.recv().await {
        match event {
            PeripheralEvent::Connected { mtu } => {
                println!("Connected (MTU {mtu}). Discovering services...");
                peripheral.discover_services(&[uuids::HEART_RATE_SERVICE]).await?;
                transport.indicate(TransportEvent::ServicesDiscovered {
                    id: id.clone(),
                    result: Ok(heart_rate_service()),
                });
            }
            PeripheralEvent::DiscoveryCompleted { services } => {
                println!("Discovered {services} service(s). Subscribing...");
                peripheral.set_notify(uuids::HEART_RATE_MEASUREMENT, true).await?;
                transport.indicate(TransportEvent::SubscriptionResult {
                    id: id.clone(),
                    handle: HRM_HANDLE,
                    enabled: true,
                    result: Ok(()),
                });
            }
            PeripheralEvent::SubscriptionChanged { enabled: true, .. } => {
                println!("Subscribed. Streaming measurements:");
                println!();
                for bpm in [72u8, 74, 71, 77, 75] {
                    transport.indicate(TransportEvent::ValueNotified {
                        id: id.clone(),
                        handle: HRM_HANDLE,
                        value: vec![0x00, bpm],
                    });
                }
            }
            PeripheralEvent::ValueUpdated { value, .. } => {
                match parse_bpm(&value) {
                    Some(bpm) => println!("  {bpm} bpm"),
                    None => println!("  unparsed measurement: {value:02x?}"),
                }
                received += 1;
                if received == 5 {
                    println!();
                    println!("Disconnecting...");
                    peripheral.disconnect().await?;
                    transport.indicate(TransportEvent::DisconnectionObserved {
                        id: id.clone(),
                        reason: DisconnectReason::Requested,
                    });
                }
            }
            PeripheralEvent::Disconnected { reason } => {
                println!("Disconnected: {reason}");
                break;
            }
            _ => {}
        }
    }

    adapter.shutdown().await;
    Ok(())
}
