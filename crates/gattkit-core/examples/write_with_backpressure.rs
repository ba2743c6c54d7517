//! Example: Write Throughput with Backpressure
//!
//! Streams a payload to a peripheral using write-without-response. The
//! engine's credit accounting keeps the pipeline within the stack's
//! buffer: writes fail fast with `Backpressure` once the credits run
//! out, and resume after the transport reports its buffer drained.
//!
//! A mock transport plays the stack so the example runs without BLE
//! hardware; the drain indications it injects stand in for the real
//! stack catching up over the air.
//!
//! Run with: `cargo run --example write_with_backpressure`

use std::time::Duration;

use gattkit_core::mock::MockTransport;
use gattkit_core::{
    Adapter, AdapterEvent, AdapterState, BleUuid, CharacteristicInfo, CharacteristicProperties,
    DeviceId, Error, LinkInfo, PeripheralEvent, PeripheralEventReceiver, ServiceInfo,
    TransportEvent, WriteMode,
};

/// Nordic UART service and its RX characteristic, a common write sink.
const UART_SERVICE: BleUuid = BleUuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
const UART_RX: BleUuid = BleUuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
const UART_RX_HANDLE: u16 = 0x0012;

fn uart_service() -> Vec<ServiceInfo> {
    vec![ServiceInfo {
        uuid: UART_SERVICE,
        is_primary: true,
        characteristics: vec![CharacteristicInfo {
            uuid: UART_RX,
            handle: UART_RX_HANDLE,
            properties: CharacteristicProperties::WRITE
                | CharacteristicProperties::WRITE_WITHOUT_RESPONSE,
            descriptors: Vec::new(),
        }],
    }]
}

async fn wait_for(
    events: &mut PeripheralEventReceiver,
    wanted: impl Fn(&PeripheralEvent) -> bool,
) {
    while let Ok(event) = events.recv().await {
        if wanted(&event) {
            return;
        }
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

    // A link with the default 23-byte MTU and room for two buffered
    // write commands.
    let id = DeviceId::from("AA:BB:CC:DD:EE:01");
    let peripheral = adapter.connect(&id).await?;
    let mut events = peripheral.subscribe();
    transport.indicate(TransportEvent::ConnectionResult {
        id: id.clone(),
        result: Ok(LinkInfo { mtu: Some(23), write_credits: Some(2) }),
    });
    wait_for(&mut events, |e| matches!(e, PeripheralEvent::Connected { .. })).await;

    peripheral.discover_services(&[UART_SERVICE]).await?;
    transport.indicate(TransportEvent::ServicesDiscovered {
        id: id.clone(),
        result: Ok(uart_service()),
    });
    wait_for(&mut events, |e| matches!(e, PeripheralEvent::DiscoveryCompleted { .. })).await;

    let payload: Vec<u8> = (0u8..200).collect();
    let chunk_size = peripheral.maximum_write_length(WriteMode::WithoutResponse);
    println!(
        "Streaming {} bytes in {chunk_size}-byte chunks, {} credits available",
        payload.len(),
        peripheral.available_write_credits().await,
    );
    println!();

    let mut sent = 0;
    for chunk in payload.chunks(chunk_size) {
        loop {
            match peripheral.write(UART_RX, chunk, WriteMode::WithoutResponse).await {
                Ok(()) => {
                    sent += chunk.len();
                    println!(
                        "  sent {sent:3} / {} bytes ({} credits left)",
                        payload.len(),
                        peripheral.available_write_credits().await,
                    );
                    break;
                }
                Err(Error::Backpressure) => {
                    // The stack's buffer is full; simulate it draining
                    // one command over the air.
                    println!("  backpressure, waiting for the buffer to drain");
                    transport.indicate(TransportEvent::WriteBufferDrained {
                        id: id.clone(),
                        credits: 1,
                    });
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    println!();
    println!("Done.");
    adapter.shutdown().await;
    Ok(())
}
