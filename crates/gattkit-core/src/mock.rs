//! Mock transport implementation for testing.
//!
//! This module provides a mock transport that can be used for unit and
//! integration testing without requiring actual BLE hardware.
//!
//! The [`MockTransport`] implements the [`Transport`] trait, allowing it
//! to drive a full engine in tests and examples.
//!
//! # Features
//!
//! - **Command recording**: every accepted request is appended to a log
//!   tests can assert against
//! - **Failure injection**: refuse the next N requests, or all of them,
//!   with a configurable error code
//! - **Indication driving**: push [`TransportEvent`]s into the engine as
//!   if the stack had reported them

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use async_trait::async_trait;

use gattkit_types::{BleUuid, DeviceId, WriteMode};

use crate::transport::{
    IndicationReceiver, IndicationSender, Transport, TransportError, TransportEvent,
    indication_channel,
};

/// Default injected failure code, the catch-all GATT error status.
const DEFAULT_FAILURE_CODE: i32 = 133;

/// A request the engine issued to the transport, as recorded by
/// [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Command {
    StartScan { filter: Vec<BleUuid>, allow_duplicates: bool },
    StopScan,
    Connect { id: DeviceId },
    Disconnect { id: DeviceId },
    DiscoverServices { id: DeviceId, filter: Vec<BleUuid> },
    Read { id: DeviceId, handle: u16 },
    Write { id: DeviceId, handle: u16, value: Vec<u8>, mode: WriteMode },
    SetSubscription { id: DeviceId, handle: u16, enabled: bool },
}

/// A scripted transport for testing the engine without BLE hardware.
///
/// # Example
///
/// ```
/// use gattkit_core::adapter::Adapter;
/// use gattkit_core::events::AdapterEvent;
/// use gattkit_core::mock::MockTransport;
/// use gattkit_core::transport::TransportEvent;
/// use gattkit_types::AdapterState;
///
/// #[tokio::main]
/// async fn main() {
///     let (transport, indications) = MockTransport::new();
///     let adapter = Adapter::new(transport.clone(), indications);
///     let mut events = adapter.subscribe();
///
///     transport.indicate(TransportEvent::AdapterStateChanged {
///         state: AdapterState::PoweredOn,
///     });
///
///     let event = events.recv().await.unwrap();
///     assert_eq!(event, AdapterEvent::StateChanged { state: AdapterState::PoweredOn });
/// }
/// ```
pub struct MockTransport {
    commands: Mutex<Vec<Command>>,
    indications: IndicationSender,
    should_fail: AtomicBool,
    failure_code: AtomicI32,
    remaining_failures: AtomicU32,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("commands", &self.command_count())
            .field("should_fail", &self.should_fail.load(Ordering::Relaxed))
            .finish()
    }
}

impl MockTransport {
    /// Create a mock transport and the indication receiver to hand to
    /// the engine.
    pub fn new() -> (std::sync::Arc<Self>, IndicationReceiver) {
        let (indications, receiver) = indication_channel();
        let transport = std::sync::Arc::new(Self {
            commands: Mutex::new(Vec::new()),
            indications,
            should_fail: AtomicBool::new(false),
            failure_code: AtomicI32::new(DEFAULT_FAILURE_CODE),
            remaining_failures: AtomicU32::new(0),
        });
        (transport, receiver)
    }

    /// Push a transport event into the engine, as if the stack had
    /// reported it.
    pub fn indicate(&self, event: TransportEvent) {
        // A closed channel only means the engine has shut down.
        let _ = self.indications.send(event);
    }

    fn record(&self, command: Command) -> Result<(), TransportError> {
        self.check_failure()?;
        self.commands
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(command);
        Ok(())
    }

    fn check_failure(&self) -> Result<(), TransportError> {
        if self.remaining_failures.load(Ordering::Relaxed) > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(self.failure());
        }
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(self.failure());
        }
        Ok(())
    }

    fn failure(&self) -> TransportError {
        TransportError::new(
            self.failure_code.load(Ordering::Relaxed),
            "injected transport failure",
        )
    }

    // --- Test control methods ---

    /// Make every request fail until cleared.
    ///
    /// Refused requests are not recorded in the command log.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    /// Fail the next `count` requests, then succeed again.
    pub fn set_transient_failures(&self, count: u32) {
        self.remaining_failures.store(count, Ordering::Relaxed);
    }

    /// Change the error code injected failures carry.
    ///
    /// Defaults to 133, the generic GATT error status.
    pub fn set_failure_code(&self, code: i32) {
        self.failure_code.store(code, Ordering::Relaxed);
    }

    /// All commands recorded so far, oldest first.
    pub fn commands(&self) -> Vec<Command> {
        self.commands
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Number of commands recorded so far.
    pub fn command_count(&self) -> usize {
        self.commands
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Empty the command log.
    pub fn clear_commands(&self) {
        self.commands
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn start_scan(
        &self,
        filter: &[BleUuid],
        allow_duplicates: bool,
    ) -> Result<(), TransportError> {
        self.record(Command::StartScan { filter: filter.to_vec(), allow_duplicates })
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.record(Command::StopScan)
    }

    async fn connect(&self, id: &DeviceId) -> Result<(), TransportError> {
        self.record(Command::Connect { id: id.clone() })
    }

    async fn disconnect(&self, id: &DeviceId) -> Result<(), TransportError> {
        self.record(Command::Disconnect { id: id.clone() })
    }

    async fn discover_services(
        &self,
        id: &DeviceId,
        filter: &[BleUuid],
    ) -> Result<(), TransportError> {
        self.record(Command::DiscoverServices { id: id.clone(), filter: filter.to_vec() })
    }

    async fn read(&self, id: &DeviceId, handle: u16) -> Result<(), TransportError> {
        self.record(Command::Read { id: id.clone(), handle })
    }

    async fn write(
        &self,
        id: &DeviceId,
        handle: u16,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError> {
        self.record(Command::Write { id: id.clone(), handle, value: value.to_vec(), mode })
    }

    async fn set_subscription(
        &self,
        id: &DeviceId,
        handle: u16,
        enabled: bool,
    ) -> Result<(), TransportError> {
        self.record(Command::SetSubscription { id: id.clone(), handle, enabled })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gattkit_types::AdapterState;

    #[tokio::test]
    async fn test_mock_records_commands_in_order() {
        let (transport, _indications) = MockTransport::new();
        let id = DeviceId::from("AA:BB:CC:DD:EE:FF");

        transport.connect(&id).await.unwrap();
        transport.read(&id, 0x20).await.unwrap();
        transport
            .write(&id, 0x20, &[0x01, 0x02], WriteMode::WithResponse)
            .await
            .unwrap();

        assert_eq!(
            transport.commands(),
            vec![
                Command::Connect { id: id.clone() },
                Command::Read { id: id.clone(), handle: 0x20 },
                Command::Write {
                    id,
                    handle: 0x20,
                    value: vec![0x01, 0x02],
                    mode: WriteMode::WithResponse,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_mock_failure_injection_skips_recording() {
        let (transport, _indications) = MockTransport::new();
        transport.set_should_fail(true);

        let err = transport.stop_scan().await.unwrap_err();
        assert_eq!(err.code, DEFAULT_FAILURE_CODE);
        assert_eq!(transport.command_count(), 0);

        transport.set_should_fail(false);
        transport.stop_scan().await.unwrap();
        assert_eq!(transport.command_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_transient_failures() {
        let (transport, _indications) = MockTransport::new();
        transport.set_transient_failures(2);

        assert!(transport.stop_scan().await.is_err());
        assert!(transport.stop_scan().await.is_err());
        assert!(transport.stop_scan().await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_custom_failure_code() {
        let (transport, _indications) = MockTransport::new();
        transport.set_should_fail(true);
        transport.set_failure_code(0x0e);

        let err = transport.stop_scan().await.unwrap_err();
        assert_eq!(err.code, 0x0e);
    }

    #[tokio::test]
    async fn test_mock_indications_reach_receiver() {
        let (transport, mut indications) = MockTransport::new();

        transport.indicate(TransportEvent::AdapterStateChanged { state: AdapterState::PoweredOn });

        match indications.recv().await {
            Some(TransportEvent::AdapterStateChanged { state }) => {
                assert_eq!(state, AdapterState::PoweredOn);
            }
            other => panic!("unexpected indication: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mock_clear_commands() {
        let (transport, _indications) = MockTransport::new();
        transport.stop_scan().await.unwrap();
        assert_eq!(transport.command_count(), 1);

        transport.clear_commands();
        assert_eq!(transport.command_count(), 0);
    }
}
