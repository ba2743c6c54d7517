//! The adapter: engine entry point, scan sessions, and connection registry.
//!
//! An [`Adapter`] owns one transport and a background pump task that
//! drains the transport's indication channel. All state changes flow
//! through that single pump, which is what gives events their per-source
//! ordering. Public methods validate against current state, hand a
//! request to the transport, and return; outcomes arrive as events.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gattkit_types::{
    AdapterState, BleUuid, ConnectionState, DeviceId, DisconnectReason, DiscoveredDevice,
};

use crate::error::{Error, Result};
use crate::events::{AdapterEvent, AdapterEventReceiver, EventDispatcher, FailureReason};
use crate::peripheral::{Peripheral, PeripheralShared};
use crate::scan::{DeviceStream, ScanOptions, ScanState};
use crate::transport::{IndicationReceiver, Transport, TransportEvent};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_EVENT_CAPACITY: usize = 100;
const DEFAULT_WRITE_CREDITS: u16 = 4;

/// Engine tuning knobs: deadlines, event buffering, and flow control.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use gattkit_core::EngineConfig;
///
/// let config = EngineConfig::new()
///     .connect_timeout(Duration::from_secs(5))
///     .operation_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a connection attempt may remain unanswered before the
    /// engine fails it. Default: 15 seconds.
    pub connect_timeout: Duration,
    /// How long a service discovery may run before the engine fails it.
    /// Default: 20 seconds.
    pub discovery_timeout: Duration,
    /// How long a read, acknowledged write, or subscription change may
    /// remain unanswered before the engine fails it. Default: 10 seconds.
    pub operation_timeout: Duration,
    /// Events buffered per subscriber on each event channel.
    /// Default: 100.
    pub event_capacity: usize,
    /// Write-without-response credits assumed when the transport does not
    /// report a buffer depth. Default: 4.
    pub default_write_credits: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            default_write_credits: DEFAULT_WRITE_CREDITS,
        }
    }
}

impl EngineConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Short deadlines for benches and tests against nearby peripherals.
    pub fn fast() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            discovery_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(3),
            ..Self::default()
        }
    }

    /// Generous deadlines for noisy RF environments or slow peripherals.
    pub fn high_latency() -> Self {
        Self {
            connect_timeout: Duration::from_secs(40),
            discovery_timeout: Duration::from_secs(40),
            operation_timeout: Duration::from_secs(30),
            ..Self::default()
        }
    }

    /// Sets the connection attempt deadline.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the service discovery deadline.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Sets the characteristic operation deadline.
    #[must_use]
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Sets the per-subscriber event buffer size.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Sets the write-without-response credits assumed when the transport
    /// does not report a buffer depth.
    #[must_use]
    pub fn default_write_credits(mut self, credits: u16) -> Self {
        self.default_write_credits = credits;
        self
    }
}

/// A central-role BLE engine bound to one transport.
///
/// `Adapter` is deliberately not `Clone`: it owns the pump task and the
/// connection registry. Wrap it in an [`Arc`] to share it across tasks.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use gattkit_core::{Adapter, ScanOptions};
/// # use gattkit_core::mock::MockTransport;
///
/// # async fn run() -> gattkit_core::Result<()> {
/// let (transport, indications) = MockTransport::new();
/// let adapter = Adapter::new(transport, indications);
///
/// let mut events = adapter.subscribe();
/// adapter.start_scan(ScanOptions::new()).await?;
/// while let Ok(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct Adapter {
    shared: Arc<Shared>,
    cancel_token: CancellationToken,
    pump: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Adapter {
    /// Creates an adapter over `transport` with default configuration.
    ///
    /// `indications` is the receiving half of the channel the transport
    /// delivers its events on; see
    /// [`indication_channel`](crate::transport::indication_channel).
    ///
    /// Must be called within a Tokio runtime: the adapter spawns its
    /// event pump immediately.
    pub fn new(transport: Arc<dyn Transport>, indications: IndicationReceiver) -> Self {
        Self::with_config(transport, indications, EngineConfig::default())
    }

    /// Creates an adapter with an explicit configuration.
    pub fn with_config(
        transport: Arc<dyn Transport>,
        indications: IndicationReceiver,
        config: EngineConfig,
    ) -> Self {
        let event_capacity = config.event_capacity;
        let shared = Arc::new(Shared {
            transport,
            config,
            closed: AtomicBool::new(false),
            op_counter: AtomicU64::new(0),
            state: RwLock::new(AdapterState::Unknown),
            scan: Mutex::new(None),
            connections: RwLock::new(HashMap::new()),
            events: EventDispatcher::new(event_capacity),
        });
        let cancel_token = CancellationToken::new();
        let pump = tokio::spawn(run_pump(Arc::clone(&shared), indications, cancel_token.clone()));

        Self { shared, cancel_token, pump: std::sync::Mutex::new(Some(pump)) }
    }

    /// The engine configuration in effect.
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// The last adapter state reported by the transport.
    pub async fn state(&self) -> AdapterState {
        *self.shared.state.read().await
    }

    /// Whether a scan session is currently active.
    pub async fn is_scanning(&self) -> bool {
        self.shared.scan.lock().await.is_some()
    }

    /// Number of live connections, including ones still connecting or
    /// disconnecting.
    pub async fn connection_count(&self) -> usize {
        self.shared.connections.read().await.len()
    }

    /// Subscribes to adapter-level events.
    pub fn subscribe(&self) -> AdapterEventReceiver {
        self.shared.events.subscribe()
    }

    /// Returns scan discoveries as a [`DeviceStream`].
    pub fn device_stream(&self) -> DeviceStream {
        DeviceStream::new(self.shared.events.subscribe())
    }

    /// Starts a scan session.
    ///
    /// Fails with [`Error::AdapterUnavailable`] unless the adapter is
    /// powered on and with [`Error::AlreadyScanning`] if a session is
    /// already active; neither failure reaches the transport. Sightings
    /// arrive as [`AdapterEvent::DeviceDiscovered`] and the session end as
    /// [`AdapterEvent::ScanStopped`].
    pub async fn start_scan(&self, options: ScanOptions) -> Result<()> {
        self.shared.start_scan(options).await
    }

    /// Stops the active scan session.
    ///
    /// Stopping when no session is active is a no-op success.
    pub async fn stop_scan(&self) -> Result<()> {
        self.shared.stop_scan().await
    }

    /// Initiates a connection and returns a handle to it.
    ///
    /// The returned [`Peripheral`] starts in
    /// [`Connecting`](ConnectionState::Connecting); subscribe to it and
    /// wait for [`Connected`](crate::PeripheralEvent::Connected) or
    /// [`ConnectFailed`](crate::PeripheralEvent::ConnectFailed). If the
    /// transport reports nothing within the configured connect timeout the
    /// engine fails the attempt itself.
    pub async fn connect(&self, id: &DeviceId) -> Result<Peripheral> {
        self.shared.connect(id).await
    }

    /// Returns a handle to a live connection, if one exists for `id`.
    pub async fn peripheral(&self, id: &DeviceId) -> Option<Peripheral> {
        let inner = self.shared.connection(id).await?;
        Some(Peripheral::from_parts(Arc::clone(&self.shared), inner))
    }

    /// Shuts the engine down: ends the scan session, disconnects every
    /// live connection, and stops the event pump.
    ///
    /// Subsequent scan and connect calls fail with [`Error::Cancelled`].
    pub async fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.shutdown().await;
        self.cancel_token.cancel();
        let pump = match self.pump.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(handle) = pump {
            let _ = handle.await;
        }
        debug!("Adapter shut down");
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        if let Ok(conns) = self.shared.connections.try_read()
            && !conns.is_empty()
        {
            warn!(
                connections = conns.len(),
                "Adapter dropped with live connections; call shutdown() for an orderly teardown"
            );
        }
    }
}

/// Engine state shared between the adapter handle, peripheral handles,
/// the pump task, and timer tasks.
pub(crate) struct Shared {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) config: EngineConfig,
    closed: AtomicBool,
    /// Correlation tokens for deadline timers. Unique across the engine,
    /// so a stale timer can never match a newer operation.
    op_counter: AtomicU64,
    state: RwLock<AdapterState>,
    scan: Mutex<Option<ScanState>>,
    connections: RwLock<HashMap<DeviceId, Arc<PeripheralShared>>>,
    events: EventDispatcher<AdapterEvent>,
}

impl Shared {
    pub(crate) fn next_op_token(&self) -> u64 {
        self.op_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) async fn connection(&self, id: &DeviceId) -> Option<Arc<PeripheralShared>> {
        self.connections.read().await.get(id).cloned()
    }

    pub(crate) async fn remove_connection(&self, id: &DeviceId) {
        self.connections.write().await.remove(id);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    async fn require_powered_on(&self) -> Result<()> {
        let state = *self.state.read().await;
        if state.can_operate() { Ok(()) } else { Err(Error::adapter_unavailable(state)) }
    }

    async fn start_scan(self: &Arc<Self>, options: ScanOptions) -> Result<()> {
        self.ensure_open()?;
        self.require_powered_on().await?;

        let token = self.next_op_token();
        {
            let mut scan = self.scan.lock().await;
            if scan.is_some() {
                return Err(Error::AlreadyScanning);
            }
            *scan = Some(ScanState::new(options.clone(), token));
        }

        match self.transport.start_scan(&options.service_filter, options.allow_duplicates).await {
            Ok(()) => {
                if let Some(duration) = options.duration {
                    self.arm_scan_auto_stop(token, duration).await;
                }
                info!(
                    filter = ?options.service_filter,
                    allow_duplicates = options.allow_duplicates,
                    "Scan session started"
                );
                Ok(())
            }
            Err(err) => {
                let mut scan = self.scan.lock().await;
                if scan.as_ref().is_some_and(|s| s.token == token) {
                    *scan = None;
                }
                Err(err.into())
            }
        }
    }

    async fn arm_scan_auto_stop(self: &Arc<Self>, token: u64, duration: Duration) {
        let shared = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            shared.stop_scan_expired(token).await;
        });

        let mut scan = self.scan.lock().await;
        match scan.as_mut() {
            // The session may have been stopped and a new one started
            // while the transport call was in flight.
            Some(state) if state.token == token => state.auto_stop = Some(handle),
            _ => handle.abort(),
        }
    }

    async fn stop_scan(&self) -> Result<()> {
        self.ensure_open()?;
        let session = self.scan.lock().await.take();
        if session.is_none() {
            debug!("Stop scan requested with no active session");
            return Ok(());
        }
        drop(session);

        self.events.send(AdapterEvent::ScanStopped);
        info!("Scan session stopped");
        self.transport.stop_scan().await?;
        Ok(())
    }

    /// Ends the session whose auto-stop timer fired, if it is still the
    /// active one.
    async fn stop_scan_expired(&self, token: u64) {
        {
            let mut scan = self.scan.lock().await;
            match scan.as_ref() {
                Some(state) if state.token == token => *scan = None,
                _ => return,
            }
        }

        info!("Scan duration elapsed; session stopped");
        self.events.send(AdapterEvent::ScanStopped);
        if let Err(err) = self.transport.stop_scan().await {
            warn!(error = %err, "Transport failed to stop an expired scan");
        }
    }

    async fn connect(self: &Arc<Self>, id: &DeviceId) -> Result<Peripheral> {
        self.ensure_open()?;
        self.require_powered_on().await?;

        let inner = {
            let mut conns = self.connections.write().await;
            if conns.contains_key(id) {
                return Err(Error::AlreadyConnected { id: id.clone() });
            }
            let inner = Arc::new(PeripheralShared::new(id.clone(), self.config.event_capacity));
            conns.insert(id.clone(), Arc::clone(&inner));
            inner
        };

        match self.transport.connect(id).await {
            Ok(()) => {
                self.arm_connect_timer(&inner).await;
                info!(device = %id, "Connection requested");
                Ok(Peripheral::from_parts(Arc::clone(self), inner))
            }
            Err(err) => {
                self.remove_connection(id).await;
                inner.set_state(ConnectionState::Disconnected).await;
                Err(err.into())
            }
        }
    }

    async fn shutdown(&self) {
        let session = self.scan.lock().await.take();
        if session.is_some() {
            self.events.send(AdapterEvent::ScanStopped);
            if let Err(err) = self.transport.stop_scan().await {
                debug!(error = %err, "Transport stop scan during shutdown failed");
            }
        }

        let conns: Vec<_> = self.connections.write().await.drain().map(|(_, c)| c).collect();
        for conn in conns {
            if conn.state().await.is_connected()
                && let Err(err) = self.transport.disconnect(conn.id()).await
            {
                debug!(device = %conn.id(), error = %err, "Transport disconnect during shutdown failed");
            }
            conn.teardown(DisconnectReason::Requested, FailureReason::Cancelled).await;
        }
    }

    pub(crate) async fn handle_indication(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::AdapterStateChanged { state } => self.on_adapter_state(state).await,
            TransportEvent::AdvertisementObserved { id, local_name, services, rssi } => {
                self.on_advertisement(id, local_name, services, rssi).await;
            }
            TransportEvent::ConnectionResult { id, result } => {
                self.on_connection_result(&id, result).await;
            }
            TransportEvent::DisconnectionObserved { id, reason } => {
                self.on_disconnection(&id, reason).await;
            }
            TransportEvent::ServicesDiscovered { id, result } => {
                self.on_services_discovered(&id, result).await;
            }
            TransportEvent::ReadCompleted { id, handle, result } => {
                self.on_read_completed(&id, handle, result).await;
            }
            TransportEvent::WriteCompleted { id, handle, result } => {
                self.on_write_completed(&id, handle, result).await;
            }
            TransportEvent::WriteBufferDrained { id, credits } => {
                self.on_write_drained(&id, credits).await;
            }
            TransportEvent::SubscriptionResult { id, handle, enabled, result } => {
                self.on_subscription_result(&id, handle, enabled, result).await;
            }
            TransportEvent::ValueNotified { id, handle, value } => {
                self.on_value_notified(&id, handle, value).await;
            }
        }
    }

    async fn on_adapter_state(&self, new_state: AdapterState) {
        let old_state = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, new_state)
        };

        // Losing the powered-on state kills the scan session and every
        // connection. Their termination events go out before the state
        // change so subscribers observe effects in causal order.
        if old_state.can_operate() && !new_state.can_operate() {
            let session = self.scan.lock().await.take();
            if session.is_some() {
                info!("Scan session terminated by adapter state change");
                self.events.send(AdapterEvent::ScanStopped);
            }

            let conns: Vec<_> = self.connections.write().await.drain().map(|(_, c)| c).collect();
            for conn in conns {
                conn.teardown(DisconnectReason::Error, FailureReason::AdapterLost).await;
            }
        }

        info!(from = %old_state, to = %new_state, "Adapter state changed");
        self.events.send(AdapterEvent::StateChanged { state: new_state });
    }

    async fn on_advertisement(
        &self,
        id: DeviceId,
        local_name: Option<String>,
        services: Vec<BleUuid>,
        rssi: Option<i16>,
    ) {
        let report = {
            let mut scan = self.scan.lock().await;
            match scan.as_mut() {
                Some(state) => state.should_report(&id),
                // Late sighting after the session ended.
                None => false,
            }
        };
        if !report {
            return;
        }

        debug!(device = %id, ?rssi, "Device discovered");
        self.events.send(AdapterEvent::DeviceDiscovered {
            device: DiscoveredDevice { id, local_name, services, rssi },
        });
    }
}

/// Drains transport indications until cancelled or the transport hangs up.
async fn run_pump(
    shared: Arc<Shared>,
    mut indications: IndicationReceiver,
    cancel_token: CancellationToken,
) {
    debug!("Event pump started");
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Event pump cancelled");
                break;
            }
            indication = indications.recv() => match indication {
                Some(event) => shared.handle_indication(event).await,
                None => {
                    warn!("Transport indication channel closed; event pump stopping");
                    break;
                }
            }
        }
    }
}
