//! Peripheral connections: lifecycle, discovery, and shared state.
//!
//! Each live connection is an [`Arc<PeripheralShared>`] registered with
//! the adapter under its device id. The public [`Peripheral`] handle is a
//! thin view over that shared state plus the engine it belongs to. A
//! connection is deregistered the moment it reaches
//! [`Disconnected`](ConnectionState::Disconnected); reconnecting creates
//! a fresh entry with a fresh event channel, so a handle from a previous
//! connection keeps reporting the old, terminal state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use gattkit_types::{BleUuid, CharacteristicProperties, ConnectionState, DeviceId, DisconnectReason};

use crate::adapter::Shared;
use crate::catalog::{Characteristic, Service, ServiceCatalog};
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, FailureReason, PeripheralEvent, PeripheralEventReceiver};
use crate::io::{PendingOps, WriteCredits};
use crate::transport::{DEFAULT_ATT_MTU, LinkInfo, ServiceInfo, TransportError};

/// A deadline timer together with the correlation token that identifies
/// which attempt it guards.
pub(crate) struct OpTimer {
    pub(crate) token: u64,
    pub(crate) handle: JoinHandle<()>,
}

/// Handle to a peripheral connection.
///
/// `Peripheral` is deliberately not `Clone`; a connection has one
/// lifecycle and cloning handles invites racing disconnects. To use a
/// connection from several tasks, wrap it in an [`Arc`] or ask
/// [`Adapter::peripheral`](crate::Adapter::peripheral) for another
/// handle.
///
/// All methods validate against the current connection state and return
/// without waiting for radio traffic; outcomes arrive as
/// [`PeripheralEvent`]s.
pub struct Peripheral {
    pub(crate) engine: Arc<Shared>,
    pub(crate) inner: Arc<PeripheralShared>,
}

impl Peripheral {
    pub(crate) fn from_parts(engine: Arc<Shared>, inner: Arc<PeripheralShared>) -> Self {
        Self { engine, inner }
    }

    /// The transport-assigned identifier of this peripheral.
    pub fn id(&self) -> &DeviceId {
        self.inner.id()
    }

    /// Subscribes to this connection's events.
    pub fn subscribe(&self) -> PeripheralEventReceiver {
        self.inner.subscribe()
    }

    /// Current lifecycle state of the connection.
    pub async fn state(&self) -> ConnectionState {
        self.inner.state().await
    }

    /// Whether the connection is established.
    pub async fn is_connected(&self) -> bool {
        self.inner.state().await.is_connected()
    }

    /// Effective ATT MTU, once the connection is established.
    pub fn mtu(&self) -> Option<u16> {
        match self.inner.mtu() {
            0 => None,
            mtu => Some(mtu),
        }
    }

    /// Snapshot of the discovered services, or `None` if no service
    /// discovery has completed on this connection yet.
    pub async fn services(&self) -> Option<Vec<Service>> {
        self.inner.catalog.read().await.as_ref().map(|c| c.services().to_vec())
    }

    /// Snapshot of one discovered characteristic, including its cached
    /// value and subscription state.
    pub async fn characteristic(&self, characteristic: BleUuid) -> Option<Characteristic> {
        self.inner.catalog.read().await.as_ref()?.characteristic(characteristic).cloned()
    }

    /// Starts service discovery, replacing any previous catalog when it
    /// completes.
    ///
    /// `filter` restricts discovery to the given services; an empty
    /// filter discovers everything. At most one discovery runs per
    /// connection; a second request fails with [`Error::Busy`]. The
    /// outcome arrives as
    /// [`DiscoveryCompleted`](PeripheralEvent::DiscoveryCompleted) or
    /// [`DiscoveryFailed`](PeripheralEvent::DiscoveryFailed).
    pub async fn discover_services(&self, filter: &[BleUuid]) -> Result<()> {
        let state = self.inner.state().await;
        if !state.is_connected() {
            return Err(Error::not_connected(self.inner.id().clone(), state));
        }

        let token = self.engine.next_op_token();
        {
            let mut discovery = self.inner.discovery.lock().await;
            if discovery.is_some() {
                return Err(Error::Busy);
            }
            let handle = spawn_discovery_timer(
                Arc::clone(&self.engine),
                self.inner.id().clone(),
                token,
                self.engine.config.discovery_timeout,
            );
            *discovery = Some(OpTimer { token, handle });
        }

        match self.engine.transport.discover_services(self.inner.id(), filter).await {
            Ok(()) => {
                debug!(device = %self.inner.id(), "Service discovery requested");
                Ok(())
            }
            Err(err) => {
                if let Some(timer) = self.inner.take_discovery_if(token).await {
                    timer.handle.abort();
                }
                Err(err.into())
            }
        }
    }

    /// Requests an orderly disconnect.
    ///
    /// Disconnecting a connection that is already disconnecting or
    /// disconnected is a no-op success. Completion arrives as
    /// [`Disconnected`](PeripheralEvent::Disconnected) with reason
    /// [`Requested`](DisconnectReason::Requested).
    pub async fn disconnect(&self) -> Result<()> {
        let prior = self.inner.state().await;
        match prior {
            ConnectionState::Disconnected | ConnectionState::Disconnecting => {
                debug!(device = %self.inner.id(), state = %prior, "Disconnect is a no-op");
                return Ok(());
            }
            ConnectionState::Connecting | ConnectionState::Connected => {}
        }
        self.inner.set_state(ConnectionState::Disconnecting).await;

        match self.engine.transport.disconnect(self.inner.id()).await {
            Ok(()) => {
                info!(device = %self.inner.id(), "Disconnect requested");
                Ok(())
            }
            Err(err) => {
                // The request never left the host; put the state back.
                self.inner.set_state(prior).await;
                Err(err.into())
            }
        }
    }
}

impl std::fmt::Debug for Peripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peripheral").field("id", self.id()).finish_non_exhaustive()
    }
}

/// Connection state shared between the engine and peripheral handles.
pub(crate) struct PeripheralShared {
    id: DeviceId,
    state: RwLock<ConnectionState>,
    /// Effective ATT MTU; 0 while unknown.
    mtu: AtomicU16,
    catalog: RwLock<Option<ServiceCatalog>>,
    pub(crate) pending: Mutex<PendingOps>,
    pub(crate) credits: Mutex<WriteCredits>,
    connect_timer: Mutex<Option<OpTimer>>,
    discovery: Mutex<Option<OpTimer>>,
    events: EventDispatcher<PeripheralEvent>,
}

impl PeripheralShared {
    pub(crate) fn new(id: DeviceId, event_capacity: usize) -> Self {
        Self {
            id,
            state: RwLock::new(ConnectionState::Connecting),
            mtu: AtomicU16::new(0),
            catalog: RwLock::new(None),
            pending: Mutex::new(PendingOps::default()),
            credits: Mutex::new(WriteCredits::default()),
            connect_timer: Mutex::new(None),
            discovery: Mutex::new(None),
            events: EventDispatcher::new(event_capacity),
        }
    }

    pub(crate) fn id(&self) -> &DeviceId {
        &self.id
    }

    pub(crate) async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub(crate) async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    pub(crate) fn mtu(&self) -> u16 {
        self.mtu.load(Ordering::Relaxed)
    }

    pub(crate) fn set_mtu(&self, mtu: u16) {
        self.mtu.store(mtu, Ordering::Relaxed);
    }

    pub(crate) fn subscribe(&self) -> PeripheralEventReceiver {
        self.events.subscribe()
    }

    pub(crate) fn send(&self, event: PeripheralEvent) {
        self.events.send(event);
    }

    async fn store_connect_timer(&self, timer: OpTimer) {
        let mut guard = self.connect_timer.lock().await;
        if let Some(old) = guard.replace(timer) {
            old.handle.abort();
        }
    }

    pub(crate) async fn abort_connect_timer(&self) {
        if let Some(timer) = self.connect_timer.lock().await.take() {
            timer.handle.abort();
        }
    }

    /// Takes the connect timer only if it is still the armed attempt.
    /// Returns false when the attempt already resolved.
    pub(crate) async fn take_connect_timer_if(&self, token: u64) -> bool {
        let mut guard = self.connect_timer.lock().await;
        match guard.as_ref() {
            Some(timer) if timer.token == token => {
                *guard = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) async fn discovery_in_flight(&self) -> bool {
        self.discovery.lock().await.is_some()
    }

    async fn take_discovery(&self) -> Option<OpTimer> {
        self.discovery.lock().await.take()
    }

    pub(crate) async fn take_discovery_if(&self, token: u64) -> Option<OpTimer> {
        let mut guard = self.discovery.lock().await;
        match guard.as_ref() {
            Some(timer) if timer.token == token => guard.take(),
            _ => None,
        }
    }

    /// Resolves a characteristic to its request address and properties,
    /// failing when no catalog is populated or the UUID is unknown.
    pub(crate) async fn resolve_characteristic(
        &self,
        characteristic: BleUuid,
    ) -> Result<(u16, CharacteristicProperties)> {
        let catalog = self.catalog.read().await;
        let Some(catalog) = catalog.as_ref() else {
            return Err(Error::not_discovered(characteristic));
        };
        match catalog.characteristic(characteristic) {
            Some(c) => Ok((c.handle, c.properties)),
            None => Err(Error::not_discovered(characteristic)),
        }
    }

    pub(crate) async fn install_catalog(&self, catalog: ServiceCatalog) {
        *self.catalog.write().await = Some(catalog);
    }

    /// Caches a received value, returning the owning characteristic's
    /// UUID, or `None` when the handle is not in the catalog.
    pub(crate) async fn update_value(&self, handle: u16, value: &[u8]) -> Option<BleUuid> {
        let mut catalog = self.catalog.write().await;
        let c = catalog.as_mut()?.characteristic_by_handle_mut(handle)?;
        c.value = value.to_vec();
        Some(c.uuid)
    }

    pub(crate) async fn set_subscribed(&self, handle: u16, enabled: bool) -> Option<BleUuid> {
        let mut catalog = self.catalog.write().await;
        let c = catalog.as_mut()?.characteristic_by_handle_mut(handle)?;
        c.subscribed = enabled;
        Some(c.uuid)
    }

    pub(crate) async fn subscription_state(&self, handle: u16) -> Option<bool> {
        self.catalog.read().await.as_ref()?.characteristic_by_handle(handle).map(|c| c.subscribed)
    }

    /// Fails every pending characteristic operation with `reason`.
    pub(crate) async fn cancel_pending_ops(&self, reason: FailureReason) {
        let drained = self.pending.lock().await.drain();
        for (kind, op) in drained {
            op.timer.abort();
            self.send(PeripheralEvent::OperationFailed {
                characteristic: op.uuid,
                kind,
                reason: reason.clone(),
            });
        }
    }

    /// Moves the connection to `Disconnected`, resolving everything that
    /// was in flight. Idempotent: a second teardown emits nothing.
    ///
    /// `reason` is reported in the terminal `Disconnected` event;
    /// `failure` is reported for every operation that was still pending.
    pub(crate) async fn teardown(&self, reason: DisconnectReason, failure: FailureReason) {
        let prior = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, ConnectionState::Disconnected)
        };
        if prior == ConnectionState::Disconnected {
            return;
        }

        self.abort_connect_timer().await;
        let discovery_pending = match self.take_discovery().await {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        };

        self.cancel_pending_ops(failure.clone()).await;
        if discovery_pending {
            self.send(PeripheralEvent::DiscoveryFailed { reason: failure.clone() });
        }

        self.credits.lock().await.reset();
        self.set_mtu(0);
        *self.catalog.write().await = None;

        // A connection that never established reports a failed attempt,
        // not a disconnect.
        if prior == ConnectionState::Connecting {
            self.send(PeripheralEvent::ConnectFailed { reason: failure });
        } else {
            self.send(PeripheralEvent::Disconnected { reason });
        }
    }
}

impl Shared {
    pub(crate) async fn arm_connect_timer(self: &Arc<Self>, conn: &Arc<PeripheralShared>) {
        let token = self.next_op_token();
        let handle = spawn_connect_timer(
            Arc::clone(self),
            conn.id().clone(),
            token,
            self.config.connect_timeout,
        );
        conn.store_connect_timer(OpTimer { token, handle }).await;
    }

    pub(crate) async fn on_connection_result(
        self: &Arc<Self>,
        id: &DeviceId,
        result: std::result::Result<LinkInfo, TransportError>,
    ) {
        let Some(conn) = self.connection(id).await else {
            debug!(device = %id, "Connection result for unknown connection");
            return;
        };
        conn.abort_connect_timer().await;

        match result {
            Ok(link) => {
                let state = conn.state().await;
                match state {
                    ConnectionState::Connecting => {}
                    ConnectionState::Disconnecting => {
                        // A disconnect was requested while connecting; the
                        // disconnection indication finishes the teardown.
                        debug!(device = %id, "Connected while a disconnect is pending");
                        return;
                    }
                    _ => {
                        debug!(device = %id, %state, "Stale connection result");
                        return;
                    }
                }

                let mtu = link.mtu.unwrap_or(DEFAULT_ATT_MTU);
                let credits = link.write_credits.unwrap_or(self.config.default_write_credits);
                conn.set_mtu(mtu);
                conn.configure_credits(credits).await;
                conn.set_state(ConnectionState::Connected).await;
                info!(device = %id, mtu, credits, "Connected");
                conn.send(PeripheralEvent::Connected { mtu });
            }
            Err(err) => {
                warn!(device = %id, error = %err, "Connection attempt failed");
                self.remove_connection(id).await;
                conn.set_state(ConnectionState::Disconnected).await;
                conn.send(PeripheralEvent::ConnectFailed { reason: err.into() });
            }
        }
    }

    pub(crate) async fn on_connect_timeout(self: &Arc<Self>, id: &DeviceId, token: u64) {
        let Some(conn) = self.connection(id).await else {
            return;
        };
        if !conn.take_connect_timer_if(token).await {
            return;
        }
        if conn.state().await != ConnectionState::Connecting {
            return;
        }

        warn!(device = %id, timeout = ?self.config.connect_timeout, "Connection attempt timed out");
        self.remove_connection(id).await;
        conn.set_state(ConnectionState::Disconnected).await;
        conn.send(PeripheralEvent::ConnectFailed { reason: FailureReason::Timeout });
    }

    pub(crate) async fn on_disconnection(self: &Arc<Self>, id: &DeviceId, reason: DisconnectReason) {
        let Some(conn) = self.connection(id).await else {
            debug!(device = %id, "Disconnection for unknown connection");
            return;
        };
        self.remove_connection(id).await;
        info!(device = %id, %reason, "Disconnected");
        conn.teardown(reason, FailureReason::Cancelled).await;
    }

    pub(crate) async fn on_services_discovered(
        self: &Arc<Self>,
        id: &DeviceId,
        result: std::result::Result<Vec<ServiceInfo>, TransportError>,
    ) {
        let Some(conn) = self.connection(id).await else {
            debug!(device = %id, "Discovery result for unknown connection");
            return;
        };
        let Some(timer) = conn.take_discovery().await else {
            debug!(device = %id, "Discovery result with no discovery in flight");
            return;
        };
        timer.handle.abort();

        match result {
            Ok(tree) => {
                // The new catalog invalidates old handles; resolve
                // in-flight I/O before swapping it in.
                conn.cancel_pending_ops(FailureReason::Cancelled).await;
                let catalog = ServiceCatalog::from_services(tree);
                let services = catalog.len();
                conn.install_catalog(catalog).await;
                info!(device = %id, services, "Service discovery completed");
                conn.send(PeripheralEvent::DiscoveryCompleted { services });
            }
            Err(err) => {
                warn!(device = %id, error = %err, "Service discovery failed");
                conn.send(PeripheralEvent::DiscoveryFailed { reason: err.into() });
            }
        }
    }

    pub(crate) async fn on_discovery_timeout(self: &Arc<Self>, id: &DeviceId, token: u64) {
        let Some(conn) = self.connection(id).await else {
            return;
        };
        if conn.take_discovery_if(token).await.is_none() {
            return;
        }

        warn!(device = %id, timeout = ?self.config.discovery_timeout, "Service discovery timed out");
        // Any previous catalog stays in place.
        conn.send(PeripheralEvent::DiscoveryFailed { reason: FailureReason::Timeout });
    }
}

fn spawn_connect_timer(
    engine: Arc<Shared>,
    id: DeviceId,
    token: u64,
    deadline: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        engine.on_connect_timeout(&id, token).await;
    })
}

fn spawn_discovery_timer(
    engine: Arc<Shared>,
    id: DeviceId,
    token: u64,
    deadline: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        engine.on_discovery_timeout(&id, token).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gattkit_types::CharacteristicProperties;
    use gattkit_types::uuid::{BATTERY_LEVEL, BATTERY_SERVICE};

    use crate::events::OperationKind;
    use crate::io::PendingOp;
    use crate::transport::CharacteristicInfo;

    fn battery_catalog() -> ServiceCatalog {
        ServiceCatalog::from_services(vec![ServiceInfo {
            uuid: BATTERY_SERVICE,
            is_primary: true,
            characteristics: vec![CharacteristicInfo {
                uuid: BATTERY_LEVEL,
                handle: 0x0020,
                properties: CharacteristicProperties::READ,
                descriptors: vec![],
            }],
        }])
    }

    #[tokio::test]
    async fn test_new_connection_starts_connecting_without_catalog() {
        let conn = PeripheralShared::new(DeviceId::new("AA"), 16);
        assert_eq!(conn.state().await, ConnectionState::Connecting);
        assert_eq!(conn.mtu(), 0);
        assert!(conn.resolve_characteristic(BATTERY_LEVEL).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_characteristic_distinguishes_missing_catalog_and_uuid() {
        let conn = PeripheralShared::new(DeviceId::new("AA"), 16);
        assert!(matches!(
            conn.resolve_characteristic(BATTERY_LEVEL).await,
            Err(Error::NotDiscovered { .. })
        ));

        conn.install_catalog(battery_catalog()).await;
        let (handle, props) = conn.resolve_characteristic(BATTERY_LEVEL).await.unwrap();
        assert_eq!(handle, 0x0020);
        assert!(props.can_read());

        assert!(matches!(
            conn.resolve_characteristic(BleUuid::from_u16(0x2a00)).await,
            Err(Error::NotDiscovered { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_value_requires_known_handle() {
        let conn = PeripheralShared::new(DeviceId::new("AA"), 16);
        assert_eq!(conn.update_value(0x0020, &[1]).await, None);

        conn.install_catalog(battery_catalog()).await;
        assert_eq!(conn.update_value(0x0020, &[0x5f]).await, Some(BATTERY_LEVEL));
        assert_eq!(conn.update_value(0x0099, &[0x5f]).await, None);

        let catalog = conn.catalog.read().await;
        let c = catalog.as_ref().unwrap().characteristic(BATTERY_LEVEL).unwrap();
        assert_eq!(c.value, vec![0x5f]);
    }

    #[tokio::test]
    async fn test_teardown_resolves_pending_ops_then_reports_disconnect() {
        let conn = PeripheralShared::new(DeviceId::new("AA"), 16);
        conn.set_state(ConnectionState::Connected).await;
        conn.set_mtu(185);
        conn.install_catalog(battery_catalog()).await;
        conn.pending.lock().await.insert(
            0x0020,
            OperationKind::Read,
            PendingOp { uuid: BATTERY_LEVEL, token: 7, timer: tokio::spawn(async {}) },
        );

        let mut events = conn.subscribe();
        conn.teardown(DisconnectReason::LinkLoss, FailureReason::Cancelled).await;

        assert_eq!(
            events.recv().await.unwrap(),
            PeripheralEvent::OperationFailed {
                characteristic: BATTERY_LEVEL,
                kind: OperationKind::Read,
                reason: FailureReason::Cancelled,
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            PeripheralEvent::Disconnected { reason: DisconnectReason::LinkLoss }
        );

        assert_eq!(conn.state().await, ConnectionState::Disconnected);
        assert_eq!(conn.mtu(), 0);
        assert!(conn.catalog.read().await.is_none());
        assert_eq!(conn.pending.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn test_teardown_from_connecting_reports_connect_failed() {
        let conn = PeripheralShared::new(DeviceId::new("AA"), 16);
        let mut events = conn.subscribe();

        conn.teardown(DisconnectReason::Error, FailureReason::AdapterLost).await;

        assert_eq!(
            events.recv().await.unwrap(),
            PeripheralEvent::ConnectFailed { reason: FailureReason::AdapterLost }
        );
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let conn = PeripheralShared::new(DeviceId::new("AA"), 16);
        conn.set_state(ConnectionState::Connected).await;

        let mut events = conn.subscribe();
        conn.teardown(DisconnectReason::Requested, FailureReason::Cancelled).await;
        conn.teardown(DisconnectReason::Requested, FailureReason::Cancelled).await;

        assert_eq!(
            events.recv().await.unwrap(),
            PeripheralEvent::Disconnected { reason: DisconnectReason::Requested }
        );
        assert!(events.try_recv().is_err());
    }
}
