//! Characteristic I/O: reads, writes, and notification subscriptions.
//!
//! Requests validate synchronously against the connection state, the
//! discovered catalog, and the characteristic's properties, then go to
//! the transport addressed by ATT value handle. Two flow-control rules
//! apply on top:
//!
//! - Reads, acknowledged writes, and subscription changes occupy a
//!   pending slot per (characteristic, kind) pair until their completion
//!   indication or deadline; a second request for an occupied slot fails
//!   with [`Error::OperationInProgress`].
//! - Unacknowledged writes have no completion and consume a write credit
//!   instead; when all credits are in use, writes fail with
//!   [`Error::Backpressure`] until the transport reports its buffer
//!   drained.
//!
//! Payloads are capped by the negotiated MTU: both write PDUs spend 3
//! bytes on opcode and handle, so the usable payload is MTU minus 3.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use gattkit_types::{BleUuid, CharacteristicProperties, DeviceId, WriteMode};

use crate::adapter::Shared;
use crate::error::{Error, Result};
use crate::events::{FailureReason, OperationKind, PeripheralEvent, ValueSource};
use crate::peripheral::{Peripheral, PeripheralShared};
use crate::transport::TransportError;

/// Opcode plus handle bytes of an ATT write PDU.
const ATT_WRITE_OVERHEAD: usize = 3;

/// An accepted operation awaiting its completion indication.
pub(crate) struct PendingOp {
    /// UUID the request was made with, reported back in outcome events.
    pub(crate) uuid: BleUuid,
    /// Correlation token of the armed deadline timer.
    pub(crate) token: u64,
    /// The deadline timer itself.
    pub(crate) timer: JoinHandle<()>,
}

/// The pending-operation slots of one connection.
#[derive(Default)]
pub(crate) struct PendingOps {
    slots: HashMap<(u16, OperationKind), PendingOp>,
}

impl PendingOps {
    pub(crate) fn insert(&mut self, handle: u16, kind: OperationKind, op: PendingOp) {
        self.slots.insert((handle, kind), op);
    }

    pub(crate) fn contains(&self, handle: u16, kind: OperationKind) -> bool {
        self.slots.contains_key(&(handle, kind))
    }

    pub(crate) fn remove(&mut self, handle: u16, kind: OperationKind) -> Option<PendingOp> {
        self.slots.remove(&(handle, kind))
    }

    /// Removes the slot only when it still belongs to the attempt the
    /// token identifies.
    pub(crate) fn remove_if(
        &mut self,
        handle: u16,
        kind: OperationKind,
        token: u64,
    ) -> Option<PendingOp> {
        match self.slots.get(&(handle, kind)) {
            Some(op) if op.token == token => self.slots.remove(&(handle, kind)),
            _ => None,
        }
    }

    pub(crate) fn drain(&mut self) -> Vec<(OperationKind, PendingOp)> {
        self.slots.drain().map(|((_, kind), op)| (kind, op)).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Credit accounting for write-without-response flow control.
///
/// `capacity` is the stack's buffer depth, set at connection time;
/// `outstanding` counts commands issued and not yet drained.
#[derive(Debug, Default)]
pub(crate) struct WriteCredits {
    capacity: u16,
    outstanding: u16,
}

impl WriteCredits {
    pub(crate) fn configure(&mut self, capacity: u16) {
        self.capacity = capacity;
        self.outstanding = 0;
    }

    pub(crate) fn available(&self) -> u16 {
        self.capacity.saturating_sub(self.outstanding)
    }

    pub(crate) fn try_acquire(&mut self) -> bool {
        if self.outstanding < self.capacity {
            self.outstanding += 1;
            true
        } else {
            false
        }
    }

    /// Returns `credits` permits. Saturates rather than trusting the
    /// transport to report exact drain counts.
    pub(crate) fn release(&mut self, credits: u16) {
        self.outstanding = self.outstanding.saturating_sub(credits);
    }

    pub(crate) fn reset(&mut self) {
        self.capacity = 0;
        self.outstanding = 0;
    }
}

impl Peripheral {
    /// Requests a read of a characteristic value.
    ///
    /// The value arrives as a
    /// [`ValueUpdated`](PeripheralEvent::ValueUpdated) event with source
    /// [`ReadResponse`](ValueSource::ReadResponse) and is also cached on
    /// the catalog entry; failure or deadline expiry arrives as
    /// [`OperationFailed`](PeripheralEvent::OperationFailed).
    pub async fn read(&self, characteristic: BleUuid) -> Result<()> {
        let (handle, props) = self.io_target(characteristic).await?;
        if !props.can_read() {
            return Err(Error::unsupported(characteristic, "read"));
        }
        self.begin_operation(characteristic, handle, OperationKind::Read).await?;

        match self.engine.transport.read(self.inner.id(), handle).await {
            Ok(()) => {
                debug!(device = %self.inner.id(), %characteristic, "Read requested");
                Ok(())
            }
            Err(err) => {
                self.inner.abort_pending(handle, OperationKind::Read).await;
                Err(err.into())
            }
        }
    }

    /// Requests a characteristic write.
    ///
    /// Acknowledged writes complete with
    /// [`WriteCompleted`](PeripheralEvent::WriteCompleted) or
    /// [`OperationFailed`](PeripheralEvent::OperationFailed).
    /// Unacknowledged writes have no completion event; they consume a
    /// write credit and fail fast with [`Error::Backpressure`] when the
    /// stack's buffer is full.
    pub async fn write(&self, characteristic: BleUuid, value: &[u8], mode: WriteMode) -> Result<()> {
        let (handle, props) = self.io_target(characteristic).await?;
        if !props.can_write(mode) {
            return Err(Error::unsupported(characteristic, format!("write {mode}")));
        }
        let max = self.maximum_write_length(mode);
        if value.len() > max {
            return Err(Error::PayloadTooLarge { len: value.len(), max });
        }

        match mode {
            WriteMode::WithResponse => {
                self.begin_operation(characteristic, handle, OperationKind::Write).await?;
                match self.engine.transport.write(self.inner.id(), handle, value, mode).await {
                    Ok(()) => {
                        debug!(device = %self.inner.id(), %characteristic, len = value.len(), "Write requested");
                        Ok(())
                    }
                    Err(err) => {
                        self.inner.abort_pending(handle, OperationKind::Write).await;
                        Err(err.into())
                    }
                }
            }
            WriteMode::WithoutResponse => {
                if !self.inner.credits.lock().await.try_acquire() {
                    return Err(Error::Backpressure);
                }
                match self.engine.transport.write(self.inner.id(), handle, value, mode).await {
                    Ok(()) => {
                        debug!(device = %self.inner.id(), %characteristic, len = value.len(), "Write command issued");
                        Ok(())
                    }
                    Err(err) => {
                        // The command never reached the stack's buffer.
                        self.inner.credits.lock().await.release(1);
                        Err(err.into())
                    }
                }
            }
        }
    }

    /// Enables or disables notifications for a characteristic.
    ///
    /// Requesting the state the characteristic is already in is a no-op
    /// success. Otherwise the change completes with
    /// [`SubscriptionChanged`](PeripheralEvent::SubscriptionChanged) or
    /// [`OperationFailed`](PeripheralEvent::OperationFailed). While
    /// subscribed, pushed values arrive as
    /// [`ValueUpdated`](PeripheralEvent::ValueUpdated) events with source
    /// [`Notification`](ValueSource::Notification).
    pub async fn set_notify(&self, characteristic: BleUuid, enabled: bool) -> Result<()> {
        let (handle, props) = self.io_target(characteristic).await?;
        if !props.can_subscribe() {
            return Err(Error::unsupported(characteristic, "notifications"));
        }
        if self.inner.subscription_state(handle).await == Some(enabled) {
            debug!(device = %self.inner.id(), %characteristic, enabled, "Subscription already in requested state");
            return Ok(());
        }
        self.begin_operation(characteristic, handle, OperationKind::Subscription).await?;

        match self.engine.transport.set_subscription(self.inner.id(), handle, enabled).await {
            Ok(()) => {
                debug!(device = %self.inner.id(), %characteristic, enabled, "Subscription change requested");
                Ok(())
            }
            Err(err) => {
                self.inner.abort_pending(handle, OperationKind::Subscription).await;
                Err(err.into())
            }
        }
    }

    /// Largest payload a single write can carry right now.
    ///
    /// Returns 0 while the connection is not established or the MTU is
    /// unknown; never fails.
    pub fn maximum_write_length(&self, mode: WriteMode) -> usize {
        let mtu = self.inner.mtu() as usize;
        match mode {
            // Both ATT write PDUs spend the same 3 bytes on opcode and
            // handle.
            WriteMode::WithResponse | WriteMode::WithoutResponse => {
                mtu.saturating_sub(ATT_WRITE_OVERHEAD)
            }
        }
    }

    /// Write-without-response credits currently available.
    pub async fn available_write_credits(&self) -> u16 {
        self.inner.credits.lock().await.available()
    }

    /// Shared preconditions for characteristic operations: an established
    /// connection, no discovery in flight, and a discovered target.
    async fn io_target(&self, characteristic: BleUuid) -> Result<(u16, CharacteristicProperties)> {
        let state = self.inner.state().await;
        if !state.is_connected() {
            return Err(Error::not_connected(self.inner.id().clone(), state));
        }
        if self.inner.discovery_in_flight().await {
            return Err(Error::Busy);
        }
        self.inner.resolve_characteristic(characteristic).await
    }

    /// Reserves the pending slot for (characteristic, kind) and arms its
    /// deadline timer.
    async fn begin_operation(
        &self,
        characteristic: BleUuid,
        handle: u16,
        kind: OperationKind,
    ) -> Result<()> {
        let token = self.engine.next_op_token();
        let mut pending = self.inner.pending.lock().await;
        if pending.contains(handle, kind) {
            return Err(Error::operation_in_progress(characteristic, kind));
        }
        let timer = spawn_operation_timer(
            Arc::clone(&self.engine),
            self.inner.id().clone(),
            handle,
            kind,
            token,
            self.engine.config.operation_timeout,
        );
        pending.insert(handle, kind, PendingOp { uuid: characteristic, token, timer });
        Ok(())
    }
}

impl PeripheralShared {
    /// Takes a pending slot on completion, disarming its deadline timer.
    pub(crate) async fn take_pending(&self, handle: u16, kind: OperationKind) -> Option<PendingOp> {
        let op = self.pending.lock().await.remove(handle, kind);
        if let Some(op) = &op {
            op.timer.abort();
        }
        op
    }

    /// Takes a pending slot from its own deadline timer; a stale token
    /// means the slot was already resolved or reused.
    pub(crate) async fn take_pending_if(
        &self,
        handle: u16,
        kind: OperationKind,
        token: u64,
    ) -> Option<PendingOp> {
        self.pending.lock().await.remove_if(handle, kind, token)
    }

    /// Releases a slot reserved for a request the transport then refused.
    pub(crate) async fn abort_pending(&self, handle: u16, kind: OperationKind) {
        let _ = self.take_pending(handle, kind).await;
    }

    pub(crate) async fn configure_credits(&self, capacity: u16) {
        self.credits.lock().await.configure(capacity);
    }
}

impl Shared {
    pub(crate) async fn on_read_completed(
        &self,
        id: &DeviceId,
        handle: u16,
        result: std::result::Result<Vec<u8>, TransportError>,
    ) {
        let Some(conn) = self.connection(id).await else {
            return;
        };
        let Some(op) = conn.take_pending(handle, OperationKind::Read).await else {
            debug!(device = %id, handle, "Read completion with no pending read");
            return;
        };

        match result {
            Ok(value) => {
                conn.update_value(handle, &value).await;
                debug!(device = %id, characteristic = %op.uuid, len = value.len(), "Read completed");
                conn.send(PeripheralEvent::ValueUpdated {
                    characteristic: op.uuid,
                    value,
                    source: ValueSource::ReadResponse,
                });
            }
            Err(err) => {
                warn!(device = %id, characteristic = %op.uuid, error = %err, "Read failed");
                conn.send(PeripheralEvent::OperationFailed {
                    characteristic: op.uuid,
                    kind: OperationKind::Read,
                    reason: err.into(),
                });
            }
        }
    }

    pub(crate) async fn on_write_completed(
        &self,
        id: &DeviceId,
        handle: u16,
        result: std::result::Result<(), TransportError>,
    ) {
        let Some(conn) = self.connection(id).await else {
            return;
        };
        let Some(op) = conn.take_pending(handle, OperationKind::Write).await else {
            debug!(device = %id, handle, "Write completion with no pending write");
            return;
        };

        match result {
            Ok(()) => {
                debug!(device = %id, characteristic = %op.uuid, "Write completed");
                conn.send(PeripheralEvent::WriteCompleted { characteristic: op.uuid });
            }
            Err(err) => {
                warn!(device = %id, characteristic = %op.uuid, error = %err, "Write failed");
                conn.send(PeripheralEvent::OperationFailed {
                    characteristic: op.uuid,
                    kind: OperationKind::Write,
                    reason: err.into(),
                });
            }
        }
    }

    pub(crate) async fn on_write_drained(&self, id: &DeviceId, credits: u16) {
        let Some(conn) = self.connection(id).await else {
            return;
        };
        conn.credits.lock().await.release(credits);
        debug!(device = %id, credits, "Write credits returned");
    }

    pub(crate) async fn on_subscription_result(
        &self,
        id: &DeviceId,
        handle: u16,
        enabled: bool,
        result: std::result::Result<(), TransportError>,
    ) {
        let Some(conn) = self.connection(id).await else {
            return;
        };
        let Some(op) = conn.take_pending(handle, OperationKind::Subscription).await else {
            debug!(device = %id, handle, "Subscription result with no pending change");
            return;
        };

        match result {
            Ok(()) => {
                conn.set_subscribed(handle, enabled).await;
                debug!(device = %id, characteristic = %op.uuid, enabled, "Subscription changed");
                conn.send(PeripheralEvent::SubscriptionChanged { characteristic: op.uuid, enabled });
            }
            Err(err) => {
                warn!(device = %id, characteristic = %op.uuid, error = %err, "Subscription change failed");
                conn.send(PeripheralEvent::OperationFailed {
                    characteristic: op.uuid,
                    kind: OperationKind::Subscription,
                    reason: err.into(),
                });
            }
        }
    }

    pub(crate) async fn on_value_notified(&self, id: &DeviceId, handle: u16, value: Vec<u8>) {
        let Some(conn) = self.connection(id).await else {
            return;
        };
        // Values for handles outside the catalog have nowhere to be
        // attributed and are dropped.
        let Some(characteristic) = conn.update_value(handle, &value).await else {
            debug!(device = %id, handle, "Notification for a handle outside the catalog");
            return;
        };
        conn.send(PeripheralEvent::ValueUpdated {
            characteristic,
            value,
            source: ValueSource::Notification,
        });
    }

    pub(crate) async fn on_operation_timeout(
        &self,
        id: &DeviceId,
        handle: u16,
        kind: OperationKind,
        token: u64,
    ) {
        let Some(conn) = self.connection(id).await else {
            return;
        };
        let Some(op) = conn.take_pending_if(handle, kind, token).await else {
            return;
        };

        warn!(
            device = %id,
            characteristic = %op.uuid,
            %kind,
            timeout = ?self.config.operation_timeout,
            "Operation timed out"
        );
        conn.send(PeripheralEvent::OperationFailed {
            characteristic: op.uuid,
            kind,
            reason: FailureReason::Timeout,
        });
    }
}

fn spawn_operation_timer(
    engine: Arc<Shared>,
    id: DeviceId,
    handle: u16,
    kind: OperationKind,
    token: u64,
    deadline: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        engine.on_operation_timeout(&id, handle, kind, token).await;
    })
}
