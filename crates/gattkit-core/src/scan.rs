//! Scan sessions and streaming discovery results.
//!
//! At most one scan session is active per adapter. A session carries its
//! [`ScanOptions`] and, unless duplicate reporting was requested, a seen
//! set so that each peripheral is reported at most once per session.
//! Sessions end when stopped explicitly, when their configured duration
//! elapses, or when the adapter leaves the powered-on state.
//!
//! [`DeviceStream`] offers discovery results as a [`Stream`] for callers
//! that prefer `while let` loops over matching on raw adapter events.

use std::collections::HashSet;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::Stream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use gattkit_types::{BleUuid, DeviceId, DiscoveredDevice};

use crate::events::AdapterEvent;

/// Buffered discoveries a [`DeviceStream`] holds before applying
/// backpressure to its forwarding task.
const DEFAULT_STREAM_BUFFER: usize = 32;

/// Options for a scan session.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use gattkit_core::ScanOptions;
/// use gattkit_types::uuid::HEART_RATE_SERVICE;
///
/// let options = ScanOptions::new()
///     .service_filter(vec![HEART_RATE_SERVICE])
///     .duration(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Report only peripherals advertising at least one of these services.
    /// Empty means report everything.
    pub service_filter: Vec<BleUuid>,
    /// Report every advertisement sighting instead of one per peripheral.
    pub allow_duplicates: bool,
    /// Stop the session automatically after this long.
    pub duration: Option<Duration>,
}

impl ScanOptions {
    /// Creates options that scan for everything until stopped.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts reports to peripherals advertising one of the given
    /// services.
    #[must_use]
    pub fn service_filter(mut self, filter: Vec<BleUuid>) -> Self {
        self.service_filter = filter;
        self
    }

    /// Reports every advertisement sighting, including repeats of the
    /// same peripheral, e.g. for RSSI tracking.
    #[must_use]
    pub fn allow_duplicates(mut self, allow: bool) -> Self {
        self.allow_duplicates = allow;
        self
    }

    /// Stops the session automatically after `duration`.
    #[must_use]
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Bookkeeping for the active scan session.
#[derive(Debug)]
pub(crate) struct ScanState {
    options: ScanOptions,
    seen: HashSet<DeviceId>,
    /// Distinguishes this session from earlier and later ones in timer
    /// callbacks.
    pub(crate) token: u64,
    /// Auto-stop timer when the session has a duration.
    pub(crate) auto_stop: Option<JoinHandle<()>>,
}

impl ScanState {
    pub(crate) fn new(options: ScanOptions, token: u64) -> Self {
        Self { options, seen: HashSet::new(), token, auto_stop: None }
    }

    /// Whether a sighting of `id` should be reported, updating the seen
    /// set as a side effect.
    pub(crate) fn should_report(&mut self, id: &DeviceId) -> bool {
        if self.options.allow_duplicates {
            return true;
        }
        self.seen.insert(id.clone())
    }
}

impl Drop for ScanState {
    fn drop(&mut self) {
        if let Some(handle) = &self.auto_stop {
            handle.abort();
        }
    }
}

/// A [`Stream`] of scan discoveries.
///
/// Created by [`Adapter::device_stream`](crate::Adapter::device_stream).
/// The stream spans scan sessions: it keeps yielding for as long as the
/// adapter exists, and simply goes quiet while no session is active. Drop
/// the stream or call [`close`](Self::close) to release its forwarding
/// task.
pub struct DeviceStream {
    receiver: mpsc::Receiver<DiscoveredDevice>,
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl DeviceStream {
    pub(crate) fn new(mut events: broadcast::Receiver<AdapterEvent>) -> Self {
        let (tx, rx) = mpsc::channel(DEFAULT_STREAM_BUFFER);
        let cancel_token = CancellationToken::new();
        let child_token = cancel_token.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = child_token.cancelled() => {
                        debug!("Device stream cancelled");
                        break;
                    }
                    event = events.recv() => match event {
                        Ok(AdapterEvent::DeviceDiscovered { device }) => {
                            if tx.send(device).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "Device stream lagged behind adapter events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        Self { receiver: rx, handle, cancel_token }
    }

    /// Stops the stream and releases its forwarding task.
    pub fn close(self) {
        self.cancel_token.cancel();
    }

    /// Whether the forwarding task is still running.
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Stream for DeviceStream {
    type Item = DiscoveredDevice;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for DeviceStream {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
