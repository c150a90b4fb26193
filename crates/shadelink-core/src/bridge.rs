//! The Bridge: one hub, viewed in domain terms.
//!
//! Wraps a [`BridgeClient`], normalizes its raw records into
//! [`Blind`]s, runs the periodic poll sweep, forwards unsolicited hub
//! reports, and republishes the client's availability untouched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use shadelink_proto::api::{DEVICE_TYPE_BLIND, DeviceRecord};
use shadelink_proto::{Availability, BridgeClient, ClientConfig};

use crate::config::BridgeConfig;
use crate::convert;
use crate::error::BridgeError;
use crate::model::{Blind, DeviceUpdate, UpdateOrigin, WriteState};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Domain-level view of one MOTION hub.
///
/// Cheaply cloneable via `Arc`. Call [`start`](Self::start) to connect
/// and begin polling; [`close`](Self::close) stops everything.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: BridgeConfig,
    client: BridgeClient,
    /// Last known state per mac. Mutated only from successful
    /// responses and notifications, never from failed commands.
    devices: Mutex<HashMap<String, Blind>>,
    update_tx: broadcast::Sender<Arc<DeviceUpdate>>,
    cancel: CancellationToken,
}

impl Bridge {
    /// Build a bridge from configuration. Fails on missing or invalid
    /// required fields; does not connect.
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        let client_config = config.client_config()?;
        Ok(Self::with_client_config(config, client_config))
    }

    /// Build a bridge with an explicit protocol-level configuration,
    /// for non-standard endpoints such as a scripted hub on loopback.
    pub fn with_client_config(config: BridgeConfig, client_config: ClientConfig) -> Self {
        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(BridgeInner {
                config,
                client: BridgeClient::new(client_config),
                devices: Mutex::new(HashMap::new()),
                update_tx,
                cancel: CancellationToken::new(),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Connect the client, then start the poll sweep and the report
    /// forwarder.
    pub async fn start(&self) -> Result<(), BridgeError> {
        self.inner.client.start().await?;
        tokio::spawn(poll_loop(Arc::clone(&self.inner)));
        tokio::spawn(report_loop(Arc::clone(&self.inner)));
        debug!(bridge = %self.name(), "bridge started");
        Ok(())
    }

    /// Stop polling, close the client, and release subscriptions.
    /// Never fails; idempotent.
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        self.inner.client.close().await;
        debug!(bridge = %self.name(), "bridge closed");
    }

    // ── Observation ──────────────────────────────────────────────────

    /// The hub's own mac, once connected.
    pub fn id(&self) -> Option<String> {
        self.inner.client.bridge_mac()
    }

    /// Display name: the configured name, falling back to the hub ip.
    pub fn name(&self) -> String {
        self.inner
            .config
            .name
            .clone()
            .unwrap_or_else(|| self.inner.config.ip.clone())
    }

    /// Pass-through of the client's availability. Subscribers see the
    /// client's exact transitions, undelayed.
    pub fn availability(&self) -> Availability {
        self.inner.client.availability()
    }

    /// Escape hatch to the underlying protocol client, for diagnostics
    /// and raw access the domain API does not cover.
    pub fn client(&self) -> &BridgeClient {
        &self.inner.client
    }

    /// Subscribe to device updates from all origins.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<Arc<DeviceUpdate>> {
        self.inner.update_tx.subscribe()
    }

    /// Snapshot of the last known state of every cached device.
    pub fn cached_devices(&self) -> Vec<Blind> {
        lock(&self.inner.devices).values().cloned().collect()
    }

    // ── Device operations ────────────────────────────────────────────

    /// Fetch all supported devices from the hub. Unsupported blind
    /// categories are silently excluded.
    pub async fn list_devices(&self) -> Result<Vec<Blind>, BridgeError> {
        let records = self.inner.client.get_all_devices().await?;
        let blinds: Vec<Blind> = records
            .iter()
            .filter_map(|record| convert::blind_from_record(record, &self.inner.config))
            .collect();

        let mut devices = lock(&self.inner.devices);
        for blind in &blinds {
            devices.insert(blind.mac.clone(), blind.clone());
        }
        Ok(blinds)
    }

    /// Fetch one device. `Ok(None)` when the hub does not know the mac
    /// or the device is not a supported category.
    pub async fn get_device(&self, id: &str) -> Result<Option<Blind>, BridgeError> {
        let record = self.inner.client.get_device(id, DEVICE_TYPE_BLIND).await?;
        let blind = record.as_ref().and_then(|r| {
            let blind = convert::blind_from_record(r, &self.inner.config)?;
            lock(&self.inner.devices).insert(blind.mac.clone(), blind.clone());
            Some(blind)
        });
        Ok(blind)
    }

    /// Write a state change. The cache is updated only from the hub's
    /// acknowledgement, so a failed command never leaves stale local
    /// state behind.
    pub async fn update_device(
        &self,
        id: &str,
        write: WriteState,
    ) -> Result<Option<Blind>, BridgeError> {
        let command = convert::command_from_write(write);
        let record = self
            .inner
            .client
            .update_device(id, DEVICE_TYPE_BLIND, command)
            .await?;
        let blind = record.as_ref().and_then(|r| {
            let blind = convert::blind_from_record(r, &self.inner.config)?;
            lock(&self.inner.devices).insert(blind.mac.clone(), blind.clone());
            Some(blind)
        });
        Ok(blind)
    }

    /// One-off reconciliation fetch: re-reads the device and emits a
    /// `Force`-tagged update subscribers must always honor.
    pub async fn force_refresh(&self, id: &str) -> Result<Option<Blind>, BridgeError> {
        let record = self.inner.client.get_device(id, DEVICE_TYPE_BLIND).await?;
        Ok(record
            .as_ref()
            .and_then(|r| self.inner.ingest(r, UpdateOrigin::Force)))
    }

    /// Ask the device to publish a fresh report, without waiting for it.
    pub async fn request_status(&self, id: &str) -> Result<(), BridgeError> {
        self.inner.client.request_status(id, DEVICE_TYPE_BLIND).await?;
        Ok(())
    }

    /// No-op: the hub has no identify capability. Kept so consumers
    /// can wire an identify action unconditionally.
    pub fn identify_device(&self, id: &str) {
        debug!(device = id, "identify requested (hub has no identify capability)");
    }
}

impl BridgeInner {
    /// Normalize, cache, and publish one raw record. Returns `None`
    /// for unsupported device categories.
    fn ingest(&self, record: &DeviceRecord, origin: UpdateOrigin) -> Option<Blind> {
        let blind = convert::blind_from_record(record, &self.config)?;
        lock(&self.devices).insert(blind.mac.clone(), blind.clone());
        let _ = self.update_tx.send(Arc::new(DeviceUpdate {
            device: blind.clone(),
            origin,
        }));
        Some(blind)
    }
}

// ── Background loops ────────────────────────────────────────────────

/// Refetch all devices every poll interval, emitting one `Poll`-tagged
/// update per device. Failures are logged and the loop keeps going.
async fn poll_loop(inner: Arc<BridgeInner>) {
    let interval = inner.config.effective_poll_interval();
    loop {
        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
        match inner.client.get_all_devices().await {
            Ok(records) => {
                for record in &records {
                    inner.ingest(record, UpdateOrigin::Poll);
                }
                debug!(devices = records.len(), "poll sweep complete");
            }
            Err(e) => warn!(error = %e, "device poll failed"),
        }
    }
}

/// Forward unsolicited hub reports as `Report`-tagged updates.
async fn report_loop(inner: Arc<BridgeInner>) {
    let mut reports = inner.client.subscribe_reports();
    loop {
        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => break,
            result = reports.recv() => match result {
                Ok(record) => {
                    inner.ingest(&record, UpdateOrigin::Report);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "report stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
