//! Stateful UDP client for a single MOTION bridge.
//!
//! Owns two sockets: a unicast socket for request/response traffic and
//! a multicast-group member socket for unsolicited hub notifications.
//! Correlates responses to requests through string handles, retries on
//! a fixed backoff schedule, authenticates writes with a derived access
//! token, watches hub liveness through a 65-second no-traffic watchdog,
//! and repairs broken sockets with an indefinite fixed-delay reconnect
//! loop. Higher-level domain semantics live in `shadelink-core`.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{
    self, DeviceCommand, DeviceListEntry, DeviceRecord, Heartbeat, Notification, Operation,
    Request, Response, request_handle,
};
use crate::auth;
use crate::availability::Availability;
use crate::error::ProtoError;
use crate::msgid::MessageIdGenerator;

/// Retry windows for correlated requests, in order.
const RETRY_SCHEDULE_MS: [u64; 4] = [400, 800, 1200, 1600];
/// Retries after the initial send.
const MAX_RETRIES: u32 = 4;
/// The hub heartbeats every 30–60 s; probe only after 65 s of silence.
const WATCHDOG_WINDOW: Duration = Duration::from_secs(65);
/// Delay between reconnect attempts. Intentionally flat: reconnects
/// are rare and an escalating schedule buys nothing here.
const RECONNECT_DELAY: Duration = Duration::from_secs(3);
const NOTIFY_CHANNEL_CAPACITY: usize = 256;
const MAX_DATAGRAM: usize = 4096;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Configuration ───────────────────────────────────────────────────

/// Connection settings for one hub.
///
/// The port and group fields default to the protocol constants; they
/// are overridable so test harnesses can run a scripted hub on
/// loopback.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Address of the hub.
    pub hub_ip: IpAddr,
    /// 16-character pre-shared key from the vendor app.
    pub key: String,
    /// Display name used in logs.
    pub name: Option<String>,
    /// Unicast request port on the hub.
    pub hub_port: u16,
    /// Notification group to join (skipped when not a multicast address).
    pub multicast_group: Ipv4Addr,
    /// Local port for the notification socket.
    pub multicast_port: u16,
    /// Interface to join the group on. `None` lets the OS pick.
    pub multicast_interface: Option<Ipv4Addr>,
}

impl ClientConfig {
    pub fn new(hub_ip: IpAddr, key: impl Into<String>) -> Self {
        Self {
            hub_ip,
            key: key.into(),
            name: None,
            hub_port: api::HUB_PORT,
            multicast_group: api::MULTICAST_GROUP,
            multicast_port: api::MULTICAST_PORT,
            multicast_interface: None,
        }
    }

    fn hub_addr(&self) -> SocketAddr {
        SocketAddr::new(self.hub_ip, self.hub_port)
    }
}

// ── Typed directory listing ─────────────────────────────────────────

/// Decoded `GetDeviceListAck`: the hub's identity, the session token,
/// the reported protocol version, and the device directory.
#[derive(Debug, Clone)]
pub struct DeviceListing {
    pub mac: String,
    pub token: String,
    pub protocol_version: String,
    pub devices: Vec<DeviceListEntry>,
}

// ── Client ──────────────────────────────────────────────────────────

/// Async client for one MOTION bridge.
///
/// Cheaply cloneable via `Arc`. Call [`start`](Self::start) to open the
/// sockets and fetch the directory; [`close`](Self::close) tears
/// everything down and rejects in-flight requests.
#[derive(Clone)]
pub struct BridgeClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    availability: Availability,
    msg_ids: Mutex<MessageIdGenerator>,
    /// Correlation table. At most one pending request per handle; the
    /// entry is removed before its response is delivered.
    pending: Mutex<HashMap<String, oneshot::Sender<Response>>>,
    session: Mutex<Session>,
    connection: Mutex<Option<Connection>>,
    heartbeat_tx: broadcast::Sender<Arc<Heartbeat>>,
    report_tx: broadcast::Sender<Arc<DeviceRecord>>,
    /// Signalled on every inbound datagram; re-arms the watchdog.
    traffic: tokio::sync::Notify,
    cancel: CancellationToken,
    reconnecting: AtomicBool,
}

#[derive(Default)]
struct Session {
    token: Option<String>,
    bridge_mac: Option<String>,
    known_devices: HashSet<String>,
    last_heartbeat: Option<Instant>,
}

struct Connection {
    send_socket: Arc<UdpSocket>,
    notify_addr: SocketAddr,
    cancel: CancellationToken,
}

impl BridgeClient {
    pub fn new(config: ClientConfig) -> Self {
        let (heartbeat_tx, _) = broadcast::channel(NOTIFY_CHANNEL_CAPACITY);
        let (report_tx, _) = broadcast::channel(NOTIFY_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ClientInner {
                config,
                availability: Availability::new(false),
                msg_ids: Mutex::new(MessageIdGenerator::new()),
                pending: Mutex::new(HashMap::new()),
                session: Mutex::new(Session::default()),
                connection: Mutex::new(None),
                heartbeat_tx,
                report_tx,
                traffic: tokio::sync::Notify::new(),
                cancel: CancellationToken::new(),
                reconnecting: AtomicBool::new(false),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Open both sockets, join the notification group, fetch the
    /// directory listing, and arm the heartbeat watchdog.
    ///
    /// Fails fatally (no retry) when the hub reports a protocol version
    /// other than [`api::PROTOCOL_VERSION`] — version skew is not
    /// recoverable by reconnecting.
    pub async fn start(&self) -> Result<(), ProtoError> {
        self.inner.connect().await?;

        if let Err(e) = self.refresh_directory().await {
            self.inner.teardown("startup failed");
            return Err(e);
        }

        self.inner.availability.set_available(true, None);
        tokio::spawn(watchdog_loop(Arc::clone(&self.inner)));
        debug!(hub = %self.inner.config.hub_ip, "bridge client started");
        Ok(())
    }

    /// Tear down both sockets, reject every pending request, and mark
    /// the client permanently unavailable. Never fails; idempotent.
    pub async fn close(&self) {
        self.inner.cancel.cancel();
        self.inner.teardown("closed");
        self.inner.availability.close();
        debug!("bridge client closed");
    }

    // ── Observation ──────────────────────────────────────────────────

    /// The client's liveness flag. Shared: `close()` closes it too.
    pub fn availability(&self) -> Availability {
        self.inner.availability.clone()
    }

    /// Subscribe to unsolicited device state reports.
    pub fn subscribe_reports(&self) -> broadcast::Receiver<Arc<DeviceRecord>> {
        self.inner.report_tx.subscribe()
    }

    /// Subscribe to hub heartbeats.
    pub fn subscribe_heartbeats(&self) -> broadcast::Receiver<Arc<Heartbeat>> {
        self.inner.heartbeat_tx.subscribe()
    }

    /// The hub's own mac, learned from the directory listing.
    pub fn bridge_mac(&self) -> Option<String> {
        lock(&self.inner.session).bridge_mac.clone()
    }

    /// Current session token, if a directory listing or heartbeat has
    /// delivered one. Diagnostics only; writes derive their own token.
    pub fn session_token(&self) -> Option<String> {
        lock(&self.inner.session).token.clone()
    }

    /// `deviceType:mac` keys of every device the hub has reported.
    pub fn known_devices(&self) -> HashSet<String> {
        lock(&self.inner.session).known_devices.clone()
    }

    /// Local address of the notification socket, when connected.
    pub fn notify_addr(&self) -> Option<SocketAddr> {
        lock(&self.inner.connection).as_ref().map(|c| c.notify_addr)
    }

    // ── Requests ─────────────────────────────────────────────────────

    /// Fetch the device directory, refreshing the session token.
    pub async fn get_device_list(&self) -> Result<DeviceListing, ProtoError> {
        self.inner.get_device_list().await
    }

    /// Read one device's raw record. `Ok(None)` means the hub answered
    /// "device not exist" — absence, not an error.
    pub async fn get_device(
        &self,
        mac: &str,
        device_type: &str,
    ) -> Result<Option<DeviceRecord>, ProtoError> {
        let handle = request_handle("ReadDeviceAck", Some(mac));
        let request = Request::ReadDevice {
            msg_id: String::new(),
            mac: mac.to_owned(),
            device_type: device_type.to_owned(),
        };
        let response = self.inner.send_receive(request, Some(handle)).await?;
        response.map(|r| record_from_response(r, mac, device_type)).transpose()
    }

    /// Fetch the directory, then read every non-bridge device in
    /// parallel. Devices that vanished between the two steps are
    /// skipped silently.
    pub async fn get_all_devices(&self) -> Result<Vec<DeviceRecord>, ProtoError> {
        let listing = self.inner.get_device_list().await?;
        let reads = listing
            .devices
            .iter()
            .filter(|entry| entry.device_type != api::DEVICE_TYPE_BRIDGE)
            .map(|entry| self.get_device(&entry.mac, &entry.device_type));
        let records = futures_util::future::try_join_all(reads).await?;
        Ok(records.into_iter().flatten().collect())
    }

    /// Write a state change to one device.
    ///
    /// Validates the payload locally and requires a session token; both
    /// failures reject before any network I/O.
    pub async fn update_device(
        &self,
        mac: &str,
        device_type: &str,
        command: DeviceCommand,
    ) -> Result<Option<DeviceRecord>, ProtoError> {
        let request = self.inner.write_request(mac, device_type, command)?;
        let handle = request_handle("WriteDeviceAck", Some(mac));
        let response = self.inner.send_receive(request, Some(handle)).await?;
        response.map(|r| record_from_response(r, mac, device_type)).transpose()
    }

    /// Fire-and-forget status query: asks the device to publish a
    /// fresh `Report`, without waiting for an acknowledgement.
    pub async fn request_status(&self, mac: &str, device_type: &str) -> Result<(), ProtoError> {
        let command = DeviceCommand {
            operation: Some(Operation::StatusQuery.code()),
            target_position: None,
        };
        let request = self.inner.write_request(mac, device_type, command)?;
        self.inner.send_receive(request, None).await?;
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────

    /// Fetch the directory, enforce the protocol version, and install
    /// the session (token, hub mac, known-device set).
    async fn refresh_directory(&self) -> Result<(), ProtoError> {
        let listing = self.inner.get_device_list().await?;
        if listing.protocol_version != api::PROTOCOL_VERSION {
            return Err(ProtoError::VersionMismatch {
                expected: api::PROTOCOL_VERSION.to_owned(),
                actual: listing.protocol_version,
            });
        }

        let mut session = lock(&self.inner.session);
        session.token = Some(listing.token);
        session.bridge_mac = Some(listing.mac);
        session.known_devices = listing
            .devices
            .iter()
            .map(|d| format!("{}:{}", d.device_type, d.mac))
            .collect();
        Ok(())
    }
}

impl ClientInner {
    // ── Sockets ──────────────────────────────────────────────────────

    async fn connect(self: &Arc<Self>) -> Result<(), ProtoError> {
        // Drop any previous connection first so stale recv loops stop.
        if let Some(old) = lock(&self.connection).take() {
            old.cancel.cancel();
        }

        let send_socket = Arc::new(UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?);
        let notify_socket =
            UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.config.multicast_port)).await?;
        if self.config.multicast_group.is_multicast() {
            let interface = self
                .config
                .multicast_interface
                .unwrap_or(Ipv4Addr::UNSPECIFIED);
            notify_socket.join_multicast_v4(self.config.multicast_group, interface)?;
        }
        let notify_addr = notify_socket.local_addr()?;

        let cancel = self.cancel.child_token();
        lock(&self.connection).replace(Connection {
            send_socket: Arc::clone(&send_socket),
            notify_addr,
            cancel: cancel.clone(),
        });

        tokio::spawn(unicast_recv_loop(
            Arc::clone(self),
            send_socket,
            cancel.clone(),
        ));
        tokio::spawn(notify_recv_loop(
            Arc::clone(self),
            Arc::new(notify_socket),
            cancel,
        ));
        Ok(())
    }

    /// Mark unavailable, stop the recv loops, and reject every pending
    /// request by dropping its sender.
    fn teardown(&self, reason: &str) {
        self.availability.set_available(false, Some(reason.to_owned()));
        if let Some(connection) = lock(&self.connection).take() {
            connection.cancel.cancel();
        }
        lock(&self.pending).clear();
    }

    fn spawn_reconnect(self: &Arc<Self>, reason: String) {
        if self.cancel.is_cancelled() {
            return;
        }
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return; // a repair loop is already running
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let mut attempt: u32 = 1;
            loop {
                info!(reason = %reason, attempt, "reconnecting to hub");
                inner.teardown("repairing connection");

                let result = async {
                    inner.connect().await?;
                    inner.probe().await
                }
                .await;

                match result {
                    Ok(()) => {
                        inner.availability.set_available(true, None);
                        info!(attempt, "reconnected to hub");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, attempt, "reconnect attempt failed");
                        tokio::select! {
                            biased;
                            () = inner.cancel.cancelled() => break,
                            () = tokio::time::sleep(RECONNECT_DELAY) => {}
                        }
                        attempt += 1;
                    }
                }
            }
            inner.reconnecting.store(false, Ordering::SeqCst);
        });
    }

    // ── Send / receive ───────────────────────────────────────────────

    fn next_msg_id(&self) -> String {
        lock(&self.msg_ids).next()
    }

    /// The single request primitive.
    ///
    /// Without a handle the request is sent once, fire-and-forget. With
    /// a handle the request is registered in the pending table and
    /// re-sent (fresh msgID, same handle) on the retry schedule until a
    /// correlated response arrives or the schedule is exhausted. A
    /// send-level failure rejects immediately — no retry.
    async fn send_receive(
        &self,
        mut request: Request,
        handle: Option<String>,
    ) -> Result<Option<Response>, ProtoError> {
        let msg_type = request.msg_type().to_owned();
        let (socket, hub_addr) = {
            let connection = lock(&self.connection);
            let connection = connection.as_ref().ok_or(ProtoError::NotConnected)?;
            (Arc::clone(&connection.send_socket), self.config.hub_addr())
        };

        let Some(handle) = handle else {
            request.set_msg_id(self.next_msg_id());
            let payload = encode(&request)?;
            socket.send_to(&payload, hub_addr).await?;
            return Ok(None);
        };

        let mut response_rx = {
            let mut pending = lock(&self.pending);
            if pending.contains_key(&handle) {
                return Err(ProtoError::RequestInFlight { handle });
            }
            let (tx, rx) = oneshot::channel();
            pending.insert(handle.clone(), tx);
            rx
        };

        for attempt in 0..=MAX_RETRIES {
            request.set_msg_id(self.next_msg_id());
            let payload = match encode(&request) {
                Ok(p) => p,
                Err(e) => {
                    lock(&self.pending).remove(&handle);
                    return Err(e);
                }
            };
            if let Err(e) = socket.send_to(&payload, hub_addr).await {
                lock(&self.pending).remove(&handle);
                return Err(ProtoError::Socket(e));
            }

            match tokio::time::timeout(retry_window(attempt), &mut response_rx).await {
                Ok(Ok(response)) => return resolve_response(response, &msg_type),
                // Sender dropped: the connection was torn down underneath us.
                Ok(Err(_)) => return Err(ProtoError::ConnectionLost { msg_type }),
                Err(_) if attempt == MAX_RETRIES => {
                    lock(&self.pending).remove(&handle);
                    return Err(ProtoError::Timeout {
                        msg_type,
                        retries: MAX_RETRIES,
                    });
                }
                Err(_) => {} // window elapsed; fall through to the next attempt
            }
        }

        lock(&self.pending).remove(&handle);
        Err(ProtoError::Timeout {
            msg_type,
            retries: MAX_RETRIES,
        })
    }

    async fn get_device_list(&self) -> Result<DeviceListing, ProtoError> {
        let handle = request_handle("GetDeviceListAck", None);
        let request = Request::GetDeviceList {
            msg_id: String::new(),
        };
        let response = self
            .send_receive(request, Some(handle))
            .await?
            .ok_or_else(|| ProtoError::EmptyResponse {
                msg_type: "GetDeviceList".to_owned(),
            })?;

        let devices = match response.data {
            Some(data) => serde_json::from_value(data)
                .map_err(|e| ProtoError::Malformed(format!("device list payload: {e}")))?,
            None => Vec::new(),
        };
        Ok(DeviceListing {
            mac: response
                .mac
                .ok_or_else(|| ProtoError::Malformed("GetDeviceListAck without mac".into()))?,
            token: response
                .token
                .ok_or_else(|| ProtoError::Malformed("GetDeviceListAck without token".into()))?,
            protocol_version: response.protocol_version.unwrap_or_default(),
            devices,
        })
    }

    /// Liveness probe: a directory listing whose payload is discarded.
    async fn probe(&self) -> Result<(), ProtoError> {
        self.get_device_list().await.map(|_| ())
    }

    /// Build an authorized `WriteDevice` request, validating the
    /// payload and the token precondition before any network I/O.
    fn write_request(
        &self,
        mac: &str,
        device_type: &str,
        command: DeviceCommand,
    ) -> Result<Request, ProtoError> {
        if let Some(position) = command.target_position {
            if position > 100 {
                return Err(ProtoError::Validation {
                    field: "targetPosition",
                    value: position.to_string(),
                });
            }
        }
        if let Some(operation) = command.operation {
            if operation > api::MAX_OPERATION_CODE {
                return Err(ProtoError::Validation {
                    field: "operation",
                    value: operation.to_string(),
                });
            }
        }

        let token = lock(&self.session)
            .token
            .clone()
            .ok_or(ProtoError::MissingToken)?;
        let access_token = auth::access_token(&self.config.key, &token)?;

        Ok(Request::WriteDevice {
            msg_id: String::new(),
            mac: mac.to_owned(),
            device_type: device_type.to_owned(),
            access_token,
            data: command,
        })
    }

    // ── Inbound traffic ──────────────────────────────────────────────

    fn handle_response(&self, payload: &[u8]) {
        let response: Response = match serde_json::from_slice(payload) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, len = payload.len(), "failed to decode response datagram");
                return;
            }
        };
        self.traffic.notify_waiters();

        // Every directory listing refreshes the session token.
        if response.is_device_list_ack() {
            if let Some(token) = &response.token {
                lock(&self.session).token = Some(token.clone());
            }
        }

        let handle = request_handle(
            &response.msg_type,
            if response.is_device_list_ack() {
                None
            } else {
                response.mac.as_deref()
            },
        );

        // Removed before delivery: no other waiter can observe the entry.
        let sender = lock(&self.pending).remove(&handle);
        match sender {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => debug!(handle = %handle, "response without a pending request"),
        }
    }

    fn handle_notification(&self, payload: &[u8]) {
        // A payload that fails to parse affects neither availability
        // nor the watchdog.
        let notification = match Notification::parse(payload) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, len = payload.len(), "dropping malformed notification");
                return;
            }
        };
        self.traffic.notify_waiters();

        // Any parseable notification proves the hub is alive.
        self.availability.set_available(true, None);

        match notification {
            Notification::Heartbeat(heartbeat) => {
                let since = {
                    let mut session = lock(&self.session);
                    session.token = Some(heartbeat.token.clone());
                    let previous = session.last_heartbeat.replace(Instant::now());
                    previous.map(|at| at.elapsed().as_secs())
                };
                match since {
                    Some(seconds) => debug!(seconds, "heartbeat received"),
                    None => debug!("heartbeat received"),
                }
                let _ = self.heartbeat_tx.send(Arc::new(heartbeat));
            }
            Notification::Report(record) => {
                let _ = self.report_tx.send(Arc::new(record));
            }
            Notification::Unknown(kind) => {
                warn!(kind = %kind, "unknown notification type");
            }
        }
    }
}

// ── Background loops ────────────────────────────────────────────────

async fn unicast_recv_loop(
    inner: Arc<ClientInner>,
    socket: Arc<UdpSocket>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, _peer)) => inner.handle_response(&buf[..len]),
                Err(e) => {
                    inner.spawn_reconnect(format!("request socket error: {e}"));
                    break;
                }
            }
        }
    }
}

async fn notify_recv_loop(
    inner: Arc<ClientInner>,
    socket: Arc<UdpSocket>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, _peer)) => inner.handle_notification(&buf[..len]),
                Err(e) => {
                    inner.spawn_reconnect(format!("notification socket error: {e}"));
                    break;
                }
            }
        }
    }
}

/// Probe the hub whenever no inbound traffic arrives for a full
/// watchdog window. Probe success re-marks availability; failure
/// records the probe error. Either outcome re-arms the window.
async fn watchdog_loop(inner: Arc<ClientInner>) {
    loop {
        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => break,
            () = inner.traffic.notified() => {} // traffic seen; re-arm
            () = tokio::time::sleep(WATCHDOG_WINDOW) => {
                match inner.probe().await {
                    Ok(()) => {
                        inner.availability.set_available(true, None);
                        debug!("proactive probe succeeded");
                    }
                    Err(e) => {
                        debug!(error = %e, "proactive probe failed");
                        inner.availability.set_available(false, Some(e.to_string()));
                    }
                }
            }
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn encode(request: &Request) -> Result<Vec<u8>, ProtoError> {
    serde_json::to_vec(request).map_err(|e| ProtoError::Malformed(e.to_string()))
}

/// Wait window for the given attempt. Past the fixed schedule the last
/// window repeats with a small attempt-seeded spread so stacked retries
/// don't align.
fn retry_window(attempt: u32) -> Duration {
    match RETRY_SCHEDULE_MS.get(attempt as usize) {
        Some(ms) => Duration::from_millis(*ms),
        None => {
            let last = RETRY_SCHEDULE_MS[RETRY_SCHEDULE_MS.len() - 1];
            Duration::from_millis(last + (u64::from(attempt) * 23) % 97)
        }
    }
}

/// Apply the response resolution policy.
///
/// `data` resolves; `actionResult == "device not exist"` is a
/// successful empty result; any other non-empty `actionResult` rejects
/// with that text; neither is a protocol error.
fn resolve_response(response: Response, msg_type: &str) -> Result<Option<Response>, ProtoError> {
    if response.data.is_some() {
        return Ok(Some(response));
    }
    match response.action_result.as_deref() {
        Some("device not exist") => Ok(None),
        Some(message) if !message.is_empty() => Err(ProtoError::Rejected {
            msg_type: msg_type.to_owned(),
            message: message.to_owned(),
        }),
        _ => Err(ProtoError::EmptyResponse {
            msg_type: msg_type.to_owned(),
        }),
    }
}

/// Decode the `data` payload of a per-device ack into a record.
fn record_from_response(
    response: Response,
    mac: &str,
    device_type: &str,
) -> Result<DeviceRecord, ProtoError> {
    let msg_type = response.msg_type.clone();
    let data = response
        .data
        .ok_or_else(|| ProtoError::EmptyResponse {
            msg_type: msg_type.clone(),
        })?;
    let status = serde_json::from_value(data)
        .map_err(|e| ProtoError::Malformed(format!("{msg_type} payload: {e}")))?;
    Ok(DeviceRecord {
        mac: response.mac.unwrap_or_else(|| mac.to_owned()),
        device_type: response.device_type.unwrap_or_else(|| device_type.to_owned()),
        data: status,
    })
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;

    use super::*;

    fn response(json: serde_json::Value) -> Response {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn retry_schedule_matches_documented_backoff() {
        assert_eq!(retry_window(0), Duration::from_millis(400));
        assert_eq!(retry_window(1), Duration::from_millis(800));
        assert_eq!(retry_window(2), Duration::from_millis(1200));
        assert_eq!(retry_window(3), Duration::from_millis(1600));
        // Past the schedule: the last window plus a sub-100ms spread.
        let overflow = retry_window(4);
        assert!(overflow >= Duration::from_millis(1600));
        assert!(overflow < Duration::from_millis(1700));
    }

    #[test]
    fn data_payload_resolves() {
        let resolved = resolve_response(
            response(serde_json::json!({
                "msgType": "ReadDeviceAck",
                "mac": "a4cf12345678",
                "data": { "type": 1, "operation": 1, "currentPosition": 10 }
            })),
            "ReadDevice",
        )
        .unwrap();
        assert!(resolved.is_some());
    }

    #[test]
    fn device_not_exist_resolves_empty() {
        let resolved = resolve_response(
            response(serde_json::json!({
                "msgType": "ReadDeviceAck",
                "actionResult": "device not exist"
            })),
            "ReadDevice",
        )
        .unwrap();
        assert!(resolved.is_none());
    }

    #[test]
    fn other_action_result_rejects() {
        let err = resolve_response(
            response(serde_json::json!({
                "msgType": "WriteDeviceAck",
                "actionResult": "AccessToken error"
            })),
            "WriteDevice",
        )
        .unwrap_err();
        assert!(matches!(err, ProtoError::Rejected { message, .. } if message == "AccessToken error"));
    }

    #[test]
    fn empty_response_is_a_protocol_error() {
        let err = resolve_response(
            response(serde_json::json!({ "msgType": "WriteDeviceAck" })),
            "WriteDevice",
        )
        .unwrap_err();
        assert!(matches!(err, ProtoError::EmptyResponse { msg_type } if msg_type == "WriteDevice"));
    }

    #[tokio::test]
    async fn write_validation_rejects_before_any_io() {
        // Deliberately not started: a validation failure must reject
        // before the missing connection could even matter.
        let client = BridgeClient::new(ClientConfig::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            "0123456789abcdef",
        ));

        let err = client
            .update_device(
                "a4cf12345678",
                api::DEVICE_TYPE_BLIND,
                DeviceCommand {
                    operation: None,
                    target_position: Some(101),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProtoError::Validation { field: "targetPosition", .. }));

        let err = client
            .update_device(
                "a4cf12345678",
                api::DEVICE_TYPE_BLIND,
                DeviceCommand {
                    operation: Some(9),
                    target_position: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProtoError::Validation { field: "operation", .. }));
    }

    #[tokio::test]
    async fn write_without_session_token_is_rejected() {
        let client = BridgeClient::new(ClientConfig::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            "0123456789abcdef",
        ));

        let err = client
            .update_device(
                "a4cf12345678",
                api::DEVICE_TYPE_BLIND,
                DeviceCommand {
                    operation: Some(Operation::OpenUp.code()),
                    target_position: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProtoError::MissingToken));
    }
}
