//! Link manager for discovering, pairing with and streaming from one device.
//!
//! [`LinkManager`] owns the connection state machine. Every transition is
//! checked and applied under one lock that is never held across an await,
//! so conflicting requests fail fast instead of queueing behind an
//! in-flight operation.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::connection::ConnectionState;
use crate::data::{DeviceDescriptor, SensorFrame};
use crate::error::{Error, Result};
use crate::hub::TelemetryHub;
use crate::link::{ActiveLink, LinkLoss, LossHandler};
use crate::registry::DeviceRegistry;
use crate::subscription::{CallbackHandle, Subscribers};
use crate::transport::{Session, Transport};

/// A discovery or connect attempt in flight.
struct Attempt {
    id: u64,
    cancel: CancellationToken,
}

struct Inner {
    state: ConnectionState,
    attempt: Option<Attempt>,
    link: Option<ActiveLink>,
    last_loss: Option<LinkLoss>,
}

/// A state change reserved under the lock, delivered after releasing it.
#[must_use]
struct PendingState {
    sequence: u64,
    state: ConnectionState,
}

struct Shared {
    transport: Arc<dyn Transport>,
    config: LinkConfig,
    hub: Arc<TelemetryHub>,
    registry: RwLock<DeviceRegistry>,
    inner: Mutex<Inner>,
    devices_found: Subscribers<Vec<DeviceDescriptor>>,
    root: CancellationToken,
    next_id: AtomicU64,
}

/// Single-device link manager.
///
/// Owned by the host; there is no global instance. Dropping the manager
/// cancels every attempt and background task it started.
pub struct LinkManager {
    shared: Arc<Shared>,
}

impl LinkManager {
    /// Create a manager driving `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `config` does not validate.
    pub fn new(transport: Arc<dyn Transport>, config: LinkConfig) -> Result<Self> {
        config.validate()?;

        let hub = Arc::new(TelemetryHub::new(config.channel_capacity));

        Ok(Self {
            shared: Arc::new(Shared {
                transport,
                config,
                hub,
                registry: RwLock::new(DeviceRegistry::new()),
                inner: Mutex::new(Inner {
                    state: ConnectionState::Idle,
                    attempt: None,
                    link: None,
                    last_loss: None,
                }),
                devices_found: Subscribers::new(),
                root: CancellationToken::new(),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    // === Setup ===

    /// Make sure the adapter is on and the needed permissions are granted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BluetoothUnavailable`] if the adapter stays off and
    /// [`Error::PermissionDenied`] if permissions are refused.
    pub async fn initialize(&self) -> Result<()> {
        let transport = &self.shared.transport;

        let enabled = match transport.is_enabled().await {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!("Could not query Bluetooth adapter: {}", e);
                false
            }
        };

        if !enabled {
            info!("Bluetooth adapter is off, requesting enable");
            match transport.request_enable().await {
                Ok(true) => {}
                Ok(false) => return Err(Error::BluetoothUnavailable),
                Err(e) => {
                    warn!("Enable request failed: {}", e);
                    return Err(Error::BluetoothUnavailable);
                }
            }
        }

        match transport.request_permissions().await {
            Ok(true) => {}
            Ok(false) | Err(Error::PermissionDenied) => return Err(Error::PermissionDenied),
            Err(e) => return Err(e),
        }

        info!("Bluetooth ready");
        Ok(())
    }

    // === Subscriptions ===

    /// Register a callback for each completed discovery pass.
    ///
    /// The callback receives every device the registry knows.
    pub fn on_devices_found<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&Vec<DeviceDescriptor>) + Send + Sync + 'static,
    {
        self.shared.devices_found.subscribe(callback)
    }

    /// Register a callback for connection state changes.
    pub fn on_connection_change<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.shared.hub.subscribe_connection(callback)
    }

    /// Register a callback for decoded frames.
    pub fn on_data_received<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&SensorFrame) + Send + Sync + 'static,
    {
        self.shared.hub.subscribe_frame(callback)
    }

    // === Discovery ===

    /// Run one discovery pass.
    ///
    /// Returns every device known to the registry, bonded devices first.
    ///
    /// # Errors
    ///
    /// Fails fast with [`Error::DiscoveryInProgress`],
    /// [`Error::ConnectionInProgress`] or [`Error::InvalidState`] when the
    /// link is busy. Transport failures surface as
    /// [`Error::DiscoveryFailed`]. The state returns to `Idle` either way.
    pub async fn start_discovery(&self) -> Result<Vec<DeviceDescriptor>> {
        let shared = &self.shared;

        let (attempt_id, cancel, pending) = {
            let mut inner = shared.inner.lock();
            ensure_available(inner.state)?;
            let (id, cancel) = shared.begin_attempt(&mut inner);
            (id, cancel, shared.set_state(&mut inner, ConnectionState::Discovering))
        };
        shared.deliver(pending);
        let _guard = AttemptGuard {
            shared: shared.as_ref(),
            id: attempt_id,
        };
        info!("Starting device discovery");

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = shared.run_discovery(cancel.clone()) => result,
        };
        shared.finish_attempt(attempt_id, ConnectionState::Idle);

        match result {
            Ok(devices) => {
                info!("Discovery finished with {} device(s)", devices.len());
                shared.devices_found.notify(&devices);
                Ok(devices)
            }
            Err(e) => {
                let e = e.into_discovery_failure();
                warn!("Discovery failed: {}", e);
                Err(e)
            }
        }
    }

    /// Devices the platform already trusts.
    ///
    /// The result is merged into the registry.
    pub async fn get_paired_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let bonded = self.shared.transport.list_bonded().await?;
        self.shared.registry.write().merge(bonded.iter().cloned());
        Ok(bonded)
    }

    // === Connection ===

    /// Connect to `device`, pairing first if it is not bonded.
    ///
    /// # Errors
    ///
    /// Fails fast with [`Error::ConnectionInProgress`],
    /// [`Error::DiscoveryInProgress`] or [`Error::InvalidState`] when the
    /// link is busy, leaving the running operation untouched. Otherwise
    /// returns [`Error::PairingFailed`], [`Error::ConnectionTimeout`],
    /// [`Error::ConnectionFailed`] or [`Error::Cancelled`], after which the
    /// state is back to `Idle`.
    pub async fn connect(&self, device: &DeviceDescriptor) -> Result<()> {
        let shared = &self.shared;
        let needs_pairing = !device.bonded
            && !shared
                .registry
                .read()
                .get(&device.address)
                .is_some_and(|known| known.bonded);

        let (attempt_id, cancel, pending) = {
            let mut inner = shared.inner.lock();
            ensure_available(inner.state)?;
            let (id, cancel) = shared.begin_attempt(&mut inner);
            let next = if needs_pairing {
                ConnectionState::Pairing
            } else {
                ConnectionState::Connecting
            };
            (id, cancel, shared.set_state(&mut inner, next))
        };
        shared.deliver(pending);
        let _guard = AttemptGuard {
            shared: shared.as_ref(),
            id: attempt_id,
        };
        info!("Connecting to {}", device);

        let result = shared
            .run_connect(attempt_id, device, needs_pairing, &cancel)
            .await;

        if let Err(e) = &result {
            warn!("Connection to {} failed: {}", device, e);
        }
        result
    }

    /// Tear down the link or abandon the operation in flight.
    ///
    /// Closing the session is best-effort; the state ends at `Idle`
    /// whatever the transport reports.
    pub async fn disconnect(&self) -> Result<()> {
        let shared = &self.shared;

        let (link, pending) = {
            let mut inner = shared.inner.lock();
            match inner.state {
                ConnectionState::Idle | ConnectionState::Disconnecting => {
                    debug!("Nothing to disconnect while {}", inner.state);
                    return Ok(());
                }
                ConnectionState::Discovering
                | ConnectionState::Pairing
                | ConnectionState::Connecting => {
                    if let Some(attempt) = inner.attempt.take() {
                        info!("Cancelling {} attempt", inner.state);
                        attempt.cancel.cancel();
                    }
                    (None, shared.set_state(&mut inner, ConnectionState::Idle))
                }
                ConnectionState::Lost => {
                    (None, shared.set_state(&mut inner, ConnectionState::Idle))
                }
                ConnectionState::Connected => {
                    let link = inner.link.take();
                    (link, shared.set_state(&mut inner, ConnectionState::Disconnecting))
                }
            }
        };
        shared.deliver(pending);

        if let Some(link) = link {
            info!("Disconnecting from {}", link.device());
            if let Err(e) = link.close().await {
                warn!("Error closing session: {}", e);
            }

            let pending = {
                let mut inner = shared.inner.lock();
                if inner.state == ConnectionState::Disconnecting {
                    shared.set_state(&mut inner, ConnectionState::Idle)
                } else {
                    None
                }
            };
            shared.deliver(pending);
        }

        Ok(())
    }

    /// Disconnect and forget every known device.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down link manager");
        self.disconnect().await?;
        self.shared.registry.write().reset();
        Ok(())
    }

    /// Write raw bytes to the connected device.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        let session = self
            .shared
            .inner
            .lock()
            .link
            .as_ref()
            .map(ActiveLink::session)
            .ok_or(Error::NotConnected)?;
        session.send(data).await
    }

    // === Queries ===

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// Most recent decoded frame.
    pub fn latest_frame(&self) -> Option<SensorFrame> {
        self.shared.hub.latest_frame()
    }

    /// Every device the registry knows.
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.shared.registry.read().devices()
    }

    /// Forget every known device.
    pub fn reset_devices(&self) {
        self.shared.registry.write().reset();
    }

    /// The connected device, if any.
    pub fn active_device(&self) -> Option<DeviceDescriptor> {
        self.shared
            .inner
            .lock()
            .link
            .as_ref()
            .map(|link| link.device().clone())
    }

    /// Why the last link was lost, until the next successful connect.
    pub fn last_loss(&self) -> Option<LinkLoss> {
        self.shared.inner.lock().last_loss.clone()
    }

    /// The telemetry hub frames and states are published to.
    pub fn hub(&self) -> Arc<TelemetryHub> {
        self.shared.hub.clone()
    }

    /// The configuration in use.
    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }
}

impl Drop for LinkManager {
    fn drop(&mut self) {
        self.shared.root.cancel();
    }
}

impl std::fmt::Debug for LinkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkManager")
            .field("state", &self.state())
            .field("active_device", &self.active_device())
            .field("devices", &self.shared.registry.read().len())
            .finish()
    }
}

impl Shared {
    fn begin_attempt(&self, inner: &mut Inner) -> (u64, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = self.root.child_token();
        inner.attempt = Some(Attempt {
            id,
            cancel: cancel.clone(),
        });
        (id, cancel)
    }

    fn is_current(inner: &Inner, id: u64) -> bool {
        inner.attempt.as_ref().map(|attempt| attempt.id) == Some(id)
    }

    /// End attempt `id` in `next`, unless it was already superseded.
    fn finish_attempt(&self, id: u64, next: ConnectionState) {
        let pending = {
            let mut inner = self.inner.lock();
            if !Self::is_current(&inner, id) {
                return;
            }
            if let Some(attempt) = inner.attempt.take() {
                attempt.cancel.cancel();
            }
            self.set_state(&mut inner, next)
        };
        self.deliver(pending);
    }

    /// Move attempt `id` on to `next`, or report it abandoned.
    fn advance_attempt(&self, id: u64, next: ConnectionState) -> Result<()> {
        let pending = {
            let mut inner = self.inner.lock();
            if !Self::is_current(&inner, id) {
                return Err(Error::Cancelled);
            }
            self.set_state(&mut inner, next)
        };
        self.deliver(pending);
        Ok(())
    }

    fn set_state(&self, inner: &mut Inner, next: ConnectionState) -> Option<PendingState> {
        let previous = inner.state;
        if previous == next {
            return None;
        }
        if !previous.can_transition_to(next) {
            warn!("Unexpected state transition {} -> {}", previous, next);
        }

        debug!("Connection state: {} -> {}", previous, next);
        inner.state = next;
        Some(PendingState {
            sequence: self.hub.reserve_sequence(),
            state: next,
        })
    }

    fn deliver(&self, pending: Option<PendingState>) {
        if let Some(PendingState { sequence, state }) = pending {
            self.hub.deliver_connection(sequence, state);
        }
    }

    async fn run_discovery(&self, cancel: CancellationToken) -> Result<Vec<DeviceDescriptor>> {
        let bonded = self.transport.list_bonded().await?;
        debug!("{} bonded device(s)", bonded.len());
        let discovered = self.transport.discover(cancel).await?;
        debug!("{} device(s) discovered", discovered.len());

        let mut registry = self.registry.write();
        registry.merge(bonded);
        registry.merge(discovered);
        Ok(registry.devices())
    }

    async fn run_connect(
        self: &Arc<Self>,
        id: u64,
        device: &DeviceDescriptor,
        needs_pairing: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if needs_pairing {
            self.pair(device, cancel).await?;
            self.registry.write().mark_bonded(&device.address);
            self.advance_attempt(id, ConnectionState::Connecting)?;
        }

        let session = self.open_session(device, cancel).await?;
        self.install_link(id, device, session).await
    }

    async fn pair(&self, device: &DeviceDescriptor, cancel: &CancellationToken) -> Result<()> {
        info!("Pairing with {}", device);

        let bonded = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            bonded = self.transport.create_bond(&device.address) => bonded,
        };

        match bonded {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::PairingFailed {
                address: device.address.clone(),
                reason: "device did not bond".to_string(),
            }),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => Err(Error::PairingFailed {
                address: device.address.clone(),
                reason: e.to_string(),
            }),
        }
    }

    async fn open_session(
        &self,
        device: &DeviceDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn Session>> {
        let timeout = self.config.connect_timeout;
        let options = self.config.connect_options();
        let transport_cancel = cancel.child_token();

        let opened = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            opened = tokio::time::timeout(
                timeout,
                self.transport.connect(&device.address, &options, transport_cancel.clone()),
            ) => opened,
        };

        match opened {
            Ok(Ok(session)) => Ok(session),
            Ok(Err(e)) => Err(e.into_connect_failure()),
            Err(_) => {
                transport_cancel.cancel();
                Err(Error::ConnectionTimeout { timeout })
            }
        }
    }

    async fn install_link(
        self: &Arc<Self>,
        id: u64,
        device: &DeviceDescriptor,
        session: Box<dyn Session>,
    ) -> Result<()> {
        let session: Arc<dyn Session> = Arc::from(session);

        let installed = {
            let mut inner = self.inner.lock();
            if Self::is_current(&inner, id) {
                inner.attempt = None;
                let link = ActiveLink::new(
                    id,
                    device.clone(),
                    session.clone(),
                    self.hub.clone(),
                    self.config.clone(),
                    &self.root,
                    self.loss_handler(),
                );
                link.start();
                inner.link = Some(link);
                inner.last_loss = None;
                Some(self.set_state(&mut inner, ConnectionState::Connected))
            } else {
                None
            }
        };

        match installed {
            Some(pending) => {
                self.deliver(pending);
                info!("Connected to {}", device);
                Ok(())
            }
            None => {
                debug!("Closing session opened for an abandoned attempt");
                if let Err(e) = session.close().await {
                    warn!("Error closing abandoned session: {}", e);
                }
                Err(Error::Cancelled)
            }
        }
    }

    fn loss_handler(self: &Arc<Self>) -> LossHandler {
        let shared = Arc::downgrade(self);
        Arc::new(move |id: u64, loss: LinkLoss| {
            if let Some(shared) = shared.upgrade() {
                shared.handle_link_lost(id, loss);
            }
        })
    }

    fn handle_link_lost(&self, id: u64, loss: LinkLoss) {
        let (link, pending) = {
            let mut inner = self.inner.lock();
            if inner.link.as_ref().map(ActiveLink::id) != Some(id) {
                debug!("Ignoring loss report from stale link {}", id);
                return;
            }
            let link = inner.link.take();
            inner.last_loss = Some(loss.clone());
            (link, self.set_state(&mut inner, ConnectionState::Lost))
        };
        self.deliver(pending);
        warn!("Link {} lost: {}", id, loss);

        if let Some(link) = link {
            link.stop();
            tokio::spawn(async move {
                if let Err(e) = link.close().await {
                    warn!("Error closing lost session: {}", e);
                }
            });
        }
    }
}

/// Ends an attempt in `Idle` on every exit path, including a dropped future.
struct AttemptGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.shared.finish_attempt(self.id, ConnectionState::Idle);
    }
}

/// Reject a new discovery or connect request unless the link is free.
fn ensure_available(state: ConnectionState) -> Result<()> {
    match state {
        ConnectionState::Idle | ConnectionState::Lost => Ok(()),
        ConnectionState::Discovering => Err(Error::DiscoveryInProgress),
        ConnectionState::Pairing | ConnectionState::Connecting => Err(Error::ConnectionInProgress),
        ConnectionState::Connected | ConnectionState::Disconnecting => {
            Err(Error::InvalidState { state })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    use crate::transport::{ConnectOptions, MockSession};

    /// Transport with nothing attached.
    struct EmptyTransport;

    #[async_trait]
    impl Transport for EmptyTransport {
        async fn is_enabled(&self) -> Result<bool> {
            Ok(true)
        }

        async fn request_enable(&self) -> Result<bool> {
            Ok(true)
        }

        async fn request_permissions(&self) -> Result<bool> {
            Ok(true)
        }

        async fn list_bonded(&self) -> Result<Vec<DeviceDescriptor>> {
            Ok(vec![])
        }

        async fn discover(&self, _cancel: CancellationToken) -> Result<Vec<DeviceDescriptor>> {
            Ok(vec![DeviceDescriptor::new("AA", None, false)])
        }

        async fn create_bond(&self, _address: &str) -> Result<bool> {
            Ok(false)
        }

        async fn connect(
            &self,
            _address: &str,
            _options: &ConnectOptions,
            _cancel: CancellationToken,
        ) -> Result<Box<dyn Session>> {
            Err(Error::ConnectionFailed {
                reason: "nothing attached".to_string(),
            })
        }
    }

    fn manager() -> LinkManager {
        LinkManager::new(Arc::new(EmptyTransport), LinkConfig::default()).unwrap()
    }

    #[test]
    fn test_ensure_available() {
        assert!(ensure_available(ConnectionState::Idle).is_ok());
        assert!(ensure_available(ConnectionState::Lost).is_ok());
        assert!(matches!(
            ensure_available(ConnectionState::Discovering),
            Err(Error::DiscoveryInProgress)
        ));
        assert!(matches!(
            ensure_available(ConnectionState::Pairing),
            Err(Error::ConnectionInProgress)
        ));
        assert!(matches!(
            ensure_available(ConnectionState::Connecting),
            Err(Error::ConnectionInProgress)
        ));
        assert!(matches!(
            ensure_available(ConnectionState::Connected),
            Err(Error::InvalidState {
                state: ConnectionState::Connected
            })
        ));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = LinkConfig::default().with_connect_timeout(Duration::ZERO);
        let result = LinkManager::new(Arc::new(EmptyTransport), config);
        assert!(matches!(result, Err(Error::InvalidParameter { .. })));
    }

    #[tokio::test]
    async fn test_discovery_returns_to_idle() {
        let manager = manager();
        let devices = manager.start_discovery().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(manager.devices(), devices);
    }

    #[tokio::test]
    async fn test_pairing_refused() {
        let manager = manager();
        let device = DeviceDescriptor::new("AA", None, false);

        let err = manager.connect(&device).await.unwrap_err();
        assert!(matches!(err, Error::PairingFailed { ref address, .. } if address == "AA"));
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let manager = manager();
        assert!(matches!(
            manager.send(b"ping").await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_is_noop() {
        let manager = manager();
        let seen = Arc::new(AtomicU64::new(0));
        let counter = seen.clone();
        let _handle = manager.on_connection_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.disconnect().await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_session_for_abandoned_attempt_is_closed() {
        let manager = manager();
        let shared = manager.shared.clone();
        let device = DeviceDescriptor::new("AA", None, true);

        let (stale, _cancel) = shared.begin_attempt(&mut shared.inner.lock());
        shared.finish_attempt(stale, ConnectionState::Idle);

        let mut session = MockSession::new();
        session.expect_take_data().never();
        session.expect_close().times(1).returning(|| Ok(()));

        let result = shared.install_link(stale, &device, Box::new(session)).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert!(manager.active_device().is_none());
    }

    #[tokio::test]
    async fn test_session_for_superseded_attempt_is_closed() {
        let manager = manager();
        let shared = manager.shared.clone();
        let device = DeviceDescriptor::new("AA", None, true);

        let (stale, _) = shared.begin_attempt(&mut shared.inner.lock());
        let (current, _) = shared.begin_attempt(&mut shared.inner.lock());

        let mut session = MockSession::new();
        session.expect_close().times(1).returning(|| Ok(()));

        let result = shared.install_link(stale, &device, Box::new(session)).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(Shared::is_current(&shared.inner.lock(), current));
        assert!(manager.active_device().is_none());
    }

    #[test]
    fn test_drop_cancels_background_work() {
        let manager = manager();
        let root = manager.shared.root.clone();
        drop(manager);
        assert!(root.is_cancelled());
    }
}
