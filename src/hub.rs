//! Telemetry hub.
//!
//! Holds the latest decoded frame and the latest connection state, and fans
//! both out to every subscriber. Callback subscribers run synchronously on
//! the publishing task; async consumers can take a broadcast receiver
//! instead, where a lagging receiver skips ahead to newer values.

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::connection::ConnectionState;
use crate::data::{SensorFrame, TelemetrySample};
use crate::error::Error;
use crate::subscription::{CallbackHandle, Subscribers};

/// Counters kept by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HubStats {
    /// Frames published since creation.
    pub frames_published: u64,
    /// Records dropped by the parser since creation.
    pub decode_errors: u64,
}

/// Latest-value store with subscriber fan-out.
pub struct TelemetryHub {
    latest: RwLock<Option<TelemetrySample>>,
    state: RwLock<ConnectionState>,
    frame_subscribers: Subscribers<SensorFrame>,
    state_subscribers: Subscribers<ConnectionState>,
    frame_tx: broadcast::Sender<TelemetrySample>,
    state_tx: broadcast::Sender<ConnectionState>,
    /// Next state sequence number to hand out.
    next_sequence: AtomicU64,
    /// Sequence number of the last delivered state.
    delivered: Mutex<u64>,
    frames_published: AtomicU64,
    decode_errors: AtomicU64,
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new(64)
    }
}

impl TelemetryHub {
    /// Create a hub whose broadcast channels hold `capacity` values.
    pub fn new(capacity: usize) -> Self {
        let (frame_tx, _) = broadcast::channel(capacity.max(1));
        let (state_tx, _) = broadcast::channel(capacity.max(1));

        Self {
            latest: RwLock::new(None),
            state: RwLock::new(ConnectionState::Idle),
            frame_subscribers: Subscribers::new(),
            state_subscribers: Subscribers::new(),
            frame_tx,
            state_tx,
            next_sequence: AtomicU64::new(1),
            delivered: Mutex::new(0),
            frames_published: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
        }
    }

    // === Frames ===

    /// Store `frame` as the latest reading and hand it to every subscriber.
    pub fn publish_frame(&self, frame: SensorFrame) {
        let sample = TelemetrySample::now(frame);
        *self.latest.write() = Some(sample);
        self.frames_published.fetch_add(1, Ordering::Relaxed);

        trace!("Publishing frame: {:?}", frame);
        self.frame_subscribers.notify(&frame);
        let _ = self.frame_tx.send(sample);
    }

    /// The most recently published frame.
    pub fn latest_frame(&self) -> Option<SensorFrame> {
        self.latest.read().map(|sample| sample.frame)
    }

    /// The most recently published frame with its receive time.
    pub fn latest_sample(&self) -> Option<TelemetrySample> {
        *self.latest.read()
    }

    /// Register a callback for every published frame.
    pub fn subscribe_frame<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&SensorFrame) + Send + Sync + 'static,
    {
        self.frame_subscribers.subscribe(callback)
    }

    /// Subscribe to frames as a broadcast stream.
    pub fn frames(&self) -> broadcast::Receiver<TelemetrySample> {
        self.frame_tx.subscribe()
    }

    /// Count a record the parser dropped.
    pub fn record_decode_error(&self, error: &Error) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
        debug!("Dropped telemetry record: {}", error);
    }

    // === Connection state ===

    /// Store `state` as the latest connection state and notify subscribers.
    pub fn publish_connection(&self, state: ConnectionState) {
        let sequence = self.reserve_sequence();
        self.deliver_connection(sequence, state);
    }

    /// Reserve the ordering slot for a state change.
    ///
    /// Reserve while the transition is still serialized, deliver afterwards.
    pub(crate) fn reserve_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Deliver a state reserved with [`reserve_sequence`](Self::reserve_sequence).
    ///
    /// A state older than the last delivered one is discarded, so subscribers
    /// never observe states out of order. Subscribers must not publish from
    /// inside their callback.
    pub(crate) fn deliver_connection(&self, sequence: u64, state: ConnectionState) -> bool {
        let mut delivered = self.delivered.lock();
        if sequence <= *delivered {
            debug!(
                "Discarding stale connection state {} (#{} <= #{})",
                state, sequence, *delivered
            );
            return false;
        }
        *delivered = sequence;
        *self.state.write() = state;

        self.state_subscribers.notify(&state);
        let _ = self.state_tx.send(state);
        true
    }

    /// The most recently published connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Register a callback for every connection state change.
    pub fn subscribe_connection<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.state_subscribers.subscribe(callback)
    }

    /// Subscribe to connection states as a broadcast stream.
    pub fn connection_states(&self) -> broadcast::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Current counters.
    pub fn stats(&self) -> HubStats {
        HubStats {
            frames_published: self.frames_published.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for TelemetryHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryHub")
            .field("latest", &self.latest_sample())
            .field("state", &self.connection_state())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Tilt, Vector3};
    use std::sync::Arc;

    fn frame(temperature: f64) -> SensorFrame {
        SensorFrame::new(
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
            Tilt::new(0.0, 0.0),
            0.0,
            temperature,
        )
        .unwrap()
    }

    #[test]
    fn test_latest_frame_wins() {
        let hub = TelemetryHub::default();
        assert!(hub.latest_frame().is_none());

        hub.publish_frame(frame(20.0));
        hub.publish_frame(frame(21.0));

        assert_eq!(hub.latest_frame().unwrap().temperature(), 21.0);
        assert_eq!(hub.stats().frames_published, 2);
        assert!(hub.latest_sample().is_some());
    }

    #[test]
    fn test_each_subscriber_sees_every_frame() {
        let hub = TelemetryHub::default();
        let a = Arc::new(Mutex::new(Vec::new()));
        let b = Arc::new(Mutex::new(Vec::new()));

        let sink = a.clone();
        let _ha = hub.subscribe_frame(move |f| sink.lock().push(f.temperature()));
        let sink = b.clone();
        let _hb = hub.subscribe_frame(move |f| sink.lock().push(f.temperature()));

        for t in [1.0, 2.0, 3.0] {
            hub.publish_frame(frame(t));
        }

        assert_eq!(*a.lock(), vec![1.0, 2.0, 3.0]);
        assert_eq!(*b.lock(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_released_subscriber_stops_receiving() {
        let hub = TelemetryHub::default();
        let seen = Arc::new(AtomicU64::new(0));
        let counter = seen.clone();
        let handle = hub.subscribe_frame(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        hub.publish_frame(frame(1.0));
        handle.unregister();
        hub.publish_frame(frame(2.0));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_connection_states_in_order() {
        let hub = TelemetryHub::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _h = hub.subscribe_connection(move |s| sink.lock().push(*s));

        let connecting = hub.reserve_sequence();
        let connected = hub.reserve_sequence();

        assert!(hub.deliver_connection(connected, ConnectionState::Connected));
        assert!(!hub.deliver_connection(connecting, ConnectionState::Connecting));
        hub.publish_connection(ConnectionState::Lost);

        assert_eq!(
            *seen.lock(),
            vec![ConnectionState::Connected, ConnectionState::Lost]
        );
        assert_eq!(hub.connection_state(), ConnectionState::Lost);
    }

    #[tokio::test]
    async fn test_broadcast_receivers() {
        let hub = TelemetryHub::new(8);
        let mut frames = hub.frames();
        let mut states = hub.connection_states();

        hub.publish_frame(frame(5.0));
        hub.publish_connection(ConnectionState::Connected);

        assert_eq!(frames.recv().await.unwrap().frame.temperature(), 5.0);
        assert_eq!(states.recv().await.unwrap(), ConnectionState::Connected);
    }

    #[test]
    fn test_decode_errors_counted() {
        let hub = TelemetryHub::default();
        hub.record_decode_error(&Error::decode("bad"));
        hub.record_decode_error(&Error::decode("worse"));
        assert_eq!(hub.stats().decode_errors, 2);
    }
}
