//! The active device link.
//!
//! An [`ActiveLink`] owns one open [`Session`] and the two background tasks
//! that run against it: byte ingestion (parser into hub) and the liveness
//! poll. Both stop when the link's cancellation token fires.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::LinkConfig;
use crate::data::DeviceDescriptor;
use crate::error::{Error, Result};
use crate::hub::TelemetryHub;
use crate::protocol::{FrameParser, ParserOptions};
use crate::transport::Session;

/// Why a link ended without being asked to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkLoss {
    /// The liveness poll failed too many times in a row.
    LivenessFailed {
        /// Description of the last failed check.
        reason: String,
        /// Consecutive failures observed.
        failures: u32,
    },
    /// The session's data stream ended.
    StreamClosed,
}

impl LinkLoss {
    /// Convert to the error reported to consumers.
    pub fn to_error(&self) -> Error {
        match self {
            Self::LivenessFailed { reason, failures } => Error::LivenessCheckFailed {
                reason: format!("{reason} ({failures} consecutive)"),
            },
            Self::StreamClosed => Error::LivenessCheckFailed {
                reason: "data stream closed by device".to_string(),
            },
        }
    }
}

impl std::fmt::Display for LinkLoss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LivenessFailed { reason, failures } => {
                write!(f, "liveness failed {failures} time(s): {reason}")
            }
            Self::StreamClosed => write!(f, "data stream closed"),
        }
    }
}

/// Called with the link id when a link is lost.
pub(crate) type LossHandler = Arc<dyn Fn(u64, LinkLoss) + Send + Sync>;

/// One open session and its background tasks.
pub struct ActiveLink {
    id: u64,
    device: DeviceDescriptor,
    session: Arc<dyn Session>,
    cancel: CancellationToken,
    liveness: Mutex<Option<CancellationToken>>,
    hub: Arc<TelemetryHub>,
    config: LinkConfig,
    on_lost: LossHandler,
}

impl ActiveLink {
    pub(crate) fn new(
        id: u64,
        device: DeviceDescriptor,
        session: Arc<dyn Session>,
        hub: Arc<TelemetryHub>,
        config: LinkConfig,
        parent: &CancellationToken,
        on_lost: LossHandler,
    ) -> Self {
        Self {
            id,
            device,
            session,
            cancel: parent.child_token(),
            liveness: Mutex::new(None),
            hub,
            config,
            on_lost,
        }
    }

    /// Link id, unique per manager.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The connected device.
    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub(crate) fn session(&self) -> Arc<dyn Session> {
        self.session.clone()
    }

    /// Start ingestion and liveness polling.
    pub(crate) fn start(&self) {
        info!("Link {} to {} started", self.id, self.device);
        self.start_ingestion();
        self.start_liveness();
    }

    fn start_ingestion(&self) {
        let Some(mut data_rx) = self.session.take_data() else {
            warn!("Session for {} has no data stream", self.device);
            return;
        };

        let id = self.id;
        let cancel = self.cancel.clone();
        let hub = self.hub.clone();
        let on_lost = self.on_lost.clone();
        let mut parser = FrameParser::new(ParserOptions::from(&self.config));

        tokio::spawn(async move {
            debug!("Ingestion task for link {} started", id);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    chunk = data_rx.recv() => match chunk {
                        Some(chunk) => {
                            trace!("Link {} received {} bytes", id, chunk.len());
                            let output = parser.feed(&chunk);
                            for error in &output.errors {
                                hub.record_decode_error(error);
                            }
                            for frame in output.frames {
                                hub.publish_frame(frame);
                            }
                        }
                        None => {
                            if !cancel.is_cancelled() {
                                on_lost(id, LinkLoss::StreamClosed);
                            }
                            break;
                        }
                    }
                }
            }
            debug!("Ingestion task for link {} ended", id);
        });
    }

    /// Start the liveness poll, replacing any poll already running.
    pub(crate) fn start_liveness(&self) {
        let token = self.cancel.child_token();
        if let Some(previous) = self.liveness.lock().replace(token.clone()) {
            debug!("Replacing liveness poll for link {}", self.id);
            previous.cancel();
        }

        let id = self.id;
        let session = self.session.clone();
        let on_lost = self.on_lost.clone();
        let interval = self.config.liveness_interval;
        let threshold = self.config.liveness_failure_threshold.max(1);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut failures = 0u32;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let check = tokio::select! {
                    _ = token.cancelled() => break,
                    check = tokio::time::timeout(interval, session.is_connected()) => check,
                };

                match liveness_failure(check, interval) {
                    None => failures = 0,
                    Some(reason) => {
                        failures += 1;
                        warn!(
                            "Liveness check {}/{} failed for link {}: {}",
                            failures, threshold, id, reason
                        );
                        if failures >= threshold {
                            if !token.is_cancelled() {
                                on_lost(id, LinkLoss::LivenessFailed { reason, failures });
                            }
                            break;
                        }
                    }
                }
            }
            trace!("Liveness poll for link {} ended", id);
        });
    }

    /// Stop both background tasks.
    pub(crate) fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop the tasks and close the session.
    pub(crate) async fn close(&self) -> Result<()> {
        self.stop();
        self.session.close().await
    }
}

impl Drop for ActiveLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ActiveLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveLink")
            .field("id", &self.id)
            .field("device", &self.device)
            .field("stopped", &self.cancel.is_cancelled())
            .finish()
    }
}

fn liveness_failure(
    check: std::result::Result<Result<bool>, tokio::time::error::Elapsed>,
    interval: Duration,
) -> Option<String> {
    match check {
        Ok(Ok(true)) => None,
        Ok(Ok(false)) => Some("session reports disconnected".to_string()),
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some(format!("check did not settle within {interval:?}")),
    }
}
