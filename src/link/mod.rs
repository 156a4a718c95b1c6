//! # Transport Listener
//!
//! Owns the MAVLink connection and pumps it onto the telemetry bus.
//!
//! This module handles:
//! - Opening the link from configuration (serial device or network endpoint)
//! - Running the blocking receive loop on a dedicated worker
//! - Publishing each decoded message under its type tag
//! - Exposing the one-way send handle used by all outbound commands
//! - Cooperative shutdown

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mavlink::Message;
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use crate::bus::{RoutedMessage, TelemetryBus};
use crate::config::LinkConfig;

mod link_trait;

pub use link_trait::{Link, LinkError, MavlinkLink};

#[cfg(test)]
pub use link_trait::mocks;

/// How long `stop` waits for the receive loop to observe the stop flag
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause after a receive error so a dead link cannot spin the worker
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Listener states: stopped until `start`, running until `stop`
///
/// Owns the link and the receive worker. All consumers get messages through
/// the bus; producers of outbound traffic share the [`Link`] handle returned
/// by [`start`](TransportListener::start).
pub struct TransportListener {
    config: LinkConfig,
    bus: Arc<TelemetryBus>,
    link: Option<Arc<dyn Link>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl TransportListener {
    /// Create a listener that will open the link described by `config`
    pub fn new(config: LinkConfig, bus: Arc<TelemetryBus>) -> Self {
        Self {
            config,
            bus,
            link: None,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Create a listener over an already-open link (tests, replays)
    pub fn with_link(link: Arc<dyn Link>, bus: Arc<TelemetryBus>) -> Self {
        Self {
            config: LinkConfig::default(),
            bus,
            link: Some(link),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Open the link if necessary and spawn the receive loop
    ///
    /// Idempotent: a second call on a running listener just returns the send
    /// handle. On connect failure the listener stays stopped.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Connect`] if the link cannot be opened.
    pub fn start(&mut self) -> Result<Arc<dyn Link>, LinkError> {
        let link = match &self.link {
            Some(link) => Arc::clone(link),
            None => {
                let address = self.config.address();
                let link: Arc<dyn Link> = Arc::new(MavlinkLink::connect(
                    &address,
                    self.config.system_id,
                    self.config.component_id,
                )?);
                info!("MAVLink link opened at {address}");
                self.link = Some(Arc::clone(&link));
                link
            }
        };

        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(link);
        }

        let worker_link = Arc::clone(&link);
        let bus = Arc::clone(&self.bus);
        let running = Arc::clone(&self.running);
        self.worker = Some(tokio::task::spawn_blocking(move || {
            receive_loop(worker_link, bus, running);
        }));

        info!("transport listener started");
        Ok(link)
    }

    /// Send handle, available once the link is open
    pub fn link(&self) -> Option<Arc<dyn Link>> {
        self.link.as_ref().map(Arc::clone)
    }

    /// Whether the receive loop is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the receive loop and wait for it to exit
    ///
    /// The loop checks the stop flag before every receive, so it exits on the
    /// next inbound frame or receive error. The codec exposes no close hook,
    /// so on a completely silent link the join is bounded and the worker is
    /// left to finish with the process.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if tokio::time::timeout(STOP_JOIN_TIMEOUT, worker).await.is_err() {
                warn!("receive loop still parked on an idle link; detaching");
            }
        }
        info!("transport listener stopped");
    }
}

/// Blocking receive loop: decode, tag, publish, repeat
///
/// A single bad frame or transient I/O error never abandons the loop; it is
/// logged and the next receive is attempted.
fn receive_loop(link: Arc<dyn Link>, bus: Arc<TelemetryBus>, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        match link.recv() {
            Ok((header, message)) => {
                let tag = message.message_name();
                trace!("received {tag} from system {}", header.system_id);
                bus.publish(tag, &RoutedMessage { header, message });
            }
            Err(e) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                warn!("receive error: {e}");
                std::thread::sleep(RECV_ERROR_BACKOFF);
            }
        }
    }
    info!("receive loop exited");
}
