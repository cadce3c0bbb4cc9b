//! Egress transport
//!
//! A single owner task holds the link and runs the connection state
//! machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected -> ...
//!        any state -> Draining -> Closed   (on shutdown)
//! ```
//!
//! Producers never touch the socket. They push into an [`EventBuffer`],
//! which the task drains strictly in order while connected. An event is
//! removed only after its write succeeded, so a failure keeps it (and
//! everything behind it) for the next connection. A write that failed
//! after partially reaching the peer is repeated then, so delivery across
//! a reconnect is at-least-once.

use crate::buffer::EventBuffer;
use crate::client::{calculate_backoff, ClientConfig, OverflowPolicy, SendOutcome};
use crate::error::TransportError;
use crate::link::{Connector, Link};
use crate::state::{ConnectionSnapshot, ConnectionState, ConnectionStatus};
use cotrelay_core::metrics::{DropStage, RelayMetrics};
use cotrelay_cot::{serialize_event, Event};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Handle to the egress link. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct EgressTransport {
    buffer: Arc<EventBuffer>,
    status: Arc<ConnectionStatus>,
    metrics: Arc<RelayMetrics>,
    overflow: OverflowPolicy,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EgressTransport {
    /// Validates the TLS material (if any) and spawns the owner task.
    ///
    /// Must be called inside a Tokio runtime. The first connection attempt
    /// starts immediately.
    pub fn start(config: ClientConfig, metrics: Arc<RelayMetrics>) -> Result<Self, TransportError> {
        let connector = Connector::new(&config.target, config.tls.as_ref())?;
        let buffer = Arc::new(EventBuffer::new(config.buffer_capacity));
        let status = Arc::new(ConnectionStatus::new(metrics.clone()));
        let cancel = CancellationToken::new();

        info!(
            target_url = %config.target,
            buffer_capacity = buffer.capacity(),
            "Starting egress transport"
        );

        let overflow = config.overflow;
        let task = EgressTask {
            config,
            connector,
            buffer: buffer.clone(),
            status: status.clone(),
            metrics: metrics.clone(),
            cancel: cancel.clone(),
            consecutive_failures: 0,
            draining: false,
        };

        Ok(Self {
            overflow,
            buffer,
            status,
            metrics,
            cancel,
            task: Mutex::new(Some(tokio::spawn(task.run()))),
        })
    }

    /// Queues an event for delivery.
    ///
    /// Never waits longer than the [`OverflowPolicy::Block`] timeout.
    pub async fn send(&self, event: Event) -> SendOutcome {
        let pushed = match self.overflow {
            OverflowPolicy::DropNewest => self.buffer.try_push(event),
            OverflowPolicy::Block { timeout } => self.buffer.push_timeout(event, timeout).await,
        };

        match pushed {
            Ok(()) => {
                self.metrics.set_buffered_events(self.buffer.len());
                SendOutcome::Queued
            }
            Err(event) => {
                let stage = if self.buffer.is_closed() {
                    DropStage::Shutdown
                } else {
                    DropStage::EgressBuffer
                };
                self.metrics.record_dropped(stage, 1);
                debug!(uid = %event.uid, stage = stage.as_str(), "Dropped CoT event");
                SendOutcome::Dropped
            }
        }
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.status.snapshot()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.state()
    }

    /// Receives every state change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionSnapshot> {
        self.status.subscribe()
    }

    /// Events waiting for the link.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drains within the shutdown grace period, closes the link and waits
    /// for the owner task. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Egress task ended abnormally");
            }
        }
    }
}

impl Drop for EgressTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// How a connected period ended.
enum Epoch {
    Lost(TransportError),
    Shutdown,
}

struct EgressTask {
    config: ClientConfig,
    connector: Connector,
    buffer: Arc<EventBuffer>,
    status: Arc<ConnectionStatus>,
    metrics: Arc<RelayMetrics>,
    cancel: CancellationToken,
    consecutive_failures: u32,
    draining: bool,
}

impl EgressTask {
    #[instrument(name = "egress", skip(self), fields(peer = %self.connector.target()))]
    async fn run(mut self) {
        loop {
            self.status.set_state(ConnectionState::Connecting);
            self.metrics.record_connection_attempt();

            let attempt = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                attempt = self.connector.connect(self.config.connect_timeout) => attempt,
            };

            let backoff = match attempt {
                Ok(mut link) => {
                    self.consecutive_failures = 0;
                    self.status.mark_connected();
                    info!("Connected to TAK server");

                    match self.run_connected(&mut link).await {
                        Epoch::Shutdown => {
                            self.drain(link).await;
                            return;
                        }
                        Epoch::Lost(e) => {
                            warn!(error = %e, "Connection lost");
                            link.shutdown(self.config.write_timeout).await;
                            // Floor backoff before the next attempt
                            calculate_backoff(0, &self.config.reconnect)
                        }
                    }
                }
                Err(e) => {
                    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                    let backoff =
                        calculate_backoff(self.consecutive_failures - 1, &self.config.reconnect);
                    warn!(
                        attempt = self.consecutive_failures,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Connection attempt failed, retrying after backoff"
                    );
                    backoff
                }
            };

            self.status
                .mark_disconnected(backoff, self.consecutive_failures);

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
        }

        self.close_without_link();
    }

    async fn run_connected(&mut self, link: &mut Link) -> Epoch {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Epoch::Shutdown,
                err = link.closed() => return Epoch::Lost(err),
                _ = self.buffer.wait_for_events() => {}
            }

            if let Err(e) = self.flush(link).await {
                return Epoch::Lost(e);
            }
        }
    }

    /// Writes buffered events in order until the buffer is empty. Outside
    /// of draining, stops early once shutdown is requested.
    async fn flush(&mut self, link: &mut Link) -> Result<(), TransportError> {
        while let Some(document) = self.buffer.peek_with(serialize_event) {
            if let Err(e) = link.write_frame(&document, self.config.write_timeout).await {
                self.metrics.record_send_failure();
                return Err(e);
            }

            self.buffer.pop_front();
            self.metrics.record_sent();
            self.metrics.set_buffered_events(self.buffer.len());

            if !self.draining && self.cancel.is_cancelled() {
                break;
            }
        }
        Ok(())
    }

    async fn drain(&mut self, mut link: Link) {
        self.draining = true;
        self.buffer.close();
        self.status.set_state(ConnectionState::Draining);

        let pending = self.buffer.len();
        if pending > 0 {
            info!(
                pending,
                grace_secs = self.config.shutdown_grace.as_secs_f64(),
                "Draining buffered events"
            );
            match timeout(self.config.shutdown_grace, self.flush(&mut link)).await {
                Ok(Ok(())) => debug!("Drain complete"),
                Ok(Err(e)) => warn!(error = %e, "Drain interrupted by write failure"),
                Err(_) => warn!("Shutdown grace period elapsed before drain completed"),
            }
        }

        link.shutdown(self.config.write_timeout).await;
        self.finish();
    }

    fn close_without_link(&mut self) {
        self.buffer.close();
        self.status.set_state(ConnectionState::Draining);
        self.finish();
    }

    fn finish(&mut self) {
        let dropped = self.buffer.clear();
        if dropped > 0 {
            warn!(dropped, "Discarding undelivered events");
            self.metrics.record_dropped(DropStage::Shutdown, dropped as u64);
        }
        self.metrics.set_buffered_events(0);
        self.status.set_state(ConnectionState::Closed);
        info!("Egress transport closed");
    }
}
