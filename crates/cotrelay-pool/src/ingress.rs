//! Ingress Listener
//!
//! One task receives datagrams and `try_send`s them into a bounded queue;
//! a fixed pool of workers runs the pipeline on each. A full queue drops
//! the new datagram rather than stalling the socket.

use chrono::{DateTime, Utc};
use cotrelay_core::config::RelayConfig;
use cotrelay_core::metrics::DropStage;
use flume::TrySendError;
use futures::future::join_all;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::IngressError;
use crate::pipeline::RelayPipeline;

/// Ingress settings
#[derive(Debug, Clone)]
pub struct IngressConfig {
    /// `host:port` to bind
    pub bind_address: String,
    /// Largest datagram accepted; longer ones are truncated
    pub max_datagram_size: usize,
    /// SO_RCVBUF request, 0 keeps the OS default
    pub recv_buffer_bytes: usize,
    /// Bounded queue between the socket and the workers
    pub queue_capacity: usize,
    /// Number of pipeline workers
    pub worker_count: usize,
    /// Time workers get to finish the backlog on shutdown
    pub shutdown_grace: Duration,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self::from_relay_config(&RelayConfig::default())
    }
}

impl IngressConfig {
    pub fn from_relay_config(config: &RelayConfig) -> Self {
        Self {
            bind_address: config.listener.bind_address(),
            max_datagram_size: config.listener.max_datagram_size,
            recv_buffer_bytes: config.listener.recv_buffer_bytes,
            queue_capacity: config.performance.queue_capacity,
            worker_count: config.performance.max_concurrent_messages,
            shutdown_grace: config.performance.shutdown_grace(),
        }
    }
}

/// A received datagram waiting for a worker
#[derive(Debug, Clone)]
pub struct InboundDatagram {
    pub data: Vec<u8>,
    pub source: SocketAddr,
    pub received_at: DateTime<Utc>,
}

/// Bound UDP listener, ready to run.
#[derive(Debug)]
pub struct IngressListener {
    socket: UdpSocket,
    local_addr: SocketAddr,
    config: IngressConfig,
}

impl IngressListener {
    /// Binds the socket. Fails if the address is unusable or taken.
    pub fn bind(config: IngressConfig) -> Result<Self, IngressError> {
        let addr = config
            .bind_address
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| IngressError::InvalidAddress {
                addr: config.bind_address.clone(),
            })?;

        let bind_err = |source| IngressError::Bind {
            addr: addr.to_string(),
            source,
        };

        let socket = bind_socket(addr, config.recv_buffer_bytes).map_err(bind_err)?;
        let local_addr = socket.local_addr().map_err(bind_err)?;

        info!(address = %local_addr, "UDP listener bound");

        Ok(Self {
            socket,
            local_addr,
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receives until `cancel` fires, then lets the workers finish the
    /// queued backlog within the shutdown grace period. Workers still busy
    /// after that are aborted.
    pub async fn run(self, pipeline: Arc<RelayPipeline>, cancel: CancellationToken) {
        let (tx, rx) = flume::bounded::<InboundDatagram>(self.config.queue_capacity.max(1));
        let metrics = Arc::clone(pipeline.metrics());

        let mut workers: Vec<JoinHandle<()>> = (0..self.config.worker_count.max(1))
            .map(|worker_id| spawn_worker(worker_id, rx.clone(), Arc::clone(&pipeline)))
            .collect();

        info!(
            workers = workers.len(),
            queue_capacity = self.config.queue_capacity,
            "Ingress listener started"
        );

        let mut buf = vec![0u8; self.config.max_datagram_size];
        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, source)) => {
                    metrics.record_received();
                    let datagram = InboundDatagram {
                        data: buf[..len].to_vec(),
                        source,
                        received_at: Utc::now(),
                    };

                    match tx.try_send(datagram) {
                        Ok(()) => {}
                        Err(TrySendError::Full(datagram)) => {
                            metrics.record_dropped(DropStage::Ingress, 1);
                            debug!(source = %datagram.source, "Ingress queue full, dropping datagram");
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            warn!("All ingress workers exited");
                            break;
                        }
                    }
                }
                Err(e) => {
                    // ICMP errors surface here on some platforms; keep receiving
                    warn!(error = %e, "UDP receive error");
                }
            }
        }

        // Stop accepting; workers exit once the backlog is empty
        drop(tx);
        drop(self.socket);

        let backlog = rx.len();
        drop(rx);
        info!(backlog, "Ingress listener stopped, waiting for workers");

        let finished = tokio::time::timeout(
            self.config.shutdown_grace,
            join_all(workers.iter_mut()),
        )
        .await;

        if finished.is_err() {
            warn!(
                grace_secs = self.config.shutdown_grace.as_secs_f64(),
                "Workers did not finish within the grace period, aborting"
            );
            for worker in &workers {
                worker.abort();
            }
        }

        info!("Ingress workers stopped");
    }
}

fn spawn_worker(
    worker_id: usize,
    rx: flume::Receiver<InboundDatagram>,
    pipeline: Arc<RelayPipeline>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(worker_id, "Ingress worker started");

        while let Ok(datagram) = rx.recv_async().await {
            pipeline
                .process_at(&datagram.data, datagram.source, datagram.received_at)
                .await;
        }

        debug!(worker_id, "Ingress worker stopped");
    })
}

fn bind_socket(addr: SocketAddr, recv_buffer_bytes: usize) -> std::io::Result<UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;

    socket.set_reuse_address(true)?;
    if recv_buffer_bytes > 0 {
        // Best effort; the kernel may clamp it
        if let Err(e) = socket.set_recv_buffer_size(recv_buffer_bytes) {
            warn!(error = %e, "Failed to set UDP receive buffer size");
        }
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    UdpSocket::from_std(socket.into())
}
