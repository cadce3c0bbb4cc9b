//! An established egress link and the connector that produces it

use crate::error::TransportError;
use crate::tls::TlsSettings;
use crate::{tcp, udp};
use bytes::{BufMut, BytesMut};
use cotrelay_core::error::ConfigError;
use cotrelay_core::types::{EgressTarget, Protocol, TlsConfig};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::trace;

/// Frame delimiter for stream links
const NEWLINE_DELIMITER: u8 = b'\n';

const TLS_SECTION_REQUIRED: &str = "tls:// target requires a tls section";

pub(crate) trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub(crate) type BoxedStream = Box<dyn AsyncStream>;

/// Live connection owned by the egress task.
pub(crate) enum Link {
    /// TCP or TLS; the read half only watches for the peer going away
    Stream {
        reader: ReadHalf<BoxedStream>,
        writer: WriteHalf<BoxedStream>,
    },
    Datagram(UdpSocket),
}

impl Link {
    fn stream<S: AsyncRead + AsyncWrite + Unpin + Send + 'static>(stream: S) -> Self {
        let boxed: BoxedStream = Box::new(stream);
        let (reader, writer) = tokio::io::split(boxed);
        Link::Stream { reader, writer }
    }

    /// Writes one document: newline-terminated on streams, one datagram
    /// on UDP.
    pub(crate) async fn write_frame(
        &mut self,
        document: &str,
        write_timeout: Duration,
    ) -> Result<(), TransportError> {
        match self {
            Link::Stream { writer, .. } => {
                let mut frame = BytesMut::with_capacity(document.len() + 1);
                frame.extend_from_slice(document.as_bytes());
                frame.put_u8(NEWLINE_DELIMITER);

                timeout(write_timeout, async {
                    writer.write_all(&frame).await?;
                    writer.flush().await
                })
                .await
                .map_err(|_| TransportError::WriteTimeout(write_timeout))?
                .map_err(TransportError::Write)
            }
            Link::Datagram(socket) => {
                timeout(write_timeout, socket.send(document.as_bytes()))
                    .await
                    .map_err(|_| TransportError::WriteTimeout(write_timeout))?
                    .map_err(TransportError::Write)?;
                Ok(())
            }
        }
    }

    /// Resolves when the peer closes the stream or reading fails. Inbound
    /// data is discarded. Never resolves for datagram links.
    ///
    /// Cancel safe.
    pub(crate) async fn closed(&mut self) -> TransportError {
        match self {
            Link::Stream { reader, .. } => {
                let mut buf = [0u8; 1024];
                loop {
                    match reader.read(&mut buf).await {
                        Ok(0) => return TransportError::PeerClosed,
                        Ok(n) => trace!(bytes = n, "Discarding inbound data"),
                        Err(e) => return TransportError::Read(e),
                    }
                }
            }
            Link::Datagram(_) => std::future::pending().await,
        }
    }

    /// Closes the write side, bounded by `grace`.
    pub(crate) async fn shutdown(self, grace: Duration) {
        if let Link::Stream { mut writer, .. } = self {
            let _ = timeout(grace, writer.shutdown()).await;
        }
    }
}

/// Knows how to open a [`Link`] to the configured target.
#[derive(Debug, Clone)]
pub(crate) struct Connector {
    target: EgressTarget,
    address: String,
    tls: Option<TlsSettings>,
}

impl Connector {
    pub(crate) fn new(target: &EgressTarget, tls: Option<&TlsConfig>) -> Result<Self, TransportError> {
        let tls = match target.protocol {
            Protocol::Tls => {
                let config = tls.ok_or_else(|| ConfigError::missing_tls(TLS_SECTION_REQUIRED))?;
                Some(TlsSettings::from_config(config, &target.host)?)
            }
            Protocol::Tcp | Protocol::Udp => None,
        };

        Ok(Self {
            target: target.clone(),
            address: target.address(),
            tls,
        })
    }

    pub(crate) fn target(&self) -> &EgressTarget {
        &self.target
    }

    pub(crate) async fn connect(&self, connect_timeout: Duration) -> Result<Link, TransportError> {
        match (&self.target.protocol, &self.tls) {
            (Protocol::Tls, Some(tls)) => {
                let stream = tls.connect(&self.address, connect_timeout).await?;
                Ok(Link::stream(stream))
            }
            (Protocol::Tls, None) => Err(ConfigError::missing_tls(TLS_SECTION_REQUIRED).into()),
            (Protocol::Udp, _) => {
                let socket = udp::connect(&self.address, connect_timeout).await?;
                Ok(Link::Datagram(socket))
            }
            (Protocol::Tcp, _) => {
                let stream = tcp::connect(&self.address, connect_timeout).await?;
                Ok(Link::stream(stream))
            }
        }
    }
}
