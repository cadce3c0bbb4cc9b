use cotrelay_core::error::ConfigError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while establishing or using the egress link.
///
/// Everything except [`TransportError::Config`] and
/// [`TransportError::TlsMaterial`] is transient and feeds the reconnect
/// loop.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to resolve {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS handshake with {addr} failed: {source}")]
    Handshake {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid TLS material: {0}")]
    TlsMaterial(String),

    #[error("Write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("Write failed: {0}")]
    Write(#[source] io::Error),

    #[error("Read failed: {0}")]
    Read(#[source] io::Error),

    #[error("Peer closed the connection")]
    PeerClosed,

    #[error(transparent)]
    Config(#[from] ConfigError),
}
