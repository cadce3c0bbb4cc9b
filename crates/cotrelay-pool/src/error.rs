use std::io;
use thiserror::Error;

/// Device tracker lookup failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Device not found: {0}")]
    NotFound(String),
}

/// Ingress listener failures
#[derive(Error, Debug)]
pub enum IngressError {
    #[error("Invalid listen address '{addr}'")]
    InvalidAddress { addr: String },

    #[error("Failed to bind UDP listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}
