use crate::error::TransportError;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// TCP keepalive interval
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Configure TCP socket options
fn configure_socket(stream: &TcpStream) -> std::io::Result<()> {
    // Events are small and latency matters more than packing
    stream.set_nodelay(true)?;

    let keepalive = socket2::TcpKeepalive::new().with_time(KEEPALIVE_INTERVAL);
    let socket = socket2::SockRef::from(stream);
    socket.set_tcp_keepalive(&keepalive)?;

    Ok(())
}

/// Opens a TCP connection, bounded by `connect_timeout`.
#[instrument(skip(connect_timeout))]
pub async fn connect(addr: &str, connect_timeout: Duration) -> Result<TcpStream, TransportError> {
    debug!("Connecting to {}", addr);

    let stream = timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::ConnectTimeout {
            addr: addr.to_string(),
            timeout: connect_timeout,
        })?
        .map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;

    if let Err(e) = configure_socket(&stream) {
        warn!(error = %e, "Failed to configure socket options");
    }

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (stream, accepted) = tokio::join!(
            connect(&addr, Duration::from_secs(1)),
            listener.accept()
        );

        let stream = stream.unwrap();
        assert!(stream.nodelay().unwrap());
        assert!(accepted.is_ok());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = connect(&addr, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
