use crate::error::TransportError;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, instrument};

/// Resolves `addr` and returns a socket connected to it.
///
/// UDP has no handshake, so "connecting" only binds an ephemeral local
/// port of the matching family and fixes the peer address.
#[instrument(skip(connect_timeout))]
pub async fn connect(addr: &str, connect_timeout: Duration) -> Result<UdpSocket, TransportError> {
    let remote_addr = timeout(connect_timeout, resolve(addr))
        .await
        .map_err(|_| TransportError::ConnectTimeout {
            addr: addr.to_string(),
            timeout: connect_timeout,
        })??;

    let local_addr = match remote_addr {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    };

    let connect_err = |source| TransportError::Connect {
        addr: addr.to_string(),
        source,
    };

    let socket = bind(local_addr).map_err(connect_err)?;
    socket.connect(remote_addr).await.map_err(connect_err)?;

    debug!("UDP socket bound to {} (remote: {})", local_addr, remote_addr);
    Ok(socket)
}

async fn resolve(addr: &str) -> Result<SocketAddr, TransportError> {
    let resolve_err = |source| TransportError::Resolve {
        addr: addr.to_string(),
        source,
    };

    lookup_host(addr).await.map_err(resolve_err)?.next().ok_or_else(|| {
        resolve_err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no addresses returned",
        ))
    })
}

fn bind(local_addr: SocketAddr) -> std::io::Result<UdpSocket> {
    // Create socket with socket2 so it can be made non-blocking before tokio owns it
    let socket2 = socket2::Socket::new(
        if local_addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        },
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;

    socket2.set_nonblocking(true)?;
    socket2.bind(&local_addr.into())?;

    UdpSocket::from_std(socket2.into())
}
