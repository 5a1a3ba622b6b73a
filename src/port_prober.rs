use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

/// Finds TCP ports nobody listens on yet.
pub trait PortProber: Send + Sync {
    /// Returns a port that is currently free on `bind_address`.
    fn next_available_port(&self, bind_address: IpAddr) -> io::Result<u16>;
}

/// Asks the operating system for an ephemeral port.
///
/// The socket is bound to port 0, the kernel-assigned port is read back and
/// the socket is closed again before the port is handed out.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsPortProber;

impl PortProber for OsPortProber {
    fn next_available_port(&self, bind_address: IpAddr) -> io::Result<u16> {
        let socket = match bind_address {
            IpAddr::V4(_) => Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?,
            IpAddr::V6(_) => Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?,
        };
        socket.set_reuse_address(false)?;
        socket.bind(&SocketAddr::new(bind_address, 0).into())?;

        let port = socket
            .local_addr()?
            .as_socket()
            .map(|addr| addr.port())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "socket has no inet address"))?;
        debug!("Probed free port {} on {}", port, bind_address);
        Ok(port)
    }
}
