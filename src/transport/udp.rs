use crate::Transport;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Mutex;
use std::time::Duration;

/// A connected UDP socket speaking raw datagrams.
///
/// Bound to the local client port and `connect`ed to the peer, so `send` and
/// `recv` only ever exchange traffic with the one remote endpoint.
pub struct UdpTransport {
    // Taken on close; I/O after close reports NotConnected.
    socket: Mutex<Option<UdpSocket>>,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind `local_port` on all interfaces and connect to `remote`.
    pub fn connect(local_port: u16, remote: SocketAddrV4) -> io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, local_port))?;
        socket.connect(remote)?;
        // Connecting picks the source address; the pseudo-header needs it.
        let local_addr = socket.local_addr()?;
        Ok(Self {
            socket: Mutex::new(Some(socket)),
            local_addr,
        })
    }

    /// The resolved local address after connecting.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Transport for UdpTransport {
    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let guard = self.socket.lock().unwrap();
        let socket = guard
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        socket.send(buf)
    }

    fn recv(&self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let guard = self.socket.lock().unwrap();
        let socket = guard
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        socket.set_read_timeout(Some(timeout))?;
        socket.recv(buf)
    }

    fn close(&self) -> io::Result<()> {
        self.socket.lock().unwrap().take();
        Ok(())
    }
}
