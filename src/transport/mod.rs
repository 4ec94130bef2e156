mod udp;

// Import and re-export
pub use self::udp::UdpTransport;

#[cfg(test)]
pub use self::mock::MockTransport;

use std::io;
use std::time::Duration;

/// A trait for datagram I/O against the remote peer.
///
/// The connection never opens sockets itself; it is handed something that can
/// push a datagram toward the peer and pull the next one back. Timeouts are
/// reported as `io::ErrorKind::WouldBlock` or `TimedOut` so the caller can
/// treat "nothing arrived" differently from a hard failure.
pub trait Transport: Send {
    /// Send one datagram to the peer
    fn send(&self, buf: &[u8]) -> io::Result<usize>;

    /// Receive one datagram from the peer, waiting at most `timeout`
    fn recv(&self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Release the underlying resource. Further I/O fails.
    fn close(&self) -> io::Result<()>;
}

/// Is this `recv` failure just "nothing arrived in time"?
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
