pub mod clock;
pub mod tcp;
pub mod transport;

#[cfg(test)]
mod test;

pub use clock::{Clock, SystemClock};
pub use tcp::{Connection, Route, TransferError};
pub use transport::{Transport, UdpTransport};
