pub mod connection;
pub mod flags;
pub mod segment;
pub mod seq;
pub mod window;

pub use self::connection::{Connection, Route, Snapshot, State, TransferError, TransferStats};
pub use self::segment::{PseudoHeader, Segment, SegmentError};
pub use self::seq::{in_window, precedes, precedes_or_eq};
pub use self::window::UnackedWindow;

use std::time::Duration;

/// Largest payload carried by a single data segment.
pub const MAX_SEGMENT_PAYLOAD: usize = 1448;

/// Fixed retransmission timeout. No adaptive RTO and no backoff; a deliberate
/// simplification kept configurable so tests can exercise it deterministically.
pub const DEFAULT_RTO: Duration = Duration::from_millis(500);

/// How long a state handler blocks waiting for an ACK before it goes back to
/// scanning for retransmission candidates.
pub const ACK_WAIT: Duration = Duration::from_millis(100);

/// Maximum SYN (re)transmissions before the handshake is abandoned.
pub const HANDSHAKE_RETRIES: u8 = 5;

/// Receive window advertised to the peer.
pub const LOCAL_WINDOW: u16 = 65_535;
