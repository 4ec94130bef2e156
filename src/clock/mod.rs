pub mod mock;
mod system;

#[cfg(test)]
pub use self::mock::MockClock;

pub use self::system::SystemClock;

/// A trait for reading the current time.
///
/// The retransmission engine only ever asks what time it is, so tests can
/// substitute a manually advanced clock and exercise timeouts without
/// sleeping.
pub trait Clock: Send + Sync {
    /// Returns the current instant
    fn now(&self) -> std::time::Instant;
}
