use std::os::fd::{BorrowedFd, OwnedFd};
use std::sync::Weak;

use crate::error::Result;
use crate::reactor::FdEvents;

/// Receives notifications from a transport.
///
/// Transports hold observers weakly: the owner of the transport is usually
/// also the observer, so a strong reference would form a cycle.
pub trait TransportObserver: Send + Sync {
    /// The transport has data ready to be read.
    fn on_data_available(&self);

    /// The transport lost its connection. May be called more than once.
    fn on_disconnected(&self);
}

/// A duplex byte stream that can also carry file descriptors.
///
/// Reads and sends take `&self`: callers serialize reads against reads and
/// sends against sends, but a read and a send may run concurrently.
pub trait StreamTransport: Send + Sync {
    /// Register an observer for readiness and disconnection.
    fn register_observer(&self, observer: Weak<dyn TransportObserver>);

    /// Read exactly `buf.len()` bytes (blocking).
    ///
    /// A stream that delivers the bytes in several fragments is read until
    /// the buffer is full. Reaching end-of-stream notifies observers of the
    /// disconnection and returns [`TransportError::Disconnected`].
    ///
    /// [`TransportError::Disconnected`]: crate::TransportError::Disconnected
    fn receive_data(&self, buf: &mut [u8]) -> Result<()>;

    /// Read exactly `buf.len()` bytes together with exactly `fd_count`
    /// file descriptors.
    ///
    /// `buf` must be at least one byte long: descriptors always travel with
    /// ordinary payload.
    fn receive_data_with_fds(&self, buf: &mut [u8], fd_count: usize) -> Result<Vec<OwnedFd>>;

    /// Send `buf` and `fds` as one message. Descriptors stay owned by the caller.
    fn send_message(&self, buf: &[u8], fds: &[BorrowedFd<'_>]) -> Result<()>;

    /// The descriptor a reactor should watch.
    fn watch_fd(&self) -> BorrowedFd<'_>;

    /// The readiness events this transport cares about.
    fn relevant_events(&self) -> FdEvents {
        FdEvents::READABLE
    }

    /// React to readiness reported by the reactor.
    ///
    /// Returns `false` once the transport is no longer usable.
    fn dispatch(&self, events: FdEvents) -> bool;
}
