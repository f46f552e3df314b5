//! Duplex stream transport for display-server RPC.
//!
//! Provides the byte-stream layer that the channel sits on:
//! - exact reads and atomic sends over a Unix domain stream socket
//! - out-of-band file descriptor passing (`SCM_RIGHTS`)
//! - disconnect observers and reactor-style readiness (`poll`)
//!
//! This is the lowest layer of dsrpc. Everything else builds on top of
//! the [`StreamTransport`] trait provided here.

pub mod error;
pub mod reactor;
pub mod traits;

#[cfg(unix)]
mod scm;
#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use reactor::FdEvents;
#[cfg(unix)]
pub use reactor::poll_fd;
pub use traits::{StreamTransport, TransportObserver};

#[cfg(unix)]
pub use uds::{UnixDomainSocket, UnixStreamTransport};
