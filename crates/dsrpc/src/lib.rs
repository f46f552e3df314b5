//! Client RPC channel for display-server protocols.
//!
//! dsrpc carries method calls, their responses, server-pushed events and
//! file descriptors over a single Unix stream connection to a compositor.
//!
//! # Crate Structure
//!
//! - [`transport`]: stream transport with descriptor passing and readiness helpers
//! - [`frame`]: length-prefixed framing, wire bodies and message shapes
//! - [`channel`]: the client RPC channel (behind the default `channel` feature)

/// Re-export transport types.
pub mod transport {
    pub use dsrpc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use dsrpc_frame::*;
}

/// Re-export channel types (requires `channel` feature).
#[cfg(feature = "channel")]
pub mod channel {
    pub use dsrpc_channel::*;
}
