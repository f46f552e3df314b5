//! Client RPC channel for display-server connections.
//!
//! This is the layer applications talk to. It sends method calls, matches
//! results back to them, and routes the events and buffers the server pushes
//! alongside results:
//! - [`RpcChannel`]: call/response correlation, priority calls, disconnect handling
//! - [`ChannelSinks`]: where display, device, lifecycle, ping and global events go
//! - [`SurfaceMapOwner`] / [`SurfaceMapHandle`]: id lookup for surfaces,
//!   streams and buffers, without the channel owning them

pub mod buffer;
pub mod channel;
pub mod config;
pub mod connector;
mod dispatcher;
pub mod error;
pub mod pending;
pub mod sinks;
pub mod surface_map;

#[cfg(test)]
mod testing;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use buffer::{BufferFactory, BufferPackage, BufferReceiver, ClientBuffer};
pub use channel::RpcChannel;
pub use config::{ChannelConfig, DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_SIDE_CHANNEL_FDS};
pub use connector::{connect, connect_with_config};
pub use error::{BufferError, CallFailure, ChannelError, Result};
pub use pending::{CallOutcome, CompletionHandler, PendingCallRegistry};
pub use sinks::{
    ChannelSinks, DeviceData, DisplayConfigurationSink, EventSink, InputDeviceSink,
    LifecycleControl, LifecycleSink, NullSinks, PingHandler,
};
pub use surface_map::{
    SurfaceEventReceiver, SurfaceMap, SurfaceMapHandle, SurfaceMapOwner, SurfaceRegistry,
};

/// Lock a mutex, recovering the data if a panicking handler poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
