//! Client-side buffer collaborators.

use std::os::fd::OwnedFd;
use std::sync::Arc;

use dsrpc_frame::{Buffer, BufferId};

use crate::error::BufferError;

/// A buffer stream that accepts buffers pushed by the server.
pub trait BufferReceiver: Send + Sync {
    /// A buffer is ready for this stream. Ownership of any attached
    /// descriptors passes to the receiver.
    fn buffer_available(&self, buffer: Buffer);

    /// The stream will receive no more buffers (the connection is gone).
    fn buffer_unavailable(&self);
}

/// A buffer object owned by the client.
pub trait ClientBuffer: Send + Sync {
    fn id(&self) -> BufferId;

    /// The server has handed the buffer (back) to the client.
    fn received(&self);

    /// The server refreshed the buffer's native package.
    fn update(&self, package: BufferPackage);
}

/// Builds client buffers for server-added buffer ids.
pub trait BufferFactory: Send + Sync {
    /// Build a buffer from its description. Descriptors in `buffer` are
    /// closed if the factory fails.
    fn generate_buffer(&self, buffer: Buffer) -> Result<Arc<dyn ClientBuffer>, BufferError>;
}

/// Native buffer contents extracted from a [`Buffer`] message.
#[derive(Debug, Default)]
pub struct BufferPackage {
    pub fds: Vec<OwnedFd>,
    pub data: Vec<i32>,
    pub stride: i32,
    pub flags: u32,
    pub width: i32,
    pub height: i32,
}

impl From<Buffer> for BufferPackage {
    fn from(mut buffer: Buffer) -> Self {
        Self {
            fds: buffer.side_channel.take_fds(),
            data: buffer.data,
            stride: buffer.stride,
            flags: buffer.flags,
            width: buffer.width,
            height: buffer.height,
        }
    }
}
