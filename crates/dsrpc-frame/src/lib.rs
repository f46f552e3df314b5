//! Framing and wire types for display-server RPC.
//!
//! Every frame on the connection is:
//! - A 2-byte big-endian body length
//! - A body: an [`Invocation`] (client to server) or an [`RpcResult`]
//!   (server to client)
//!
//! Bodies are serialized with `bincode`. File descriptors never appear in a
//! body; messages only declare how many travel on the side channel.

pub mod codec;
pub mod error;
pub mod event;
pub mod message;
pub mod reader;
pub mod wire;

#[cfg(feature = "async")]
pub mod async_codec;

pub use codec::{
    decode_body, decode_frame, decode_header, encode_body, encode_frame, encode_message,
    FrameConfig, HEADER_SIZE, MAX_BODY_SIZE,
};
pub use error::{FrameError, Result};
pub use event::{
    BufferOperation, DisplayConfiguration, DisplayMode, DisplayOutput, Event, EventSequence,
    InputDeviceInfo, LifecycleEvent, LifecycleState, PingEvent, RawEvent,
};
pub use message::{
    Buffer, BufferId, BufferRequest, BufferStream, BufferStreamId, ConnectParameters, Connection,
    Message, MessageKind, Platform, PlatformOperationMessage, Screencast, SideChannel, SocketFd,
    Surface, SurfaceId,
};
pub use reader::FrameReader;
pub use wire::{Invocation, RpcResult};

#[cfg(feature = "async")]
pub use async_codec::RpcFrameCodec;
