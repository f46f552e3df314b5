//! Parameter and response shapes the channel needs to understand.
//!
//! The channel treats most messages as opaque, but a handful carry file
//! descriptors on the side channel. Those are modelled here as a closed set
//! of variants so that descriptors can be located without knowing anything
//! else about a message.

use std::fmt;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codec::{decode_body, encode_body};
use crate::error::{FrameError, Result};
use crate::event::DisplayConfiguration;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub i32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Server-assigned surface identifier.
    SurfaceId
);
id_type!(
    /// Server-assigned buffer stream identifier.
    BufferStreamId
);
id_type!(
    /// Server-assigned buffer identifier.
    BufferId
);

/// Descriptors that travel outside the message body.
///
/// Only `fds_on_side_channel` is serialized. On receipt the channel reads
/// that many descriptors from the transport and [`attach`](Self::attach)es
/// them, clearing the count.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SideChannel {
    pub fds_on_side_channel: u32,
    #[serde(skip)]
    pub fds: Vec<OwnedFd>,
}

impl SideChannel {
    /// A side channel carrying `fds` outbound.
    pub fn with_fds(fds: Vec<OwnedFd>) -> Self {
        Self {
            fds_on_side_channel: fds.len() as u32,
            fds,
        }
    }

    /// Number of descriptors still to be read from the transport.
    pub fn pending(&self) -> usize {
        self.fds_on_side_channel as usize
    }

    /// Attach received descriptors and mark the side channel as consumed.
    pub fn attach(&mut self, fds: Vec<OwnedFd>) {
        self.fds = fds;
        self.fds_on_side_channel = 0;
    }

    /// Take ownership of the attached descriptors.
    pub fn take_fds(&mut self) -> Vec<OwnedFd> {
        std::mem::take(&mut self.fds)
    }

    pub fn borrowed(&self) -> impl Iterator<Item = BorrowedFd<'_>> {
        self.fds.iter().map(AsFd::as_fd)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Buffer {
    pub buffer_id: BufferId,
    pub side_channel: SideChannel,
    pub data: Vec<i32>,
    pub stride: i32,
    pub flags: u32,
    pub width: i32,
    pub height: i32,
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BufferStream {
    pub id: Option<BufferStreamId>,
    pub pixel_format: i32,
    pub buffer_usage: i32,
    pub buffer: Option<Buffer>,
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Surface {
    pub id: Option<SurfaceId>,
    pub width: i32,
    pub height: i32,
    pub pixel_format: i32,
    pub buffer_usage: i32,
    pub side_channel: SideChannel,
    pub buffer_stream: Option<BufferStream>,
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Screencast {
    pub screencast_id: Option<u32>,
    pub buffer_stream: Option<BufferStream>,
    pub error: Option<String>,
}

/// Graphics platform details sent at connect time.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Platform {
    pub data: Vec<i32>,
    pub side_channel: SideChannel,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Connection {
    pub platform: Option<Platform>,
    pub display_configuration: Option<DisplayConfiguration>,
    pub error: Option<String>,
}

/// A single descriptor handed over by the server (e.g. a new client socket).
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SocketFd {
    pub side_channel: SideChannel,
}

/// Platform-specific request or reply; may carry descriptors either way.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PlatformOperationMessage {
    pub opcode: u32,
    pub data: Vec<u8>,
    pub side_channel: SideChannel,
}

/// Buffer exchange. Sent by clients to submit a buffer and pushed by the
/// server inside event sequences.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BufferRequest {
    /// Target stream, when the buffer is ready for a specific stream.
    pub id: Option<BufferStreamId>,
    pub buffer: Buffer,
    /// Raw [`BufferOperation`](crate::BufferOperation) code.
    pub operation: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectParameters {
    pub application_name: String,
}

/// Every message shape the channel distinguishes.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Message {
    /// No payload.
    #[default]
    Void,
    /// Bytes the channel does not interpret.
    Opaque(Vec<u8>),
    ConnectParameters(ConnectParameters),
    Connection(Connection),
    Surface(Surface),
    BufferStream(BufferStream),
    Buffer(Buffer),
    BufferRequest(BufferRequest),
    Screencast(Screencast),
    Platform(Platform),
    SocketFd(SocketFd),
    PlatformOperation(PlatformOperationMessage),
}

/// Names a [`Message`] variant; used to say how a response should be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Void,
    Opaque,
    ConnectParameters,
    Connection,
    Surface,
    BufferStream,
    Buffer,
    BufferRequest,
    Screencast,
    Platform,
    SocketFd,
    PlatformOperation,
}

impl MessageKind {
    pub const ALL: [MessageKind; 12] = [
        MessageKind::Void,
        MessageKind::Opaque,
        MessageKind::ConnectParameters,
        MessageKind::Connection,
        MessageKind::Surface,
        MessageKind::BufferStream,
        MessageKind::Buffer,
        MessageKind::BufferRequest,
        MessageKind::Screencast,
        MessageKind::Platform,
        MessageKind::SocketFd,
        MessageKind::PlatformOperation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Void => "void",
            MessageKind::Opaque => "opaque",
            MessageKind::ConnectParameters => "connect_parameters",
            MessageKind::Connection => "connection",
            MessageKind::Surface => "surface",
            MessageKind::BufferStream => "buffer_stream",
            MessageKind::Buffer => "buffer",
            MessageKind::BufferRequest => "buffer_request",
            MessageKind::Screencast => "screencast",
            MessageKind::Platform => "platform",
            MessageKind::SocketFd => "socket_fd",
            MessageKind::PlatformOperation => "platform_operation",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MessageKind {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().replace('-', "_").to_ascii_lowercase();
        MessageKind::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| FrameError::UnknownKind(s.to_string()))
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Void => MessageKind::Void,
            Message::Opaque(_) => MessageKind::Opaque,
            Message::ConnectParameters(_) => MessageKind::ConnectParameters,
            Message::Connection(_) => MessageKind::Connection,
            Message::Surface(_) => MessageKind::Surface,
            Message::BufferStream(_) => MessageKind::BufferStream,
            Message::Buffer(_) => MessageKind::Buffer,
            Message::BufferRequest(_) => MessageKind::BufferRequest,
            Message::Screencast(_) => MessageKind::Screencast,
            Message::Platform(_) => MessageKind::Platform,
            Message::SocketFd(_) => MessageKind::SocketFd,
            Message::PlatformOperation(_) => MessageKind::PlatformOperation,
        }
    }

    /// Serialize the message body (without its kind).
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Message::Void => Ok(Vec::new()),
            Message::Opaque(bytes) => Ok(bytes.clone()),
            Message::ConnectParameters(m) => encode_body(m),
            Message::Connection(m) => encode_body(m),
            Message::Surface(m) => encode_body(m),
            Message::BufferStream(m) => encode_body(m),
            Message::Buffer(m) => encode_body(m),
            Message::BufferRequest(m) => encode_body(m),
            Message::Screencast(m) => encode_body(m),
            Message::Platform(m) => encode_body(m),
            Message::SocketFd(m) => encode_body(m),
            Message::PlatformOperation(m) => encode_body(m),
        }
    }

    /// Parse `bytes` as a message of `kind`. Empty bytes yield an empty message.
    pub fn decode(kind: MessageKind, bytes: &[u8]) -> Result<Message> {
        Ok(match kind {
            MessageKind::Void => Message::Void,
            MessageKind::Opaque => Message::Opaque(bytes.to_vec()),
            MessageKind::ConnectParameters => Message::ConnectParameters(decode_body(bytes)?),
            MessageKind::Connection => Message::Connection(decode_body(bytes)?),
            MessageKind::Surface => Message::Surface(decode_body(bytes)?),
            MessageKind::BufferStream => Message::BufferStream(decode_body(bytes)?),
            MessageKind::Buffer => Message::Buffer(decode_body(bytes)?),
            MessageKind::BufferRequest => Message::BufferRequest(decode_body(bytes)?),
            MessageKind::Screencast => Message::Screencast(decode_body(bytes)?),
            MessageKind::Platform => Message::Platform(decode_body(bytes)?),
            MessageKind::SocketFd => Message::SocketFd(decode_body(bytes)?),
            MessageKind::PlatformOperation => Message::PlatformOperation(decode_body(bytes)?),
        })
    }

    /// Side channels of a received message, in the order their descriptors
    /// arrive on the transport.
    pub fn side_channels_mut(&mut self) -> Vec<&mut SideChannel> {
        fn stream_buffer(stream: Option<&mut BufferStream>) -> Option<&mut SideChannel> {
            stream?.buffer.as_mut().map(|buffer| &mut buffer.side_channel)
        }

        match self {
            Message::Surface(surface) => {
                let mut channels = vec![&mut surface.side_channel];
                channels.extend(stream_buffer(surface.buffer_stream.as_mut()));
                channels
            }
            Message::Buffer(buffer) => vec![&mut buffer.side_channel],
            Message::BufferStream(stream) => stream_buffer(Some(stream)).into_iter().collect(),
            Message::Screencast(screencast) => stream_buffer(screencast.buffer_stream.as_mut())
                .into_iter()
                .collect(),
            Message::Platform(platform) => vec![&mut platform.side_channel],
            Message::Connection(connection) => connection
                .platform
                .as_mut()
                .map(|platform| &mut platform.side_channel)
                .into_iter()
                .collect(),
            Message::SocketFd(socket) => vec![&mut socket.side_channel],
            Message::PlatformOperation(op) => vec![&mut op.side_channel],
            Message::Void
            | Message::Opaque(_)
            | Message::ConnectParameters(_)
            | Message::BufferRequest(_) => Vec::new(),
        }
    }

    /// Total descriptors held by this message (received or about to be sent).
    pub fn fd_count(&self) -> usize {
        match self {
            Message::BufferRequest(request) => request.buffer.side_channel.fds.len(),
            Message::Surface(surface) => {
                surface.side_channel.fds.len()
                    + surface
                        .buffer_stream
                        .as_ref()
                        .and_then(|stream| stream.buffer.as_ref())
                        .map_or(0, |buffer| buffer.side_channel.fds.len())
            }
            Message::Buffer(buffer) => buffer.side_channel.fds.len(),
            Message::BufferStream(stream) => stream
                .buffer
                .as_ref()
                .map_or(0, |buffer| buffer.side_channel.fds.len()),
            Message::Screencast(screencast) => screencast
                .buffer_stream
                .as_ref()
                .and_then(|stream| stream.buffer.as_ref())
                .map_or(0, |buffer| buffer.side_channel.fds.len()),
            Message::Platform(platform) => platform.side_channel.fds.len(),
            Message::Connection(connection) => connection
                .platform
                .as_ref()
                .map_or(0, |platform| platform.side_channel.fds.len()),
            Message::SocketFd(socket) => socket.side_channel.fds.len(),
            Message::PlatformOperation(op) => op.side_channel.fds.len(),
            Message::Void | Message::Opaque(_) | Message::ConnectParameters(_) => 0,
        }
    }

    /// Descriptors to send with this message when it is used as call
    /// parameters. Only buffer submissions and platform operations carry any.
    pub fn outgoing_fds(&self) -> Vec<BorrowedFd<'_>> {
        match self {
            Message::BufferRequest(request) => request.buffer.side_channel.borrowed().collect(),
            Message::PlatformOperation(op) => op.side_channel.borrowed().collect(),
            _ => Vec::new(),
        }
    }
}
