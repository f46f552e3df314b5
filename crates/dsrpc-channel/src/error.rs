use dsrpc_frame::BufferId;

/// Errors that can occur in channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] dsrpc_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] dsrpc_frame::FrameError),

    /// A result named a call id that is not outstanding.
    #[error("no pending call with id {0}")]
    UnknownCall(u32),

    /// A buffer request carried an operation code outside add/update/remove.
    #[error("unknown buffer operation {0}")]
    UnknownBufferOperation(i32),

    /// A buffer update named a buffer the surface map does not hold.
    #[error("no buffer with id {0}")]
    MissingBuffer(BufferId),

    /// A message declared more side-channel descriptors than allowed.
    #[error("{count} side-channel descriptors declared (max {max})")]
    TooManyDescriptors { count: usize, max: usize },

    /// The buffer factory could not build a buffer.
    #[error("buffer factory failed: {0}")]
    BufferFactory(#[from] BufferError),

    /// The channel has lost its connection.
    #[error("channel disconnected")]
    Disconnected,

    /// Call identifiers for this connection are used up.
    #[error("call identifiers exhausted")]
    IdsExhausted,

    /// A synchronous call did not complete in time.
    #[error("call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A synchronous call completed with a failure.
    #[error("call failed: {0}")]
    CallFailed(CallFailure),
}

/// Why a call completed without a response.
///
/// Delivered to completion handlers; cloneable so one disconnect can fail
/// every outstanding call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallFailure {
    #[error("connection lost")]
    Disconnected,

    #[error("request could not be sent: {0}")]
    InvalidRequest(String),

    #[error("response could not be parsed: {0}")]
    InvalidResponse(String),

    #[error("side-channel descriptors could not be received: {0}")]
    SideChannel(String),

    #[error("caller stopped waiting")]
    Abandoned,
}

/// Failure reported by a [`BufferFactory`](crate::BufferFactory).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct BufferError(pub String);

pub type Result<T> = std::result::Result<T, ChannelError>;

impl ChannelError {
    /// Whether this error means the connection is gone.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ChannelError::Disconnected => true,
            ChannelError::Transport(err) => err.is_disconnect(),
            _ => false,
        }
    }

    /// Whether the read position may no longer sit on a frame boundary.
    pub fn desynchronises_stream(&self) -> bool {
        matches!(
            self,
            ChannelError::Transport(_) | ChannelError::TooManyDescriptors { .. }
        )
    }
}
