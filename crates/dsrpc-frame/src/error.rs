/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The body exceeds what the 16-bit length prefix (or the configured
    /// maximum) can describe.
    #[error("body too large ({size} bytes, max {max})")]
    BodyTooLarge { size: usize, max: usize },

    /// A body could not be serialized.
    #[error("failed to encode body: {0}")]
    Encode(#[source] bincode::Error),

    /// A body could not be parsed as the expected type.
    #[error("failed to decode body: {0}")]
    Decode(#[source] bincode::Error),

    /// A numeric field carried a value outside its enumeration.
    #[error("unknown {field} value {value}")]
    UnknownValue { field: &'static str, value: i32 },

    /// An unrecognised message kind name.
    #[error("unknown message kind {0:?}")]
    UnknownKind(String),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
