use std::path::PathBuf;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The peer closed the stream or reset the connection.
    #[error("transport disconnected")]
    Disconnected,

    /// A descriptor-carrying read produced a different number of descriptors.
    #[error("expected {expected} file descriptors on side channel, received {received}")]
    DescriptorMismatch { expected: usize, received: usize },

    /// The kernel truncated the ancillary data of a descriptor-carrying read.
    #[error("ancillary data truncated (descriptors dropped by the kernel)")]
    ControlTruncated,

    /// Descriptors cannot be sent without at least one byte of payload.
    #[error("cannot send {0} file descriptors without payload bytes")]
    EmptyPayload(usize),
}

impl TransportError {
    /// True when the error means the connection is gone for good.
    pub fn is_disconnect(&self) -> bool {
        match self {
            TransportError::Disconnected => true,
            TransportError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_classification() {
        assert!(TransportError::Disconnected.is_disconnect());
        assert!(TransportError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            .is_disconnect());
        assert!(!TransportError::Io(std::io::Error::from(std::io::ErrorKind::TimedOut))
            .is_disconnect());
        assert!(!TransportError::ControlTruncated.is_disconnect());
    }
}
