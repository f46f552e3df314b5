use std::fmt;
use std::io;

use dsrpc_channel::{CallFailure, ChannelError};
use dsrpc_frame::FrameError;
use dsrpc_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PROTOCOL_ERROR: i32 = 4;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::Disconnected => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::BodyTooLarge { .. }
        | FrameError::Encode(_)
        | FrameError::Decode(_)
        | FrameError::UnknownValue { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::UnknownKind(_) => CliError::new(USAGE, format!("{context}: {err}")),
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    match err {
        ChannelError::Transport(err) => transport_error(context, err),
        ChannelError::Frame(err) => frame_error(context, err),
        ChannelError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ChannelError::Disconnected => CliError::new(FAILURE, format!("{context}: {err}")),
        ChannelError::CallFailed(CallFailure::Disconnected) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        ChannelError::CallFailed(CallFailure::InvalidRequest(_)) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        ChannelError::UnknownCall(_)
        | ChannelError::UnknownBufferOperation(_)
        | ChannelError::MissingBuffer(_)
        | ChannelError::TooManyDescriptors { .. }
        | ChannelError::CallFailed(_) => {
            CliError::new(PROTOCOL_ERROR, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn errors_map_to_exit_codes() {
        assert_eq!(
            channel_error("x", ChannelError::Timeout(Duration::from_secs(1))).code,
            TIMEOUT
        );
        assert_eq!(
            channel_error("x", ChannelError::UnknownBufferOperation(9)).code,
            PROTOCOL_ERROR
        );
        assert_eq!(
            channel_error(
                "x",
                ChannelError::Transport(TransportError::Io(io::Error::from(
                    io::ErrorKind::PermissionDenied
                )))
            )
            .code,
            PERMISSION_DENIED
        );
        assert_eq!(
            frame_error("x", FrameError::BodyTooLarge { size: 70_000, max: 65_535 }).code,
            DATA_INVALID
        );
        assert_eq!(frame_error("x", FrameError::UnknownKind("w".into())).code, USAGE);
    }

    #[test]
    fn context_prefixes_message() {
        let err = channel_error("call failed", ChannelError::Disconnected);
        assert_eq!(err.to_string(), "call failed: channel disconnected");
    }
}
