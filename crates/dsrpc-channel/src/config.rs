use std::time::Duration;

use dsrpc_frame::FrameConfig;

/// Default upper bound on descriptors a single message may declare.
pub const DEFAULT_MAX_SIDE_CHANNEL_FDS: usize = 64;

/// Default wait for [`RpcChannel::call_and_wait`](crate::RpcChannel::call_and_wait).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Framing limits and socket timeouts.
    pub frame: FrameConfig,
    /// A message declaring more descriptors than this is a protocol error.
    pub max_side_channel_fds: usize,
    /// How long a synchronous call waits for its response.
    pub call_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            max_side_channel_fds: DEFAULT_MAX_SIDE_CHANNEL_FDS,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl ChannelConfig {
    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_max_side_channel_fds(mut self, max: usize) -> Self {
        self.max_side_channel_fds = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_override_defaults() {
        let config = ChannelConfig::default()
            .with_call_timeout(Duration::from_millis(250))
            .with_max_side_channel_fds(4);

        assert_eq!(config.call_timeout, Duration::from_millis(250));
        assert_eq!(config.max_side_channel_fds, 4);
        assert_eq!(config.frame.max_body_size, dsrpc_frame::MAX_BODY_SIZE);
    }
}
