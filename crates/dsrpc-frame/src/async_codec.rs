use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, MAX_BODY_SIZE};
use crate::error::FrameError;

/// `tokio_util` codec for the 2-byte length-prefixed framing.
///
/// Descriptors are not carried; servers that need them read the socket
/// directly.
#[derive(Debug, Clone)]
pub struct RpcFrameCodec {
    max_body_size: usize,
}

impl RpcFrameCodec {
    pub fn new() -> Self {
        Self {
            max_body_size: MAX_BODY_SIZE,
        }
    }

    /// Lower the accepted body size (never above 65535).
    pub fn with_max_body_size(max_body_size: usize) -> Self {
        Self {
            max_body_size: max_body_size.min(MAX_BODY_SIZE),
        }
    }
}

impl Default for RpcFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RpcFrameCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_frame(src, self.max_body_size)
    }
}

impl Encoder<Bytes> for RpcFrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(&item, self.max_body_size, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    #[tokio::test]
    async fn frames_cross_a_duplex_pipe() {
        let (client, server) = tokio::io::duplex(1024);
        let mut sink = FramedWrite::new(client, RpcFrameCodec::new());
        let mut stream = FramedRead::new(server, RpcFrameCodec::new());

        sink.send(Bytes::from_static(b"hello")).await.unwrap();
        sink.send(Bytes::new()).await.unwrap();
        drop(sink);

        assert_eq!(stream.next().await.unwrap().unwrap().as_ref(), b"hello");
        assert!(stream.next().await.unwrap().unwrap().is_empty());
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn encoder_enforces_limit() {
        let mut codec = RpcFrameCodec::with_max_body_size(4);
        let mut dst = BytesMut::new();
        let err = codec
            .encode(Bytes::from_static(b"too long"), &mut dst)
            .unwrap_err();
        assert!(matches!(err, FrameError::BodyTooLarge { max: 4, .. }));
    }
}
