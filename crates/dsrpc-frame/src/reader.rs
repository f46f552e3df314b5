use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::codec::{decode_body, decode_frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::wire::{Invocation, RpcResult};

const READ_CHUNK_SIZE: usize = 4 * 1024;

/// Reads successive frames from a blocking byte stream, such as a capture
/// file of one side of a connection.
pub struct FrameReader<R> {
    source: R,
    pending: BytesMut,
    max_body_size: usize,
    frames_read: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(source: R) -> Self {
        Self::with_config(source, &FrameConfig::default())
    }

    pub fn with_config(source: R, config: &FrameConfig) -> Self {
        Self {
            source,
            pending: BytesMut::with_capacity(READ_CHUNK_SIZE),
            max_body_size: config.max_body_size,
            frames_read: 0,
        }
    }

    /// Number of complete frames returned so far.
    pub fn frames_read(&self) -> usize {
        self.frames_read
    }

    /// Next frame body, or `None` when the stream ends on a frame boundary.
    ///
    /// A stream that stops inside a frame yields `FrameError::ConnectionClosed`.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some(body) = decode_frame(&mut self.pending, self.max_body_size)? {
                self.frames_read += 1;
                trace!(index = self.frames_read - 1, body_len = body.len(), "frame read");
                return Ok(Some(body));
            }

            let read = match self.source.read(&mut chunk) {
                Ok(0) if self.pending.is_empty() => return Ok(None),
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };
            self.pending.extend_from_slice(&chunk[..read]);
        }
    }

    /// Next frame parsed as a server result.
    pub fn next_result(&mut self) -> Result<Option<RpcResult>> {
        self.next_frame()?.map(|body| decode_body(&body)).transpose()
    }

    /// Next frame parsed as a client invocation.
    pub fn next_invocation(&mut self) -> Result<Option<Invocation>> {
        self.next_frame()?.map(|body| decode_body(&body)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BufMut;

    use super::*;
    use crate::codec::{encode_frame, encode_message, MAX_BODY_SIZE};
    use crate::event::EventSequence;

    fn capture(bodies: &[&[u8]]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for body in bodies {
            encode_frame(body, MAX_BODY_SIZE, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    /// Hands out one byte per read, after one interrupted read.
    struct Trickle {
        bytes: Vec<u8>,
        pos: usize,
        interrupted: bool,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(ErrorKind::Interrupted.into());
            }
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn frames_are_returned_in_order() {
        let mut reader = FrameReader::new(Cursor::new(capture(&[b"a", b"", b"ccc"])));

        assert_eq!(reader.next_frame().unwrap().unwrap().as_ref(), b"a");
        assert!(reader.next_frame().unwrap().unwrap().is_empty());
        assert_eq!(reader.next_frame().unwrap().unwrap().as_ref(), b"ccc");
        assert!(reader.next_frame().unwrap().is_none());
        assert_eq!(reader.frames_read(), 3);
    }

    #[test]
    fn trickled_stream_reassembles_frames() {
        let mut reader = FrameReader::new(Trickle {
            bytes: capture(&[b"slow", b"er"]),
            pos: 0,
            interrupted: false,
        });
        assert_eq!(reader.next_frame().unwrap().unwrap().as_ref(), b"slow");
        assert_eq!(reader.next_frame().unwrap().unwrap().as_ref(), b"er");
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn results_and_invocations_decode() {
        let mut buf = BytesMut::new();
        let result = RpcResult::events(vec![EventSequence::ping(4).encode().unwrap()]);
        encode_message(&result, MAX_BODY_SIZE, &mut buf).unwrap();
        let mut reader = FrameReader::new(Cursor::new(buf.to_vec()));
        assert_eq!(reader.next_result().unwrap(), Some(result));
        assert_eq!(reader.next_result().unwrap(), None);

        let invocation = Invocation {
            id: 9,
            method_name: "create_surface".into(),
            parameters: vec![1],
            fds_on_side_channel: 0,
        };
        let mut buf = BytesMut::new();
        encode_message(&invocation, MAX_BODY_SIZE, &mut buf).unwrap();
        let mut reader = FrameReader::new(Cursor::new(buf.to_vec()));
        assert_eq!(reader.next_invocation().unwrap(), Some(invocation));
    }

    #[test]
    fn stream_ending_inside_a_frame_is_an_error() {
        let mut partial = BytesMut::new();
        partial.put_u16(16);
        partial.put_slice(b"short");

        let mut reader = FrameReader::new(Cursor::new(partial.to_vec()));
        assert!(matches!(
            reader.next_frame().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn configured_limit_rejects_large_frames() {
        let mut data = BytesMut::new();
        data.put_u16(1024);

        let config = FrameConfig {
            max_body_size: 16,
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config(Cursor::new(data.to_vec()), &config);
        assert!(matches!(
            reader.next_frame().unwrap_err(),
            FrameError::BodyTooLarge { size: 1024, max: 16 }
        ));
    }
}
