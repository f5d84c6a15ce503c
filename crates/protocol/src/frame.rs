//! Length-prefixed transport framing
//!
//! Every message on the wire is a 4-byte big-endian length field followed
//! by exactly that many payload bytes. A designated sentinel payload (the
//! zero-length frame by default) is the keep-alive probe; probes belong to
//! the transport and are never surfaced as application messages.

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tracing::trace;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Maximum allowed payload size (16 MB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum FramingError {
    #[error("declared length {declared} exceeds maximum of {max} bytes")]
    Oversized { declared: usize, max: usize },

    #[error("stream closed mid-frame: {buffered} bytes buffered, {needed} needed")]
    Truncated { buffered: usize, needed: usize },
}

/// One length-prefixed unit of the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Encoder and keep-alive policy for the framed transport.
///
/// The probe payload is configuration data: deployments riding a variant
/// with a non-default probe supply their own sentinel.
#[derive(Debug, Clone, Default)]
pub struct FrameCodec {
    probe: Vec<u8>,
}

impl FrameCodec {
    /// Codec whose keep-alive probe is the zero-length frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec with a custom sentinel payload as the keep-alive probe.
    pub fn with_probe(probe: Vec<u8>) -> Self {
        Self { probe }
    }

    /// Prepend the big-endian length prefix to `payload`.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>, FramingError> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(FramingError::Oversized {
                declared: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        Ok(out)
    }

    /// The keep-alive probe as a frame.
    pub fn probe_frame(&self) -> Frame {
        Frame::new(self.probe.clone())
    }

    /// The keep-alive probe, fully encoded for the wire.
    pub fn encode_probe(&self) -> Vec<u8> {
        // The probe payload is bounded by construction, encode cannot fail.
        let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + self.probe.len());
        out.extend_from_slice(&(self.probe.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.probe);
        out
    }

    /// Whether `frame` is the keep-alive probe.
    pub fn is_probe(&self, frame: &Frame) -> bool {
        frame.payload == self.probe
    }
}

/// Resumable frame decoder.
///
/// Owns a buffer of previously received bytes; `next_frame` returns
/// `Ok(None)` until a complete frame is buffered and consumes bytes only
/// once the whole frame is available. Blocking on the underlying transport
/// is the caller's responsibility.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buf: BytesMut,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes to the internal buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Internal buffer, exposed so callers can `read_buf` directly into it.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Number of buffered, not-yet-consumed bytes.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Try to extract the next complete frame.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FramingError> {
        if self.buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut len_bytes = [0u8; LENGTH_PREFIX_SIZE];
        len_bytes.copy_from_slice(&self.buf[..LENGTH_PREFIX_SIZE]);
        let declared = u32::from_be_bytes(len_bytes) as usize;

        if declared > MAX_FRAME_SIZE {
            return Err(FramingError::Oversized {
                declared,
                max: MAX_FRAME_SIZE,
            });
        }

        if self.buf.len() < LENGTH_PREFIX_SIZE + declared {
            trace!(
                declared,
                buffered = self.buf.len(),
                "incomplete frame, waiting for more data"
            );
            return Ok(None);
        }

        self.buf.advance(LENGTH_PREFIX_SIZE);
        let payload = self.buf.split_to(declared).to_vec();
        Ok(Some(Frame::new(payload)))
    }

    /// Report whether the stream may close here without losing a frame.
    ///
    /// Call when the underlying transport reaches end-of-stream: leftover
    /// bytes mean the peer closed mid-frame.
    pub fn finish(&self) -> Result<(), FramingError> {
        if self.buf.is_empty() {
            return Ok(());
        }

        let needed = if self.buf.len() < LENGTH_PREFIX_SIZE {
            LENGTH_PREFIX_SIZE
        } else {
            let mut len_bytes = [0u8; LENGTH_PREFIX_SIZE];
            len_bytes.copy_from_slice(&self.buf[..LENGTH_PREFIX_SIZE]);
            LENGTH_PREFIX_SIZE + u32::from_be_bytes(len_bytes) as usize
        };

        Err(FramingError::Truncated {
            buffered: self.buf.len(),
            needed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let codec = FrameCodec::new();
        let payload = vec![0xDE, 0xAD, 0xBE, 0xEF];

        let encoded = codec.encode(&payload).unwrap();
        assert_eq!(&encoded[..4], &4u32.to_be_bytes());

        let mut decoder = StreamDecoder::new();
        decoder.feed(&encoded);
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.payload, payload);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_partial_reads_resume() {
        let codec = FrameCodec::new();
        let payload = vec![1, 2, 3, 4, 5];
        let encoded = codec.encode(&payload).unwrap();

        let mut decoder = StreamDecoder::new();
        for &byte in &encoded[..encoded.len() - 1] {
            decoder.feed(&[byte]);
            assert!(decoder.next_frame().unwrap().is_none());
        }

        decoder.feed(&encoded[encoded.len() - 1..]);
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn test_no_partial_consumption() {
        let codec = FrameCodec::new();
        let encoded = codec.encode(&[9, 9, 9, 9, 9]).unwrap();

        let mut decoder = StreamDecoder::new();
        // Header plus four of the five payload bytes.
        decoder.feed(&encoded[..8]);
        assert!(decoder.next_frame().unwrap().is_none());
        assert_eq!(decoder.buffered(), 8);

        decoder.feed(&encoded[8..]);
        assert!(decoder.next_frame().unwrap().is_some());
    }

    #[test]
    fn test_truncated_stream() {
        let codec = FrameCodec::new();
        let encoded = codec.encode(&[1, 2, 3, 4, 5]).unwrap();

        let mut decoder = StreamDecoder::new();
        decoder.feed(&encoded[..8]);
        assert!(decoder.next_frame().unwrap().is_none());

        let err = decoder.finish().unwrap_err();
        assert!(matches!(
            err,
            FramingError::Truncated {
                buffered: 8,
                needed: 9
            }
        ));
    }

    #[test]
    fn test_truncated_header() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(&[0, 0]);
        assert!(decoder.next_frame().unwrap().is_none());
        assert!(matches!(
            decoder.finish(),
            Err(FramingError::Truncated { buffered: 2, needed: 4 })
        ));
    }

    #[test]
    fn test_clean_close() {
        let decoder = StreamDecoder::new();
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn test_oversized_declared_length() {
        let mut decoder = StreamDecoder::new();
        decoder.feed(&((MAX_FRAME_SIZE as u32) + 1).to_be_bytes());
        assert!(matches!(
            decoder.next_frame(),
            Err(FramingError::Oversized { .. })
        ));
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let codec = FrameCodec::new();
        let mut wire = codec.encode(&[1, 2, 3]).unwrap();
        wire.extend_from_slice(&codec.encode(&[4, 5]).unwrap());

        let mut decoder = StreamDecoder::new();
        decoder.feed(&wire);

        assert_eq!(decoder.next_frame().unwrap().unwrap().payload, vec![1, 2, 3]);
        assert_eq!(decoder.next_frame().unwrap().unwrap().payload, vec![4, 5]);
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_default_probe_is_zero_length() {
        let codec = FrameCodec::new();
        let probe = codec.probe_frame();
        assert!(probe.is_empty());
        assert!(codec.is_probe(&probe));
        assert!(!codec.is_probe(&Frame::new(vec![0])));
        assert_eq!(codec.encode_probe(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_custom_probe_sentinel() {
        let codec = FrameCodec::with_probe(b"PING\0".to_vec());
        assert!(codec.is_probe(&Frame::new(b"PING\0".to_vec())));
        assert!(!codec.is_probe(&Frame::new(Vec::new())));

        let mut decoder = StreamDecoder::new();
        decoder.feed(&codec.encode_probe());
        let frame = decoder.next_frame().unwrap().unwrap();
        assert!(codec.is_probe(&frame));
    }
}
