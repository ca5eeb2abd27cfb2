//! Packet framing over a TCP byte stream.
//!
//! TCP delivers bytes, not messages: one read may return part of a packet or
//! several packets at once. With [`Framing::LengthPrefixed`] every packet is
//! sent as:
//! - 4 bytes: big-endian payload length
//! - N bytes: payload
//!
//! and [`FrameCodec`] rebuilds packet boundaries from whatever chunks the
//! socket returns. [`Framing::Raw`] sends payloads bare and treats each read
//! as one packet; it only preserves boundaries when the peer's writes and our
//! reads happen to line up.

use crate::error::Error;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

/// Frame header size: 4 bytes big-endian length.
pub const FRAME_HEADER_SIZE: usize = 4;

/// How packet boundaries are carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// 4-byte big-endian length header before every payload
    #[default]
    LengthPrefixed,
    /// No header; one read is one packet
    Raw,
}

impl Framing {
    /// Bytes added on the wire per packet
    pub fn overhead(self) -> usize {
        match self {
            Self::LengthPrefixed => FRAME_HEADER_SIZE,
            Self::Raw => 0,
        }
    }
}

/// Codec for length-prefixed packets
///
/// # Example
///
/// ```
/// use bytes::BytesMut;
/// use peerlink_core::FrameCodec;
/// use tokio_util::codec::{Decoder, Encoder};
///
/// let mut codec = FrameCodec::new(1024);
/// let mut wire = BytesMut::new();
/// codec.encode(&b"ping"[..], &mut wire).unwrap();
/// codec.encode(&b"pong"[..], &mut wire).unwrap();
///
/// let mut src = wire.split_to(3);
/// assert_eq!(codec.decode(&mut src).unwrap(), None);
///
/// src.unsplit(wire);
/// assert_eq!(&codec.decode(&mut src).unwrap().unwrap()[..], b"ping");
/// assert_eq!(&codec.decode(&mut src).unwrap().unwrap()[..], b"pong");
/// assert_eq!(codec.decode(&mut src).unwrap(), None);
/// ```
#[derive(Debug)]
pub struct FrameCodec {
    max_payload: usize,
    /// Payload length of the current frame once its header has been read
    current_length: Option<usize>,
}

impl FrameCodec {
    /// Create a codec accepting payloads of 1 to `max_payload` bytes.
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload,
            current_length: None,
        }
    }

    /// Largest payload this codec accepts
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    fn check_length(&self, length: usize) -> Result<(), Error> {
        if length == 0 || length > self.max_payload {
            return Err(Error::InvalidFrameLength {
                length,
                max: self.max_payload,
            });
        }
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = Error;

    /// Take the next complete payload, if one is buffered.
    ///
    /// A header announcing an empty or oversized payload is
    /// `Error::InvalidFrameLength`; the stream cannot be resynchronised after
    /// that.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, Error> {
        let length = match self.current_length {
            Some(length) => length,
            None => {
                if src.len() < FRAME_HEADER_SIZE {
                    return Ok(None);
                }
                let length = src.get_u32() as usize;
                self.check_length(length)?;
                self.current_length = Some(length);
                length
            }
        };

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        self.current_length = None;
        Ok(Some(src.split_to(length).freeze()))
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, payload: &[u8], dst: &mut BytesMut) -> Result<(), Error> {
        self.check_length(payload.len())?;

        dst.reserve(FRAME_HEADER_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_all(codec: &mut FrameCodec, payloads: &[&[u8]]) -> BytesMut {
        let mut wire = BytesMut::new();
        for payload in payloads {
            codec.encode(*payload, &mut wire).unwrap();
        }
        wire
    }

    #[test]
    fn test_encode_layout() {
        let mut codec = FrameCodec::new(16);
        let wire = encode_all(&mut codec, &[&[0xAB, 0xCD]]);
        assert_eq!(&wire[..], &[0, 0, 0, 2, 0xAB, 0xCD]);
    }

    #[test]
    fn test_encode_rejects_bad_lengths() {
        let mut codec = FrameCodec::new(4);
        let mut wire = BytesMut::new();

        assert!(codec.encode(&[][..], &mut wire).is_err());
        assert!(codec.encode(&[0u8; 5][..], &mut wire).is_err());
        assert!(wire.is_empty());
    }

    #[test]
    fn test_partial_header() {
        let mut codec = FrameCodec::new(16);
        let mut src = BytesMut::from(&[0u8, 0][..]);
        assert_eq!(codec.decode(&mut src).unwrap(), None);
        assert_eq!(src.len(), 2);
    }

    #[test]
    fn test_partial_payload() {
        let mut codec = FrameCodec::new(128);
        let mut src = BytesMut::from(&[0u8, 0, 0, 100][..]);
        src.extend_from_slice(&[7u8; 50]);
        assert_eq!(codec.decode(&mut src).unwrap(), None);

        src.extend_from_slice(&[7u8; 50]);
        assert_eq!(codec.decode(&mut src).unwrap().unwrap(), vec![7u8; 100]);
        assert!(src.is_empty());
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut codec = FrameCodec::new(64);
        let wire = encode_all(&mut codec, &[b"hello", b"world"]);

        let mut src = BytesMut::new();
        let mut frames = Vec::new();
        for byte in wire.iter() {
            src.put_u8(*byte);
            while let Some(frame) = codec.decode(&mut src).unwrap() {
                frames.push(frame.to_vec());
            }
        }

        assert_eq!(frames, vec![b"hello".to_vec(), b"world".to_vec()]);
    }

    #[test]
    fn test_zero_length_rejected() {
        let mut codec = FrameCodec::new(16);
        let mut src = BytesMut::from(&[0u8, 0, 0, 0][..]);
        assert!(matches!(
            codec.decode(&mut src),
            Err(Error::InvalidFrameLength { length: 0, max: 16 })
        ));
    }

    #[test]
    fn test_oversize_rejected() {
        let mut codec = FrameCodec::new(4);
        let mut src = BytesMut::from(&[0u8, 0, 0, 5, 1, 2, 3, 4, 5][..]);
        assert!(matches!(
            codec.decode(&mut src),
            Err(Error::InvalidFrameLength { length: 5, max: 4 })
        ));
    }

    #[test]
    fn test_framing_overhead() {
        assert_eq!(Framing::LengthPrefixed.overhead(), 4);
        assert_eq!(Framing::Raw.overhead(), 0);
        assert_eq!(Framing::default(), Framing::LengthPrefixed);
    }
}
