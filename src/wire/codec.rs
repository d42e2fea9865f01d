//! Packet codec for `tokio_util::codec` framed streams

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use super::{HEADER_LEN, MAGIC, MAX_BODY_LEN, MIN_BODY_LEN};

/// One decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Client id as carried on the wire; not yet checked against a fleet.
    pub client_id: u32,
    /// Opaque payload.
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet for `client_id`.
    pub fn new(client_id: u32, payload: impl Into<Bytes>) -> Self {
        Self { client_id, payload: payload.into() }
    }

    /// Encode into a standalone buffer.
    pub fn to_bytes(&self) -> std::io::Result<Bytes> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + MIN_BODY_LEN + self.payload.len());
        PacketCodec::default().encode(self.clone(), &mut buf)?;
        Ok(buf.freeze())
    }
}

/// Reason a record was dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("skipped {skipped} bytes without a frame marker")]
    BadMagic { skipped: usize },

    #[error("body length {len} outside {}..={}", MIN_BODY_LEN, MAX_BODY_LEN)]
    BodyLength { len: usize },

    #[error("stream ended inside a frame ({bytes} bytes left)")]
    Truncated { bytes: usize },
}

/// Item produced by [`PacketCodec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Packet(Packet),
    Malformed(FrameError),
}

/// Length-prefixed packet codec.
#[derive(Debug, Default)]
pub struct PacketCodec {
    /// Garbage bytes discarded since the last frame marker.
    skipped: usize,
}

impl Decoder for PacketCodec {
    type Item = Decoded;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Decoded>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        if src[0] != MAGIC {
            let run = src.iter().position(|b| *b == MAGIC).unwrap_or(src.len());
            src.advance(run);
            self.skipped += run;
            if src.is_empty() {
                return Ok(None);
            }
            let skipped = std::mem::take(&mut self.skipped);
            trace!(skipped, "resynchronised on frame marker");
            return Ok(Some(Decoded::Malformed(FrameError::BadMagic { skipped })));
        }

        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u16::from_be_bytes([src[1], src[2]]) as usize;
        if !(MIN_BODY_LEN..=MAX_BODY_LEN).contains(&len) {
            // Drop the marker only; the next record may start inside this header.
            src.advance(1);
            return Ok(Some(Decoded::Malformed(FrameError::BodyLength { len })));
        }

        let frame_len = HEADER_LEN + len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let mut body = src.split_to(len);
        let client_id = body.get_u32();
        Ok(Some(Decoded::Packet(Packet { client_id, payload: body.freeze() })))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Decoded>, Self::Error> {
        if let Some(item) = self.decode(buf)? {
            return Ok(Some(item));
        }

        let bytes = buf.len() + std::mem::take(&mut self.skipped);
        buf.clear();
        if bytes == 0 {
            Ok(None)
        } else {
            Ok(Some(Decoded::Malformed(FrameError::Truncated { bytes })))
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = std::io::Error;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = MIN_BODY_LEN + packet.payload.len();
        if len > MAX_BODY_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("payload of {} bytes exceeds frame limit", packet.payload.len()),
            ));
        }

        dst.reserve(HEADER_LEN + len);
        dst.put_u8(MAGIC);
        dst.put_u16(len as u16);
        dst.put_u32(packet.client_id);
        dst.put_slice(&packet.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::DEFAULT_PAYLOAD;
    use proptest::prelude::*;

    fn decode_all(codec: &mut PacketCodec, buf: &mut BytesMut) -> Vec<Decoded> {
        let mut out = Vec::new();
        while let Some(item) = codec.decode(buf).unwrap() {
            out.push(item);
        }
        out
    }

    #[test]
    fn header_layout_is_stable() {
        let bytes = Packet::new(12, DEFAULT_PAYLOAD).to_bytes().unwrap();
        assert_eq!(&bytes[..], &[0xA7, 0x00, 0x08, 0x00, 0x00, 0x00, 0x0C, b'd', b'a', b't', b'a']);
    }

    #[test]
    fn short_reads_wait_for_the_rest_of_the_frame() {
        let bytes = Packet::new(3, DEFAULT_PAYLOAD).to_bytes().unwrap();
        let mut codec = PacketCodec::default();
        let mut buf = BytesMut::new();

        for (i, byte) in bytes.iter().enumerate() {
            buf.put_u8(*byte);
            let item = codec.decode(&mut buf).unwrap();
            if i + 1 < bytes.len() {
                assert!(item.is_none(), "decoded early at byte {i}");
            } else {
                assert_eq!(item, Some(Decoded::Packet(Packet::new(3, DEFAULT_PAYLOAD))));
            }
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn garbage_between_frames_is_reported_once_per_run() {
        let mut buf = BytesMut::new();
        buf.put_slice(b"1data");
        buf.put_slice(&Packet::new(1, DEFAULT_PAYLOAD).to_bytes().unwrap());
        let mut codec = PacketCodec::default();

        let items = decode_all(&mut codec, &mut buf);
        assert_eq!(
            items,
            vec![
                Decoded::Malformed(FrameError::BadMagic { skipped: 5 }),
                Decoded::Packet(Packet::new(1, DEFAULT_PAYLOAD)),
            ]
        );
    }

    #[test]
    fn bad_length_skips_only_the_marker() {
        let mut buf = BytesMut::new();
        buf.put_slice(&[MAGIC, 0xFF, 0xFF]);
        buf.put_slice(&Packet::new(2, DEFAULT_PAYLOAD).to_bytes().unwrap());
        let mut codec = PacketCodec::default();

        let items = decode_all(&mut codec, &mut buf);
        assert_eq!(items[0], Decoded::Malformed(FrameError::BodyLength { len: 0xFFFF }));
        assert_eq!(items.last(), Some(&Decoded::Packet(Packet::new(2, DEFAULT_PAYLOAD))));
    }

    #[test]
    fn eof_inside_a_frame_is_truncation() {
        let bytes = Packet::new(1, DEFAULT_PAYLOAD).to_bytes().unwrap();
        let mut buf = BytesMut::from(&bytes[..6]);
        let mut codec = PacketCodec::default();

        assert_eq!(
            codec.decode_eof(&mut buf).unwrap(),
            Some(Decoded::Malformed(FrameError::Truncated { bytes: 6 }))
        );
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn oversized_payload_is_refused_by_encoder() {
        let packet = Packet::new(1, vec![0u8; MAX_BODY_LEN]);
        assert!(packet.to_bytes().is_err());
    }

    proptest! {
        #[test]
        fn reassembles_across_arbitrary_read_boundaries(
            ids in prop::collection::vec(1u32..100_000, 1..32),
            cuts in prop::collection::vec(1usize..16, 1..64),
        ) {
            let mut wire = BytesMut::new();
            for id in &ids {
                wire.put_slice(&Packet::new(*id, DEFAULT_PAYLOAD).to_bytes().unwrap());
            }
            let wire = wire.freeze();

            let mut codec = PacketCodec::default();
            let mut buf = BytesMut::new();
            let mut decoded = Vec::new();
            let mut offset = 0;
            let mut cut = cuts.iter().cycle();
            while offset < wire.len() {
                let end = (offset + cut.next().copied().unwrap_or(1)).min(wire.len());
                buf.put_slice(&wire[offset..end]);
                offset = end;
                decoded.extend(decode_all(&mut codec, &mut buf));
            }

            let got: Vec<u32> = decoded
                .into_iter()
                .map(|item| match item {
                    Decoded::Packet(p) => p.client_id,
                    Decoded::Malformed(e) => panic!("unexpected malformed frame: {e}"),
                })
                .collect();
            prop_assert_eq!(got, ids);
        }
    }
}
