//! Packet framing over a byte stream.
//!
//! [`decode_packet`] slices complete frames off the front of a read buffer;
//! [`encode_packet`] appends framed payloads to a write buffer. Both share
//! a [`Session`], which carries the sequence numbering between them.
//!
//! A header announcing more bytes than will ever arrive stalls the decoder
//! indefinitely. Bounding that wait is the transport's job.

#![allow(clippy::cast_possible_truncation)]

use bytes::{Buf, BufMut, BytesMut};

use super::{MAX_PACKET_SIZE, Packet};

/// Frame header: 3-byte little-endian payload length, then the sequence id.
pub const HEADER_LEN: usize = 4;

/// Per-connection sequence state.
///
/// The decoder records the sequence id of every inbound frame; the encoder
/// reads it to number the next outgoing frame and records what it emitted.
/// Lives as long as the connection and is reset at the start of every new
/// request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Session {
    last_sequence_id: Option<u8>,
}

impl Session {
    /// A fresh session; the first outgoing packet gets sequence id 0.
    pub const fn new() -> Self {
        Self {
            last_sequence_id: None,
        }
    }

    /// The last sequence id seen or sent, if any.
    pub const fn last_sequence_id(&self) -> Option<u8> {
        self.last_sequence_id
    }

    /// The sequence id the next outgoing packet will carry.
    pub fn next_sequence_id(&self) -> u8 {
        self.last_sequence_id.map_or(0, |id| id.wrapping_add(1))
    }

    /// Record a sequence id.
    pub fn record(&mut self, sequence_id: u8) {
        self.last_sequence_id = Some(sequence_id);
    }

    /// Restart numbering for a new request.
    pub fn reset(&mut self) {
        self.last_sequence_id = None;
    }
}

/// Try to slice one complete frame off the front of `buf`.
///
/// Returns `None` without consuming anything if the header or the payload
/// is not fully buffered yet. Otherwise advances `buf` past the frame,
/// records its sequence id in `session` and returns the packet; the caller
/// may immediately try again for the next frame.
pub fn decode_packet(buf: &mut BytesMut, session: &mut Session) -> Option<Packet> {
    let header = buf.get(..HEADER_LEN)?;
    let payload_len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    let sequence_id = header[3];
    if buf.len() < HEADER_LEN + payload_len {
        return None;
    }

    buf.advance(HEADER_LEN);
    let payload = buf.split_to(payload_len).freeze();
    session.record(sequence_id);

    tracing::trace!(
        sequence_id,
        payload_len,
        buffered = buf.len(),
        "framed inbound packet"
    );

    Some(Packet::new(sequence_id, payload))
}

/// Frame `payload` onto `out`, numbering from `session`.
///
/// Payloads of 16MB - 1 bytes or more are split into consecutive frames;
/// a payload that is an exact multiple of the frame limit is followed by
/// an empty frame.
pub fn encode_packet(payload: &[u8], session: &mut Session, out: &mut BytesMut) {
    out.reserve(payload.len() + HEADER_LEN);

    let mut rest = payload;
    loop {
        let (chunk, tail) = rest.split_at(rest.len().min(MAX_PACKET_SIZE));
        let sequence_id = session.next_sequence_id();
        out.put_uint_le(chunk.len() as u64, 3);
        out.put_u8(sequence_id);
        out.put_slice(chunk);
        session.record(sequence_id);
        rest = tail;

        tracing::trace!(sequence_id, payload_len = chunk.len(), "framed outbound packet");

        if chunk.len() < MAX_PACKET_SIZE {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sequence_id: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = BytesMut::new();
        let mut session = Session::new();
        if sequence_id > 0 {
            session.record(sequence_id - 1);
        }
        encode_packet(payload, &mut session, &mut out);
        out.to_vec()
    }

    #[test]
    fn test_decode_single_frame() {
        let mut buf = BytesMut::from(&frame(3, b"hello")[..]);
        let mut session = Session::new();

        let packet = decode_packet(&mut buf, &mut session).unwrap();
        assert_eq!(packet.sequence_id(), 3);
        assert_eq!(packet.payload(), b"hello");
        assert!(buf.is_empty());
        assert_eq!(session.last_sequence_id(), Some(3));
        assert_eq!(session.next_sequence_id(), 4);
    }

    #[test]
    fn test_partial_header_consumes_nothing() {
        let mut buf = BytesMut::from(&[0x05, 0x00, 0x00][..]);
        let mut session = Session::new();
        assert!(decode_packet(&mut buf, &mut session).is_none());
        assert_eq!(buf.len(), 3);
        assert_eq!(session.last_sequence_id(), None);
    }

    #[test]
    fn test_partial_payload_consumes_nothing() {
        let bytes = frame(1, b"hello");
        let mut buf = BytesMut::from(&bytes[..7]);
        let mut session = Session::new();

        assert!(decode_packet(&mut buf, &mut session).is_none());
        assert_eq!(buf.len(), 7);

        buf.extend_from_slice(&bytes[7..]);
        let packet = decode_packet(&mut buf, &mut session).unwrap();
        assert_eq!(packet.payload(), b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_buffer() {
        let mut bytes = frame(1, b"one");
        bytes.extend_from_slice(&frame(2, b""));
        bytes.extend_from_slice(&frame(3, b"three"));
        let mut buf = BytesMut::from(&bytes[..]);
        let mut session = Session::new();

        let payloads: Vec<_> = std::iter::from_fn(|| decode_packet(&mut buf, &mut session))
            .map(|p| (p.sequence_id(), p.into_payload().to_vec()))
            .collect();
        assert_eq!(
            payloads,
            vec![
                (1, b"one".to_vec()),
                (2, Vec::new()),
                (3, b"three".to_vec())
            ]
        );
        assert_eq!(session.last_sequence_id(), Some(3));
    }

    #[test]
    fn test_encode_numbers_from_session() {
        let mut session = Session::new();
        let mut out = BytesMut::new();

        encode_packet(&[0x16, b'S'], &mut session, &mut out);
        assert_eq!(&out[..], &[0x02, 0x00, 0x00, 0x00, 0x16, b'S']);

        // Inbound reply recorded by the decoder, next request continues
        session.record(1);
        out.clear();
        encode_packet(&[0x01], &mut session, &mut out);
        assert_eq!(out[3], 2);

        session.reset();
        out.clear();
        encode_packet(&[0x01], &mut session, &mut out);
        assert_eq!(out[3], 0);
    }

    #[test]
    fn test_sequence_wraps() {
        let mut session = Session::new();
        session.record(255);
        assert_eq!(session.next_sequence_id(), 0);
    }

    #[test]
    fn test_encode_splits_oversized_payload() {
        let payload = vec![0xAB; MAX_PACKET_SIZE + 10];
        let mut session = Session::new();
        let mut out = BytesMut::new();
        encode_packet(&payload, &mut session, &mut out);

        assert_eq!(out.len(), payload.len() + 2 * HEADER_LEN);
        assert_eq!(&out[..4], &[0xFF, 0xFF, 0xFF, 0x00]);
        let second = HEADER_LEN + MAX_PACKET_SIZE;
        assert_eq!(&out[second..second + 4], &[10, 0x00, 0x00, 0x01]);
        assert_eq!(session.last_sequence_id(), Some(1));
    }

    #[test]
    fn test_encode_exact_limit_appends_empty_frame() {
        let payload = vec![0u8; MAX_PACKET_SIZE];
        let mut session = Session::new();
        let mut out = BytesMut::new();
        encode_packet(&payload, &mut session, &mut out);

        assert_eq!(out.len(), MAX_PACKET_SIZE + 2 * HEADER_LEN);
        assert_eq!(&out[out.len() - 4..], &[0x00, 0x00, 0x00, 0x01]);
    }
}
