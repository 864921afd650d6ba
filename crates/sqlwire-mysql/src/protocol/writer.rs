//! Payload builder for client requests.
//!
//! Writes the protocol's scalar encodings into a `BytesMut`. Framing the
//! finished payload is the encoder's job (see `framer`).

#![allow(clippy::cast_possible_truncation)]

use bytes::{BufMut, Bytes, BytesMut};

/// Accumulates one request payload.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Freeze into the payload handed to the encoder.
    pub fn into_payload(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_u16_le(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    pub fn write_u32_le(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn write_u64_le(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    /// Length-encoded integer: one byte below 251, otherwise a 0xFC, 0xFD
    /// or 0xFE prefix followed by 2, 3 or 8 little-endian bytes.
    pub fn write_lenenc_int(&mut self, value: u64) {
        match value {
            0..=250 => self.buf.put_u8(value as u8),
            251..=0xFFFF => {
                self.buf.put_u8(0xFC);
                self.buf.put_u16_le(value as u16);
            }
            0x1_0000..=0xFF_FFFF => {
                self.buf.put_u8(0xFD);
                self.buf.put_uint_le(value, 3);
            }
            _ => {
                self.buf.put_u8(0xFE);
                self.buf.put_u64_le(value);
            }
        }
    }

    pub fn write_lenenc_bytes(&mut self, data: &[u8]) {
        self.write_lenenc_int(data.len() as u64);
        self.buf.put_slice(data);
    }

    pub fn write_lenenc_string(&mut self, s: &str) {
        self.write_lenenc_bytes(s.as_bytes());
    }
}
