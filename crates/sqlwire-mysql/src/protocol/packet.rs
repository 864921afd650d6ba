//! A single framed packet and the generic server replies it can carry.

use bytes::Bytes;
use sqlwire_core::Error;
use sqlwire_core::error::QueryError;

use super::{CapabilityFlags, MAX_PACKET_SIZE, PacketReader, protocol_error_with_data};

const OK_HEADER: u8 = 0x00;
const EOF_HEADER: u8 = 0xFE;
const ERR_HEADER: u8 = 0xFF;

/// A classic EOF packet is 0xFE plus at most 8 bytes; anything longer
/// starting with 0xFE is row or metadata data.
const MAX_EOF_LEN: usize = 9;

/// One inbound frame: its payload and the sequence id it carried.
///
/// The payload is an owned slice split off the read buffer; a packet is
/// handed to exactly one command and never re-delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    sequence_id: u8,
    payload: Bytes,
}

impl Packet {
    pub fn new(sequence_id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence_id,
            payload: payload.into(),
        }
    }

    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    fn header(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    pub fn is_error(&self) -> bool {
        self.header() == Some(ERR_HEADER)
    }

    pub fn is_ok(&self) -> bool {
        self.header() == Some(OK_HEADER)
    }

    /// Classic EOF packet (0xFE with a payload under 9 bytes).
    pub fn is_eof(&self) -> bool {
        self.header() == Some(EOF_HEADER) && self.len() < MAX_EOF_LEN
    }

    /// Whether this packet terminates a row stream.
    ///
    /// With CLIENT_DEPRECATE_EOF the terminator is an OK packet carrying a
    /// 0xFE header, which may be longer than a classic EOF packet but never
    /// fills a whole frame. Binary rows always start with 0x00, so a 0xFE
    /// first byte cannot be row data.
    pub fn is_end_marker(&self, capabilities: CapabilityFlags) -> bool {
        if capabilities.deprecate_eof() {
            self.header() == Some(EOF_HEADER) && self.len() < MAX_PACKET_SIZE
        } else {
            self.is_eof()
        }
    }

    /// Decode an ERR packet into the server error it reports.
    ///
    /// An ERR packet too short to carry an error code is itself a protocol
    /// error.
    pub fn server_error(&self, sql: Option<&str>) -> Error {
        match ErrPacket::decode(&self.payload) {
            Some(err) => err.into_error(sql),
            None => protocol_error_with_data("Invalid error packet", &self.payload),
        }
    }

    /// Decode an OK packet (0x00 or 0xFE header).
    pub fn parse_ok(&self) -> Result<OkPacket, Error> {
        OkPacket::decode(&self.payload)
            .ok_or_else(|| protocol_error_with_data("Invalid OK packet", &self.payload))
    }

    pub fn parse_eof(&self) -> Result<EofPacket, Error> {
        EofPacket::decode(&self.payload)
            .ok_or_else(|| protocol_error_with_data("Invalid EOF packet", &self.payload))
    }
}

/// Reader positioned after an optional one-byte `header`.
fn body(payload: &[u8], header: u8) -> PacketReader<'_> {
    let mut reader = PacketReader::new(payload);
    if reader.peek() == Some(header) {
        reader.read_u8();
    }
    reader
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    /// Human-readable info, usually empty
    pub info: String,
}

impl OkPacket {
    /// Accepts both the 0x00 header and the 0xFE header of a result set
    /// terminator under CLIENT_DEPRECATE_EOF.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        let header = match payload.first() {
            Some(&EOF_HEADER) => EOF_HEADER,
            _ => OK_HEADER,
        };
        let mut r = body(payload, header);
        Some(Self {
            affected_rows: r.read_lenenc_int()?,
            last_insert_id: r.read_lenenc_int()?,
            status_flags: r.read_u16_le()?,
            warnings: r.read_u16_le()?,
            info: String::from_utf8_lossy(r.read_rest()).into_owned(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}

impl EofPacket {
    pub fn decode(payload: &[u8]) -> Option<Self> {
        let mut r = body(payload, EOF_HEADER);
        Some(Self {
            warnings: r.read_u16_le()?,
            status_flags: r.read_u16_le()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    pub error_code: u16,
    /// Five-character SQLSTATE, empty when the server sent none
    pub sql_state: String,
    pub error_message: String,
}

impl ErrPacket {
    pub fn decode(payload: &[u8]) -> Option<Self> {
        let mut r = body(payload, ERR_HEADER);
        let error_code = r.read_u16_le()?;
        let sql_state = if r.peek() == Some(b'#') {
            r.read_u8();
            String::from_utf8_lossy(r.read_bytes(5)?).into_owned()
        } else {
            String::new()
        };
        Some(Self {
            error_code,
            sql_state,
            error_message: String::from_utf8_lossy(r.read_rest()).into_owned(),
        })
    }

    /// Convert into the server error surfaced to callers.
    pub fn into_error(self, sql: Option<&str>) -> Error {
        Error::Query(QueryError {
            kind: QueryError::kind_for_code(self.error_code),
            code: Some(self.error_code),
            sql: sql.map(str::to_owned),
            sqlstate: Some(self.sql_state).filter(|s| !s.is_empty()),
            message: self.error_message,
        })
    }
}
