//! MySQL wire protocol: framing, scalar codecs and the prepared-statement
//! payloads.
//!
//! Every frame is a 3-byte little-endian payload length and a sequence
//! byte followed by the payload. A payload holds at most 16MB - 1 bytes;
//! larger outgoing payloads are split across frames, inbound continuation
//! frames are not reassembled.

pub mod framer;
pub mod packet;
pub mod prepared;
pub mod reader;
pub mod writer;

pub use framer::{HEADER_LEN, Session, decode_packet, encode_packet};
pub use packet::{EofPacket, ErrPacket, OkPacket, Packet};
pub use prepared::{
    StmtPrepareOk, build_stmt_close_payload, build_stmt_execute_payload,
    build_stmt_prepare_payload, decode_binary_row, parse_stmt_prepare_ok,
};
pub use reader::PacketReader;
pub use writer::PacketWriter;

use sqlwire_core::Error;
use sqlwire_core::error::ProtocolError;

/// Largest payload a single frame can carry (2^24 - 1 bytes).
pub const MAX_PACKET_SIZE: usize = 0xFF_FF_FF;

/// Capability bits this crate reads, plus the ones in the default set.
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PS_MULTI_RESULTS: u32 = 1 << 18;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    /// Result sets end with an OK packet and metadata blocks carry no EOF.
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;
    /// EXECUTE carries a parameter count and per-parameter names.
    pub const CLIENT_QUERY_ATTRIBUTES: u32 = 1 << 27;

    /// What a modern server negotiates with a protocol-41 client.
    pub const DEFAULT_CLIENT_FLAGS: u32 = CLIENT_PROTOCOL_41
        | CLIENT_SECURE_CONNECTION
        | CLIENT_LONG_PASSWORD
        | CLIENT_TRANSACTIONS
        | CLIENT_MULTI_RESULTS
        | CLIENT_PS_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH
        | CLIENT_DEPRECATE_EOF;
}

/// The negotiated capability bit-set.
///
/// Produced by the handshake (which lives outside this crate) and handed
/// unchanged to every encode and decode call. Commands only read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CapabilityFlags(u32);

impl CapabilityFlags {
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Every bit of `flag` is set.
    pub const fn contains(self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    #[must_use]
    pub const fn with(self, flag: u32) -> Self {
        Self(self.0 | flag)
    }

    #[must_use]
    pub const fn without(self, flag: u32) -> Self {
        Self(self.0 & !flag)
    }

    pub const fn deprecate_eof(self) -> bool {
        self.contains(capabilities::CLIENT_DEPRECATE_EOF)
    }

    pub const fn query_attributes(self) -> bool {
        self.contains(capabilities::CLIENT_QUERY_ATTRIBUTES)
    }
}

impl Default for CapabilityFlags {
    fn default() -> Self {
        Self(capabilities::DEFAULT_CLIENT_FLAGS)
    }
}

/// First payload byte of the requests this crate sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    StmtPrepare = 0x16,
    StmtExecute = 0x17,
    StmtClose = 0x19,
}

pub mod charset {
    /// The `binary` pseudo-charset: string-typed columns carrying raw bytes.
    pub const BINARY: u16 = 63;
}

pub(crate) fn protocol_error(msg: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: msg.into(),
        raw_data: None,
    })
}

pub(crate) fn protocol_error_with_data(msg: impl Into<String>, data: &[u8]) -> Error {
    Error::Protocol(ProtocolError {
        message: msg.into(),
        raw_data: Some(data.to_vec()),
    })
}
