//! Transport-independent command driving.
//!
//! [`Driver`] sits between a byte transport and the active command. The
//! transport pushes whatever bytes it read with [`Driver::feed`], calls
//! [`Driver::process`] to run every complete frame through the command, and
//! writes out [`Driver::take_outgoing`]. The blocking and async connections
//! are thin loops around this.

use bytes::{Bytes, BytesMut};
use sqlwire_core::error::{ConnectionError, ConnectionErrorKind};
use sqlwire_core::{Error, Result};

use crate::command::{CommandHandler, CommandState};
use crate::config::MySqlConfig;
use crate::protocol::{CapabilityFlags, Session, decode_packet, encode_packet, protocol_error};

/// Framing buffers and sequence state for one connection.
#[derive(Debug)]
pub struct Driver {
    config: MySqlConfig,
    session: Session,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl Driver {
    /// Create a driver for a freshly established session.
    pub fn new(config: MySqlConfig) -> Self {
        let read_buf = BytesMut::with_capacity(config.read_buffer_size);
        Self {
            config,
            session: Session::new(),
            read_buf,
            write_buf: BytesMut::new(),
        }
    }

    /// The connection configuration.
    pub fn config(&self) -> &MySqlConfig {
        &self.config
    }

    /// The negotiated capability flags.
    pub fn capabilities(&self) -> CapabilityFlags {
        self.config.capabilities
    }

    /// Current sequence state.
    pub fn session(&self) -> Session {
        self.session
    }

    /// Bytes received but not yet framed.
    pub fn buffered(&self) -> usize {
        self.read_buf.len()
    }

    /// Make `command` the active command and queue its first request.
    pub fn begin(&mut self, command: &mut dyn CommandHandler) -> Result<()> {
        self.session.reset();
        let state = command.activate(self.config.capabilities)?;
        self.apply(state)?;
        Ok(())
    }

    /// Append bytes read from the transport.
    pub fn feed(&mut self, data: &[u8]) {
        self.read_buf.extend_from_slice(data);
    }

    /// Run every complete buffered frame through `command`.
    ///
    /// Returns `true` once the command reports it is done. Frames after the
    /// finishing one stay buffered.
    pub fn process(&mut self, command: &mut dyn CommandHandler) -> Result<bool> {
        let capabilities = self.config.capabilities;
        while let Some(packet) = decode_packet(&mut self.read_buf, &mut self.session) {
            let state = command.handle(packet, capabilities)?;
            if self.apply(state)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether framed bytes are waiting to be written.
    pub fn has_outgoing(&self) -> bool {
        !self.write_buf.is_empty()
    }

    /// Take all framed bytes waiting to be written.
    pub fn take_outgoing(&mut self) -> Bytes {
        self.write_buf.split().freeze()
    }

    /// Detach a finished command.
    ///
    /// Queues the command's cleanup request when statements are closed
    /// eagerly, and drops anything the server sent past the command's end.
    pub fn complete(&mut self, command: &dyn CommandHandler) -> Result<()> {
        if self.config.close_statements {
            if let Some(payload) = command.cleanup() {
                self.session.reset();
                self.enqueue(&[payload])?;
            }
        }

        if !self.read_buf.is_empty() {
            tracing::warn!(
                buffered = self.read_buf.len(),
                "discarding bytes received after command completion"
            );
            self.read_buf.clear();
        }
        Ok(())
    }

    fn apply(&mut self, state: CommandState) -> Result<bool> {
        match state {
            CommandState::NoResponse => Ok(false),
            CommandState::Response(payloads) => {
                self.enqueue(&payloads)?;
                Ok(false)
            }
            CommandState::Reset(payloads) => {
                self.session.reset();
                self.enqueue(&payloads)?;
                Ok(false)
            }
            CommandState::Done => Ok(true),
        }
    }

    fn enqueue(&mut self, payloads: &[Bytes]) -> Result<()> {
        for payload in payloads {
            if payload.len() > self.config.max_packet_size {
                return Err(protocol_error(format!(
                    "Outgoing packet of {} bytes exceeds max_packet_size of {} bytes",
                    payload.len(),
                    self.config.max_packet_size
                )));
            }
            encode_packet(payload, &mut self.session, &mut self.write_buf);
        }
        Ok(())
    }
}

pub(crate) fn disconnected(message: impl Into<String>, source: Option<std::io::Error>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Disconnected,
        message: message.into(),
        source: source.map(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
    })
}

pub(crate) fn not_ready(message: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::NotReady,
        message: message.into(),
        source: None,
    })
}
