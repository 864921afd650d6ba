//! The contract between a connection and the wire command it is driving.
//!
//! A connection owns at most one active command. It calls
//! [`CommandHandler::activate`] once, transmits what that returns, then feeds
//! every inbound packet to [`CommandHandler::handle`] in arrival order until
//! the command reports [`CommandState::Done`].
//!
//! Commands are not synchronized. Driving one instance from two places at
//! once is undefined behavior at the protocol level.

use bytes::Bytes;
use sqlwire_core::Result;

use crate::protocol::{CapabilityFlags, Packet};

/// What the connection should do after a command step.
///
/// Outgoing entries are unframed payloads; the connection's encoder assigns
/// their sequence ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandState {
    /// Nothing to send; wait for the next packet.
    NoResponse,
    /// Send these payloads as part of the current exchange.
    Response(Vec<Bytes>),
    /// Send these payloads as a new request.
    ///
    /// The command has discarded the metadata it accumulated so far and the
    /// connection restarts sequence numbering before encoding.
    Reset(Vec<Bytes>),
    /// The command is finished and must be detached.
    Done,
}

impl CommandState {
    /// Whether the command has finished.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Payloads to transmit, if any.
    pub fn outgoing(&self) -> &[Bytes] {
        match self {
            Self::Response(payloads) | Self::Reset(payloads) => payloads,
            Self::NoResponse | Self::Done => &[],
        }
    }
}

/// A wire command driven by a connection.
pub trait CommandHandler {
    /// Called once when the command becomes the connection's active command.
    ///
    /// Returns the first payload(s) to transmit.
    fn activate(&mut self, capabilities: CapabilityFlags) -> Result<CommandState>;

    /// Called once per inbound packet while the command is active.
    ///
    /// An ERR packet fails the command with the decoded server error. An
    /// `Err` return of any kind leaves the command finished.
    fn handle(&mut self, packet: Packet, capabilities: CapabilityFlags) -> Result<CommandState>;

    /// A request to send after the command finished, for which the server
    /// sends no reply.
    fn cleanup(&self) -> Option<Bytes> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_state_outgoing() {
        let payload = Bytes::from_static(&[0x19, 1, 0, 0, 0]);
        assert_eq!(
            CommandState::Response(vec![payload.clone()]).outgoing(),
            &[payload.clone()]
        );
        assert_eq!(CommandState::Reset(vec![payload.clone()]).outgoing(), &[payload]);
        assert!(CommandState::NoResponse.outgoing().is_empty());
        assert!(CommandState::Done.outgoing().is_empty());
        assert!(CommandState::Done.is_done());
        assert!(!CommandState::NoResponse.is_done());
    }
}
