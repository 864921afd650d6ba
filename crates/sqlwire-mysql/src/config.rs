//! MySQL connection configuration.
//!
//! Holds the negotiated capability flags and the buffer limits the
//! connection front-ends apply while driving commands. Establishing the
//! session (handshake, authentication, TLS) happens before a connection is
//! wrapped, so none of that is configured here.

use sqlwire_core::Error;
use sqlwire_core::error::ConfigError;

use crate::protocol::CapabilityFlags;

/// Smallest `max_allowed_packet` a MySQL server accepts.
const MIN_MAX_PACKET_SIZE: usize = 1024;

/// MySQL connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MySqlConfig {
    /// Capability flags negotiated during the handshake
    pub capabilities: CapabilityFlags,
    /// Transport read chunk size and initial read buffer capacity (default: 8KB)
    pub read_buffer_size: usize,
    /// Server's max allowed packet size (default: 64MB)
    pub max_packet_size: usize,
    /// Close prepared statements once their query finishes (default: true)
    pub close_statements: bool,
}

impl Default for MySqlConfig {
    fn default() -> Self {
        Self {
            capabilities: CapabilityFlags::default(),
            read_buffer_size: 8 * 1024,
            max_packet_size: 64 * 1024 * 1024, // 64MB
            close_statements: true,
        }
    }
}

impl MySqlConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the negotiated capability flags.
    pub fn capabilities(mut self, capabilities: CapabilityFlags) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the transport read chunk size.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the max allowed packet size.
    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Enable or disable COM_STMT_CLOSE after each query.
    pub fn close_statements(mut self, enabled: bool) -> Self {
        self.close_statements = enabled;
        self
    }

    /// Check the configuration for values no connection can work with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.read_buffer_size == 0 {
            return Err(config_error("read_buffer_size must be greater than zero"));
        }
        if self.max_packet_size < MIN_MAX_PACKET_SIZE {
            return Err(config_error(format!(
                "max_packet_size must be at least {MIN_MAX_PACKET_SIZE} bytes, got {}",
                self.max_packet_size
            )));
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> Error {
    Error::Config(ConfigError {
        message: message.into(),
        source: None,
    })
}
