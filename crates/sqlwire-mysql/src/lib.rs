//! MySQL prepared-statement client for the binary wire protocol.
//!
//! This crate drives prepared statements over an already established MySQL
//! session. It provides:
//!
//! - Packet framing with sequence numbers
//! - The command driver contract every wire command implements
//! - The PREPARE / EXECUTE query command as an explicit state machine
//! - Binary protocol parameter encoding and row decoding
//! - Blocking and asupersync-based connection front-ends
//!
//! # MySQL Protocol Overview
//!
//! MySQL uses a packet-based protocol with:
//! - 3-byte payload length + 1-byte sequence number header
//! - Packets over 16MB are split
//! - Request/response pairing via sequence numbers
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlwire_core::Value;
//! use sqlwire_mysql::{MySqlConfig, MySqlConnection};
//!
//! // `stream` is a TCP stream that already completed the handshake.
//! let mut conn = MySqlConnection::new(stream, MySqlConfig::new())?;
//!
//! let rows = conn.query("SELECT id, name FROM users WHERE id > ?", &[Value::Int(10)])?;
//! for row in &rows {
//!     let name: String = row.get_named("name")?;
//!     println!("{name}");
//! }
//! ```

pub mod async_connection;
pub mod command;
pub mod config;
pub mod connection;
pub mod driver;
pub mod protocol;
pub mod query;
pub mod types;

pub use async_connection::MySqlAsyncConnection;
pub use command::{CommandHandler, CommandState};
pub use config::MySqlConfig;
pub use connection::{ConnectionState, MySqlConnection};
pub use driver::Driver;
pub use protocol::{CapabilityFlags, Packet, Session};
pub use query::{Completion, QueryCommand, QueryState};
pub use types::{ColumnDef, FieldType};
