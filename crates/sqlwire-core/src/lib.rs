//! Core types shared by the sqlwire drivers.
//!
//! - `Value` for bound parameters and decoded column values
//! - `Row` and `ColumnInfo` for result rows
//! - `Error` with server, protocol and violation classification
//! - `Outcome` and `Cx` re-exported from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod error;
pub mod row;
pub mod value;

pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, ProtocolError, QueryError,
    QueryErrorKind, Result, TypeError, ViolationError,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;
