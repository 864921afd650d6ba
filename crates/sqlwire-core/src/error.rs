//! Error types for sqlwire operations.
//!
//! Failures fall into four groups that callers handle differently:
//! the server refused a request (`Query`), the server sent something we
//! cannot decode (`Protocol`), our own command bookkeeping went wrong
//! (`Violation`), or the transport failed (`Connection`, `Io`). Only the
//! first leaves the connection usable.

use std::fmt;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// The primary error type for all sqlwire operations.
#[derive(Debug)]
pub enum Error {
    /// Transport closed or connection unusable
    Connection(ConnectionError),
    /// Decoded ERR packet
    Query(QueryError),
    /// A value could not be converted to the requested Rust type
    Type(TypeError),
    /// A framed payload that does not decode as expected
    Protocol(ProtocolError),
    /// Local command bookkeeping is broken
    Violation(ViolationError),
    /// Rejected configuration
    Config(ConfigError),
    Io(std::io::Error),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<BoxedSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// The peer went away mid-exchange
    Disconnected,
    /// A previous failure left the connection unable to accept commands
    NotReady,
}

/// A server-reported error.
#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    /// Server error code (e.g. 1064 for a syntax error)
    pub code: Option<u16>,
    pub sql: Option<String>,
    pub sqlstate: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    Syntax,
    /// Unique or foreign key constraint
    Constraint,
    /// Unknown table or column
    NotFound,
    Permission,
    Deadlock,
    /// Lock wait timeout
    Timeout,
    /// Anything else the server reports
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    /// The offending payload, when it is small enough to be useful
    pub raw_data: Option<Vec<u8>>,
}

/// A defect in the client's own protocol bookkeeping.
///
/// Raised when a command is driven out of contract (for example a packet
/// handed to a finished command) or when a field the state machine relies
/// on cannot be read. Retrying would replay the same broken exchange, so
/// these are never retryable and leave the connection unusable.
#[derive(Debug)]
pub struct ViolationError {
    pub message: String,
    /// Command state at the time of the violation, if known
    pub state: Option<String>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<BoxedSource>,
}

impl Error {
    /// Deadlocks and lock wait timeouts succeed when replayed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Query(QueryError {
                kind: QueryErrorKind::Deadlock | QueryErrorKind::Timeout,
                ..
            })
        )
    }

    /// True when the connection must be discarded.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Protocol(_) | Error::Violation(_) | Error::Io(_)
        )
    }

    /// Did the server reject the request?
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Query(_))
    }

    pub fn is_violation(&self) -> bool {
        matches!(self, Error::Violation(_))
    }

    fn query(&self) -> Option<&QueryError> {
        match self {
            Error::Query(q) => Some(q),
            _ => None,
        }
    }

    /// SQLSTATE of a server error (e.g. "23000" for a duplicate key)
    pub fn sqlstate(&self) -> Option<&str> {
        self.query().and_then(|q| q.sqlstate.as_deref())
    }

    pub fn server_code(&self) -> Option<u16> {
        self.query().and_then(|q| q.code)
    }

    /// The statement text the server refused.
    pub fn sql(&self) -> Option<&str> {
        self.query().and_then(|q| q.sql.as_deref())
    }
}

impl QueryError {
    /// Classify a server error code.
    pub fn kind_for_code(code: u16) -> QueryErrorKind {
        match code {
            // ER_DUP_ENTRY, ER_ROW_IS_REFERENCED_2, ER_NO_REFERENCED_ROW_2
            1062 | 1451 | 1452 => QueryErrorKind::Constraint,
            // ER_PARSE_ERROR
            1064 => QueryErrorKind::Syntax,
            // ER_BAD_FIELD_ERROR, ER_NO_SUCH_TABLE
            1054 | 1146 => QueryErrorKind::NotFound,
            // ER_DBACCESS_DENIED_ERROR, ER_ACCESS_DENIED_ERROR, ER_TABLEACCESS_DENIED_ERROR
            1044 | 1045 | 1142 => QueryErrorKind::Permission,
            // ER_LOCK_DEADLOCK
            1213 => QueryErrorKind::Deadlock,
            // ER_LOCK_WAIT_TIMEOUT
            1205 => QueryErrorKind::Timeout,
            _ => QueryErrorKind::Database,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {e}"),
            Error::Query(e) => {
                f.write_str("Server error")?;
                if let Some(code) = e.code {
                    write!(f, " {code}")?;
                }
                if let Some(state) = &e.sqlstate {
                    write!(f, " (SQLSTATE {state})")?;
                }
                write!(f, ": {}", e.message)
            }
            Error::Type(e) => write!(f, "Type error: {e}"),
            Error::Protocol(e) => write!(f, "Protocol error: {e}"),
            Error::Violation(e) => match &e.state {
                Some(state) => write!(f, "Protocol violation in state {state}: {}", e.message),
                None => write!(f, "Protocol violation: {}", e.message),
            },
            Error::Config(e) => write!(f, "Configuration error: {e}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let boxed = match self {
            Error::Io(e) => return Some(e),
            Error::Connection(e) => e.source.as_ref(),
            Error::Config(e) => e.source.as_ref(),
            _ => None,
        };
        boxed.map(|err| &**err as &(dyn std::error::Error + 'static))
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sqlstate {
            Some(state) => write!(f, "{} (SQLSTATE {state})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}", self.expected)?;
        if let Some(col) = &self.column {
            write!(f, " for column '{col}'")?;
        }
        write!(f, ", found {}", self.actual)
    }
}

macro_rules! message_display {
    ($($ty:ty),* $(,)?) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.message)
            }
        }
    )*};
}

message_display!(ConnectionError, ProtocolError, ViolationError, ConfigError);

macro_rules! into_error {
    ($($variant:ident($ty:ty)),* $(,)?) => {$(
        impl From<$ty> for Error {
            fn from(err: $ty) -> Self {
                Error::$variant(err)
            }
        }
    )*};
}

into_error!(
    Io(std::io::Error),
    Connection(ConnectionError),
    Query(QueryError),
    Type(TypeError),
    Protocol(ProtocolError),
    Violation(ViolationError),
    Config(ConfigError),
);

/// Result type alias for sqlwire operations.
pub type Result<T> = std::result::Result<T, Error>;
