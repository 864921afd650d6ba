//! Blocking MySQL connection.
//!
//! Wraps an already authenticated byte stream and drives prepared-statement
//! queries over it, one command at a time.

use std::io::{ErrorKind, Read, Write};

use sqlwire_core::{Error, Result, Row, Value};

use crate::command::CommandHandler;
use crate::config::MySqlConfig;
use crate::driver::{Driver, disconnected, not_ready};
use crate::query::{Completion, QueryCommand};

/// Connection state in the MySQL protocol state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Ready for queries
    Ready,
    /// Currently executing a query
    InQuery,
    /// Connection is in an error state
    Error,
    /// Connection has been closed
    Closed,
}

impl ConnectionState {
    /// State to settle in after a command finished with `result`.
    ///
    /// A server error leaves the session usable; anything else that failed
    /// leaves the stream at an unknown position.
    pub(crate) fn after<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Ready,
            Err(e) if e.is_server_error() => Self::Ready,
            Err(_) => Self::Error,
        }
    }
}

/// MySQL connection over a blocking stream.
pub struct MySqlConnection<S> {
    stream: S,
    driver: Driver,
    state: ConnectionState,
    last: Completion,
    chunk: Vec<u8>,
}

impl<S> std::fmt::Debug for MySqlConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConnection")
            .field("state", &self.state)
            .field("capabilities", &self.driver.capabilities())
            .field("last", &self.last)
            .finish_non_exhaustive()
    }
}

impl<S: Read + Write> MySqlConnection<S> {
    /// Wrap a stream whose session has already been established.
    pub fn new(stream: S, config: MySqlConfig) -> Result<Self> {
        config.validate()?;
        let chunk = vec![0u8; config.read_buffer_size];
        Ok(Self {
            stream,
            driver: Driver::new(config),
            state: ConnectionState::Ready,
            last: Completion::default(),
            chunk,
        })
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if the connection is ready for queries.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, ConnectionState::Ready)
    }

    /// The connection configuration.
    pub fn config(&self) -> &MySqlConfig {
        self.driver.config()
    }

    /// Get the affected rows from the last statement.
    pub fn affected_rows(&self) -> u64 {
        self.last.affected_rows
    }

    /// Get the last insert ID.
    pub fn last_insert_id(&self) -> u64 {
        self.last.last_insert_id
    }

    /// Get the warning count from the last statement.
    pub fn warnings(&self) -> u16 {
        self.last.warnings
    }

    /// Get the server status flags from the last statement.
    pub fn status_flags(&self) -> u16 {
        self.last.status_flags
    }

    /// The underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Close the connection and return the stream.
    pub fn into_inner(mut self) -> S {
        self.state = ConnectionState::Closed;
        self.stream
    }

    /// Drive `command` to completion.
    pub fn send(&mut self, command: &mut dyn CommandHandler) -> Result<()> {
        match self.state {
            ConnectionState::Ready => {}
            ConnectionState::Closed => return Err(not_ready("Connection is closed")),
            state => return Err(not_ready(format!("Connection not ready ({state:?})"))),
        }

        self.state = ConnectionState::InQuery;
        let result = self.drive(command);
        self.state = ConnectionState::after(&result);

        if self.state == ConnectionState::Ready {
            if let Err(e) = self.finish(command) {
                self.state = ConnectionState::Error;
                return Err(e);
            }
        }
        result
    }

    /// Execute a query and return all result rows.
    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        self.query_with(sql, params, |row| rows.push(row))?;
        Ok(rows)
    }

    /// Execute a query, handing each row to `on_row` as it arrives.
    pub fn query_with<F: FnMut(Row)>(&mut self, sql: &str, params: &[Value], on_row: F) -> Result<()> {
        let mut command = QueryCommand::new(sql, params.to_vec(), on_row);
        self.send(&mut command)?;
        if let Some(completion) = command.completion() {
            self.last = completion;
        }
        Ok(())
    }

    /// Execute a statement and return the number of affected rows.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.query_with(sql, params, |_| {})?;
        Ok(self.last.affected_rows)
    }

    fn drive(&mut self, command: &mut dyn CommandHandler) -> Result<()> {
        self.driver.begin(command)?;
        loop {
            self.flush()?;
            self.fill()?;
            if self.driver.process(command)? {
                return Ok(());
            }
        }
    }

    fn finish(&mut self, command: &dyn CommandHandler) -> Result<()> {
        self.driver.complete(command)?;
        self.flush()
    }

    fn fill(&mut self) -> Result<()> {
        loop {
            match self.stream.read(&mut self.chunk) {
                Ok(0) => {
                    return Err(disconnected(
                        "Connection closed while a command was active",
                        None,
                    ));
                }
                Ok(n) => {
                    self.driver.feed(&self.chunk[..n]);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    return Err(disconnected(format!("Failed to read from stream: {}", e), Some(e)));
                }
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        if !self.driver.has_outgoing() {
            return Ok(());
        }
        let outgoing = self.driver.take_outgoing();
        self.stream
            .write_all(&outgoing)
            .map_err(|e| disconnected(format!("Failed to write packet: {}", e), Some(e)))?;
        self.stream
            .flush()
            .map_err(|e| disconnected(format!("Failed to flush stream: {}", e), Some(e)))?;
        Ok(())
    }
}
