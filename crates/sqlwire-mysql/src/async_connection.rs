//! Async MySQL connection over asupersync I/O.
//!
//! Same command driving as [`MySqlConnection`](crate::MySqlConnection), with
//! the stream polled through asupersync's `AsyncRead` / `AsyncWrite` and
//! results reported as [`Outcome`].

use std::pin::Pin;

use asupersync::io::{AsyncRead, AsyncWrite, ReadBuf};
use asupersync::{Cx, Outcome};
use sqlwire_core::{Error, Row, Value};

use crate::command::CommandHandler;
use crate::config::MySqlConfig;
use crate::connection::ConnectionState;
use crate::driver::{Driver, disconnected, not_ready};
use crate::query::{Completion, QueryCommand};

/// Prepared-statement connection polled through asupersync I/O.
pub struct MySqlAsyncConnection<S> {
    stream: S,
    driver: Driver,
    state: ConnectionState,
    last: Completion,
    chunk: Vec<u8>,
}

impl<S> std::fmt::Debug for MySqlAsyncConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlAsyncConnection")
            .field("state", &self.state)
            .field("capabilities", &self.driver.capabilities())
            .field("last", &self.last)
            .finish_non_exhaustive()
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> MySqlAsyncConnection<S> {
    /// Wrap a stream whose session has already been established.
    pub fn new(stream: S, config: MySqlConfig) -> Result<Self, Error> {
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

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// No command is active and the last one left the session usable.
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// The connection configuration.
    pub fn config(&self) -> &MySqlConfig {
        self.driver.config()
    }

    /// Completion counters of the last finished command.
    pub fn last_completion(&self) -> Completion {
        self.last
    }

    pub fn affected_rows(&self) -> u64 {
        self.last.affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.last.last_insert_id
    }

    pub fn warnings(&self) -> u16 {
        self.last.warnings
    }

    pub fn status_flags(&self) -> u16 {
        self.last.status_flags
    }

    /// Close the connection and return the stream.
    pub fn into_inner(mut self) -> S {
        self.state = ConnectionState::Closed;
        self.stream
    }

    /// Drive `command` to completion.
    pub async fn send_async(
        &mut self,
        _cx: &Cx,
        command: &mut dyn CommandHandler,
    ) -> Outcome<(), Error> {
        match self.state {
            ConnectionState::Ready => {}
            ConnectionState::Closed => return Outcome::Err(not_ready("Connection is closed")),
            state => {
                return Outcome::Err(not_ready(format!("Connection not ready ({state:?})")));
            }
        }

        self.state = ConnectionState::InQuery;
        let result = self.drive_async(command).await;
        self.state = ConnectionState::after(&result);

        if self.state == ConnectionState::Ready {
            if let Err(e) = self.finish_async(command).await {
                self.state = ConnectionState::Error;
                return Outcome::Err(e);
            }
        }

        match result {
            Ok(()) => Outcome::Ok(()),
            Err(e) => Outcome::Err(e),
        }
    }

    /// Execute a query and return all result rows.
    pub async fn query_async(
        &mut self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> Outcome<Vec<Row>, Error> {
        let mut rows = Vec::new();
        let outcome = self.query_with_async(cx, sql, params, |row| rows.push(row)).await;
        then(outcome, || rows)
    }

    /// Execute a query, handing each row to `on_row` as it arrives.
    pub async fn query_with_async<F: FnMut(Row)>(
        &mut self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
        on_row: F,
    ) -> Outcome<(), Error> {
        let mut command = QueryCommand::new(sql, params.to_vec(), on_row);
        let outcome = self.send_async(cx, &mut command).await;
        then(outcome, || {
            if let Some(completion) = command.completion() {
                self.last = completion;
            }
        })
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute_async(
        &mut self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> Outcome<u64, Error> {
        let outcome = self.query_with_async(cx, sql, params, |_| {}).await;
        then(outcome, || self.last.affected_rows)
    }

    async fn drive_async(&mut self, command: &mut dyn CommandHandler) -> Result<(), Error> {
        self.driver.begin(command)?;
        loop {
            self.flush_async().await?;
            self.fill_async().await?;
            if self.driver.process(command)? {
                return Ok(());
            }
        }
    }

    async fn finish_async(&mut self, command: &dyn CommandHandler) -> Result<(), Error> {
        self.driver.complete(command)?;
        self.flush_async().await
    }

    async fn fill_async(&mut self) -> Result<(), Error> {
        let stream = &mut self.stream;
        let mut read_buf = ReadBuf::new(&mut self.chunk);
        match std::future::poll_fn(|cx| Pin::new(&mut *stream).poll_read(cx, &mut read_buf)).await {
            Ok(()) => {
                let filled = read_buf.filled();
                if filled.is_empty() {
                    return Err(disconnected(
                        "Connection closed while a command was active",
                        None,
                    ));
                }
                self.driver.feed(filled);
                Ok(())
            }
            Err(e) => Err(disconnected(format!("Failed to read from stream: {e}"), Some(e))),
        }
    }

    async fn flush_async(&mut self) -> Result<(), Error> {
        if !self.driver.has_outgoing() {
            return Ok(());
        }
        let outgoing = self.driver.take_outgoing();
        let stream = &mut self.stream;

        let mut pending = &outgoing[..];
        while !pending.is_empty() {
            let n = std::future::poll_fn(|cx| Pin::new(&mut *stream).poll_write(cx, pending))
                .await
                .map_err(|e| disconnected(format!("Failed to write packet: {e}"), Some(e)))?;
            if n == 0 {
                return Err(disconnected("Connection closed while writing packet", None));
            }
            pending = &pending[n..];
        }

        std::future::poll_fn(|cx| Pin::new(&mut *stream).poll_flush(cx))
            .await
            .map_err(|e| disconnected(format!("Failed to flush stream: {e}"), Some(e)))
    }
}

/// Run `on_ok` only if the command succeeded; errors, cancellation and
/// panics pass through unchanged.
fn then<T>(outcome: Outcome<(), Error>, on_ok: impl FnOnce() -> T) -> Outcome<T, Error> {
    match outcome {
        Outcome::Ok(()) => Outcome::Ok(on_ok()),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}
