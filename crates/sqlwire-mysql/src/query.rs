//! Prepared-statement query command.
//!
//! [`QueryCommand`] drives one PREPARE / EXECUTE exchange:
//!
//! ```text
//! Ready ──PREPARE-OK──> Params ──> Columns ──> ExecuteColumnCount
//!   │                     │                        │        │
//!   └─────────────────────┴────────────────────────┘        │ OK
//!                                                           v
//!                 Done <──end marker── Rows <── ExecuteColumns
//! ```
//!
//! States with a zero count are skipped. An ERR packet in any state ends
//! the command with the decoded server error.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use sqlwire_core::error::ViolationError;
use sqlwire_core::{ColumnInfo, Error, Result, Row, Value};

use crate::command::{CommandHandler, CommandState};
use crate::protocol::{
    CapabilityFlags, Packet, PacketReader, build_stmt_close_payload, build_stmt_execute_payload,
    build_stmt_prepare_payload, decode_binary_row, parse_stmt_prepare_ok,
    prepared::CURSOR_TYPE_NO_CURSOR,
};
use crate::types::{ColumnDef, parse_column_def};

/// Where a [`QueryCommand`] is in the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// PREPARE sent, awaiting PREPARE-OK.
    Ready,
    /// Awaiting parameter definitions.
    Params { num_params: u16, num_columns: u16 },
    /// Awaiting result column definitions.
    Columns { num_columns: u16 },
    /// EXECUTE sent, awaiting its column count (or OK).
    ExecuteColumnCount,
    /// Skipping the EXECUTE response's column definitions.
    ExecuteColumns { remaining: u64 },
    /// Streaming binary rows until the end marker.
    Rows,
    /// Finished; no further packets may be handled.
    Done,
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::Params { .. } => write!(f, "Params"),
            Self::Columns { .. } => write!(f, "Columns"),
            Self::ExecuteColumnCount => write!(f, "ExecuteColumnCount"),
            Self::ExecuteColumns { .. } => write!(f, "ExecuteColumns"),
            Self::Rows => write!(f, "Rows"),
            Self::Done => write!(f, "Done"),
        }
    }
}

/// Server summary of a finished statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Completion {
    /// Rows changed by the statement (0 for result sets)
    pub affected_rows: u64,
    /// AUTO_INCREMENT id generated by the statement
    pub last_insert_id: u64,
    /// Server status flags
    pub status_flags: u16,
    /// Number of warnings
    pub warnings: u16,
}

/// A prepared-statement query.
///
/// Rows are handed to `on_row` one at a time, in arrival order, from inside
/// [`CommandHandler::handle`]. A slow sink stalls the connection.
pub struct QueryCommand<F> {
    sql: String,
    params: Vec<Value>,
    state: QueryState,
    statement_id: Option<u32>,
    param_defs: Vec<ColumnDef>,
    column_defs: Vec<ColumnDef>,
    columns: Option<Arc<ColumnInfo>>,
    on_row: F,
    rows_emitted: u64,
    completion: Option<Completion>,
    /// A classic EOF terminating a metadata block is still to come.
    pending_eof: bool,
    activated: bool,
}

impl<F> fmt::Debug for QueryCommand<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCommand")
            .field("sql", &self.sql)
            .field("state", &self.state)
            .field("statement_id", &self.statement_id)
            .field("rows_emitted", &self.rows_emitted)
            .finish_non_exhaustive()
    }
}

impl<F: FnMut(Row)> QueryCommand<F> {
    /// Create a query for `sql` bound to `params` in placeholder order.
    pub fn new(sql: impl Into<String>, params: Vec<Value>, on_row: F) -> Self {
        Self {
            sql: sql.into(),
            params,
            state: QueryState::Ready,
            statement_id: None,
            param_defs: Vec::new(),
            column_defs: Vec::new(),
            columns: None,
            on_row,
            rows_emitted: 0,
            completion: None,
            pending_eof: false,
            activated: false,
        }
    }

    /// The SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Current state.
    pub fn state(&self) -> QueryState {
        self.state
    }

    /// Statement id assigned by the server, once PREPARE succeeded.
    pub fn statement_id(&self) -> Option<u32> {
        self.statement_id
    }

    /// Parameter definitions received so far.
    pub fn param_defs(&self) -> &[ColumnDef] {
        &self.param_defs
    }

    /// Result column definitions received so far.
    pub fn column_defs(&self) -> &[ColumnDef] {
        &self.column_defs
    }

    /// Number of rows handed to the sink.
    pub fn rows_emitted(&self) -> u64 {
        self.rows_emitted
    }

    /// Server summary, once the command finished successfully.
    pub fn completion(&self) -> Option<Completion> {
        self.completion
    }

    fn violation(&self, message: &str) -> Error {
        tracing::error!(
            state = %self.state,
            sql = %self.sql,
            reason = message,
            "query command protocol violation"
        );
        Error::Violation(ViolationError {
            message: message.to_string(),
            state: Some(self.state.to_string()),
        })
    }

    fn finish(&mut self, completion: Completion) -> CommandState {
        tracing::debug!(
            statement_id = ?self.statement_id,
            rows = self.rows_emitted,
            affected_rows = completion.affected_rows,
            warnings = completion.warnings,
            "query command complete"
        );
        self.completion = Some(completion);
        self.state = QueryState::Done;
        CommandState::Done
    }

    fn after_metadata(&mut self, next: QueryState, capabilities: CapabilityFlags) {
        self.pending_eof = !capabilities.deprecate_eof();
        self.state = next;
        if next == QueryState::Rows {
            tracing::debug!(statement_id = ?self.statement_id, "streaming rows");
        }
    }

    fn step(&mut self, packet: Packet, capabilities: CapabilityFlags) -> Result<CommandState> {
        if self.state == QueryState::Done {
            return Err(self.violation("packet after completion"));
        }

        tracing::trace!(state = %self.state, len = packet.len(), "query command packet");

        if packet.is_error() {
            self.state = QueryState::Done;
            return Err(packet.server_error(Some(&self.sql)));
        }

        if self.pending_eof && packet.is_eof() {
            self.pending_eof = false;
            return Ok(CommandState::NoResponse);
        }

        match self.state {
            QueryState::Ready => self.handle_prepare_ok(&packet, capabilities),
            QueryState::Params {
                num_params,
                num_columns,
            } => {
                self.param_defs.push(parse_column_def(packet.payload())?);
                if self.param_defs.len() >= usize::from(num_params) {
                    let next = if num_columns > 0 {
                        QueryState::Columns { num_columns }
                    } else {
                        QueryState::ExecuteColumnCount
                    };
                    self.after_metadata(next, capabilities);
                }
                Ok(CommandState::NoResponse)
            }
            QueryState::Columns { num_columns } => {
                self.column_defs.push(parse_column_def(packet.payload())?);
                if self.column_defs.len() >= usize::from(num_columns) {
                    self.after_metadata(QueryState::ExecuteColumnCount, capabilities);
                }
                Ok(CommandState::NoResponse)
            }
            QueryState::ExecuteColumnCount => self.handle_execute_response(&packet),
            QueryState::ExecuteColumns { remaining } => {
                let remaining = remaining - 1;
                if remaining == 0 {
                    self.after_metadata(QueryState::Rows, capabilities);
                } else {
                    self.state = QueryState::ExecuteColumns { remaining };
                }
                Ok(CommandState::NoResponse)
            }
            QueryState::Rows => self.handle_row(&packet, capabilities),
            QueryState::Done => Err(self.violation("packet after completion")),
        }
    }

    fn handle_prepare_ok(
        &mut self,
        packet: &Packet,
        capabilities: CapabilityFlags,
    ) -> Result<CommandState> {
        let ok = parse_stmt_prepare_ok(packet.payload())?;
        tracing::debug!(
            statement_id = ok.statement_id,
            num_params = ok.num_params,
            num_columns = ok.num_columns,
            warnings = ok.warnings,
            "statement prepared"
        );

        self.statement_id = Some(ok.statement_id);
        self.param_defs.clear();
        self.column_defs.clear();
        self.columns = None;

        self.state = if ok.num_params > 0 {
            QueryState::Params {
                num_params: ok.num_params,
                num_columns: ok.num_columns,
            }
        } else if ok.num_columns > 0 {
            QueryState::Columns {
                num_columns: ok.num_columns,
            }
        } else {
            QueryState::ExecuteColumnCount
        };

        let execute = build_stmt_execute_payload(
            ok.statement_id,
            CURSOR_TYPE_NO_CURSOR,
            &self.params,
            capabilities,
        );
        Ok(CommandState::Reset(vec![execute]))
    }

    fn handle_execute_response(&mut self, packet: &Packet) -> Result<CommandState> {
        if packet.is_ok() {
            let ok = packet.parse_ok()?;
            return Ok(self.finish(Completion {
                affected_rows: ok.affected_rows,
                last_insert_id: ok.last_insert_id,
                status_flags: ok.status_flags,
                warnings: ok.warnings,
            }));
        }

        let mut reader = PacketReader::new(packet.payload());
        let Some(count) = reader.read_lenenc_int().filter(|&count| count > 0) else {
            return Err(self.violation("unreadable execute column count"));
        };

        if count != self.column_defs.len() as u64 {
            tracing::warn!(
                execute_columns = count,
                prepared_columns = self.column_defs.len(),
                "execute column count differs from prepared columns"
            );
        }

        self.state = QueryState::ExecuteColumns { remaining: count };
        Ok(CommandState::NoResponse)
    }

    fn handle_row(&mut self, packet: &Packet, capabilities: CapabilityFlags) -> Result<CommandState> {
        if packet.is_end_marker(capabilities) {
            let completion = if capabilities.deprecate_eof() {
                let ok = packet.parse_ok()?;
                Completion {
                    affected_rows: ok.affected_rows,
                    last_insert_id: ok.last_insert_id,
                    status_flags: ok.status_flags,
                    warnings: ok.warnings,
                }
            } else {
                let eof = packet.parse_eof()?;
                Completion {
                    status_flags: eof.status_flags,
                    warnings: eof.warnings,
                    ..Completion::default()
                }
            };
            return Ok(self.finish(completion));
        }

        let values = decode_binary_row(packet.payload(), &self.column_defs)?;
        let column_defs = &self.column_defs;
        let columns = self
            .columns
            .get_or_insert_with(|| Arc::new(column_defs.iter().map(|col| col.name.clone()).collect()))
            .clone();
        (self.on_row)(Row::with_columns(columns, values));
        self.rows_emitted += 1;
        Ok(CommandState::NoResponse)
    }
}

impl<F: FnMut(Row)> CommandHandler for QueryCommand<F> {
    fn activate(&mut self, _capabilities: CapabilityFlags) -> Result<CommandState> {
        if self.activated {
            return Err(self.violation("command activated twice"));
        }
        self.activated = true;
        Ok(CommandState::Response(vec![build_stmt_prepare_payload(
            &self.sql,
        )]))
    }

    fn handle(&mut self, packet: Packet, capabilities: CapabilityFlags) -> Result<CommandState> {
        let result = self.step(packet, capabilities);
        if result.is_err() {
            self.state = QueryState::Done;
        }
        result
    }

    fn cleanup(&self) -> Option<Bytes> {
        self.statement_id.map(build_stmt_close_payload)
    }
}
