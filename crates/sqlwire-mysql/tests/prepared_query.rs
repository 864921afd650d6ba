//! End-to-end prepared-statement exchanges against a scripted server.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use bytes::BytesMut;
use sqlwire_core::error::{ConnectionErrorKind, QueryErrorKind};
use sqlwire_core::{Error, Value};
use sqlwire_mysql::protocol::{
    PacketWriter, Session, build_stmt_close_payload, build_stmt_execute_payload,
    build_stmt_prepare_payload, capabilities, decode_packet, prepared::CURSOR_TYPE_NO_CURSOR,
};
use sqlwire_mysql::{CapabilityFlags, ConnectionState, FieldType, MySqlConfig, MySqlConnection};

/// Replays one canned response per PREPARE the client sends, `chunk` bytes
/// per read, and records everything the client writes.
struct ScriptedServer {
    responses: VecDeque<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
    chunk: usize,
    written: Vec<u8>,
}

impl ScriptedServer {
    fn new(chunk: usize, responses: Vec<Vec<u8>>) -> Self {
        Self {
            responses: responses.into(),
            pending: Vec::new(),
            pos: 0,
            chunk,
            written: Vec::new(),
        }
    }

    /// Client frames written so far, as (sequence id, payload).
    fn requests(&self) -> Vec<(u8, Vec<u8>)> {
        let mut buf = BytesMut::from(&self.written[..]);
        let mut session = Session::new();
        std::iter::from_fn(|| decode_packet(&mut buf, &mut session))
            .map(|p| (p.sequence_id(), p.payload().to_vec()))
            .collect()
    }
}

impl Read for ScriptedServer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = (self.pending.len() - self.pos).min(self.chunk).min(buf.len());
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for ScriptedServer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let start = self.written.len();
        self.written.extend_from_slice(buf);

        let mut frames = BytesMut::from(&self.written[start..]);
        let mut session = Session::new();
        while let Some(packet) = decode_packet(&mut frames, &mut session) {
            if packet.payload().first() == Some(&0x16) {
                if let Some(response) = self.responses.pop_front() {
                    self.pending = response;
                    self.pos = 0;
                }
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Builds server frames with consecutive sequence ids.
struct Response {
    bytes: Vec<u8>,
    seq: u8,
}

impl Response {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            seq: 1,
        }
    }

    fn frame(mut self, payload: &[u8]) -> Self {
        let len = payload.len() as u32;
        self.bytes.extend_from_slice(&len.to_le_bytes()[..3]);
        self.bytes.push(self.seq);
        self.bytes.extend_from_slice(payload);
        self.seq = self.seq.wrapping_add(1);
        self
    }

    /// Sequence numbering restarts for the EXECUTE response.
    fn execute(mut self) -> Self {
        self.seq = 1;
        self
    }

    fn prepare_ok(self, statement_id: u32, num_columns: u16, num_params: u16) -> Self {
        let mut w = PacketWriter::new();
        w.write_u8(0x00);
        w.write_u32_le(statement_id);
        w.write_u16_le(num_columns);
        w.write_u16_le(num_params);
        w.write_u8(0x00);
        w.write_u16_le(0);
        self.frame(w.as_bytes())
    }

    fn column(self, name: &str, column_type: FieldType, charset: u16) -> Self {
        let mut w = PacketWriter::new();
        for part in ["def", "app", "users", "users", name, name] {
            w.write_lenenc_string(part);
        }
        w.write_lenenc_int(0x0C);
        w.write_u16_le(charset);
        w.write_u32_le(255);
        w.write_u8(column_type as u8);
        w.write_u16_le(0);
        w.write_u8(0);
        w.write_bytes(&[0x00, 0x00]);
        self.frame(w.as_bytes())
    }

    fn eof(self) -> Self {
        self.frame(&[0xFE, 0x00, 0x00, 0x02, 0x00])
    }

    fn ok(self, affected_rows: u8, last_insert_id: u8) -> Self {
        self.frame(&[0x00, affected_rows, last_insert_id, 0x02, 0x00, 0x00, 0x00])
    }

    fn ok_end_marker(self) -> Self {
        self.frame(&[0xFE, 0x00, 0x00, 0x22, 0x00, 0x00, 0x00])
    }

    fn error(self, code: u16, sqlstate: &str, message: &str) -> Self {
        let mut payload = vec![0xFF];
        payload.extend_from_slice(&code.to_le_bytes());
        payload.push(b'#');
        payload.extend_from_slice(sqlstate.as_bytes());
        payload.extend_from_slice(message.as_bytes());
        self.frame(&payload)
    }

    /// Binary row of (BIGINT id, VARCHAR name).
    fn user_row(self, id: i64, name: Option<&str>) -> Self {
        let mut w = PacketWriter::new();
        w.write_u8(0x00);
        w.write_u8(if name.is_none() { 0b0000_1000 } else { 0 });
        w.write_bytes(&id.to_le_bytes());
        if let Some(name) = name {
            w.write_lenenc_string(name);
        }
        self.frame(w.as_bytes())
    }

    fn build(self) -> Vec<u8> {
        self.bytes
    }
}

const SELECT_USERS: &str = "SELECT id, name FROM users WHERE id > ?";

fn select_users_response(statement_id: u32) -> Response {
    Response::new()
        .prepare_ok(statement_id, 2, 1)
        .column("?", FieldType::LongLong, 63)
        .column("id", FieldType::LongLong, 63)
        .column("name", FieldType::VarString, 255)
        .execute()
        .frame(&[0x02])
        .column("id", FieldType::LongLong, 63)
        .column("name", FieldType::VarString, 255)
}

fn connect(server: ScriptedServer) -> MySqlConnection<ScriptedServer> {
    MySqlConnection::new(server, MySqlConfig::default()).unwrap()
}

#[test]
fn select_streams_rows_and_closes_statement() {
    let response = select_users_response(5)
        .user_row(1, Some("ada"))
        .user_row(2, None)
        .user_row(3, Some("grace"))
        .ok_end_marker()
        .build();
    let mut conn = connect(ScriptedServer::new(7, vec![response]));

    let rows = conn.query(SELECT_USERS, &[Value::BigInt(0)]).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].get_named::<i64>("id").unwrap(), 1);
    assert_eq!(rows[0].get_named::<String>("name").unwrap(), "ada");
    assert_eq!(rows[1].get_named::<Option<String>>("name").unwrap(), None);
    assert_eq!(rows[2].get_as::<String>(1).unwrap(), "grace");
    assert_eq!(conn.state(), ConnectionState::Ready);
    assert_eq!(conn.status_flags(), 0x22);

    let requests = conn.get_ref().requests();
    assert_eq!(
        requests,
        vec![
            (0, build_stmt_prepare_payload(SELECT_USERS).to_vec()),
            (
                0,
                build_stmt_execute_payload(
                    5,
                    CURSOR_TYPE_NO_CURSOR,
                    &[Value::BigInt(0)],
                    CapabilityFlags::default()
                )
                .to_vec()
            ),
            (0, build_stmt_close_payload(5).to_vec()),
        ]
    );
}

#[test]
fn byte_at_a_time_delivery() {
    let response = select_users_response(1)
        .user_row(10, Some("linus"))
        .ok_end_marker()
        .build();
    let mut conn = connect(ScriptedServer::new(1, vec![response]));

    let mut names = Vec::new();
    conn.query_with(SELECT_USERS, &[Value::BigInt(0)], |row| {
        names.push(row.get_named::<String>("name").unwrap());
    })
    .unwrap();
    assert_eq!(names, vec!["linus".to_string()]);
}

#[test]
fn execute_reports_affected_rows() {
    let response = Response::new()
        .prepare_ok(9, 0, 1)
        .column("?", FieldType::VarString, 255)
        .execute()
        .ok(1, 42)
        .build();
    let mut conn = connect(ScriptedServer::new(64, vec![response]));

    let affected = conn
        .execute("INSERT INTO users (name) VALUES (?)", &[Value::Text("ada".into())])
        .unwrap();
    assert_eq!(affected, 1);
    assert_eq!(conn.last_insert_id(), 42);
    assert!(conn.is_ready());
}

#[test]
fn prepare_error_keeps_connection_usable() {
    let failing = Response::new()
        .error(1064, "42000", "You have an error in your SQL syntax")
        .build();
    let next = Response::new().prepare_ok(2, 0, 0).execute().ok(0, 0).build();
    let mut conn = connect(ScriptedServer::new(16, vec![failing, next]));

    let err = conn.query("SELEKT 1", &[]).unwrap_err();
    match &err {
        Error::Query(q) => {
            assert_eq!(q.kind, QueryErrorKind::Syntax);
            assert_eq!(q.sql.as_deref(), Some("SELEKT 1"));
        }
        other => panic!("expected server error, got {other}"),
    }
    assert_eq!(conn.state(), ConnectionState::Ready);

    conn.execute("DO 1", &[]).unwrap();

    // No statement id was assigned, so nothing to close for the failed query
    let closes = conn
        .get_ref()
        .requests()
        .into_iter()
        .filter(|(_, payload)| payload[0] == 0x19)
        .count();
    assert_eq!(closes, 1);
}

#[test]
fn error_mid_stream_stops_rows() {
    let response = select_users_response(3)
        .user_row(1, Some("ada"))
        .error(1317, "70100", "Query execution was interrupted")
        .user_row(2, Some("never"))
        .build();
    let mut conn = connect(ScriptedServer::new(5, vec![response]));

    let mut seen = 0;
    let err = conn
        .query_with(SELECT_USERS, &[Value::BigInt(0)], |_| seen += 1)
        .unwrap_err();
    assert_eq!(seen, 1);
    assert_eq!(err.server_code(), Some(1317));
    assert_eq!(conn.state(), ConnectionState::Ready);

    let requests = conn.get_ref().requests();
    assert_eq!(requests.last().unwrap().1, build_stmt_close_payload(3).to_vec());
}

#[test]
fn disconnect_mid_stream_poisons_connection() {
    let response = select_users_response(3).user_row(1, Some("ada")).build();
    let mut conn = connect(ScriptedServer::new(64, vec![response]));

    let err = conn.query(SELECT_USERS, &[Value::BigInt(0)]).unwrap_err();
    assert!(matches!(
        err,
        Error::Connection(ref e) if e.kind == ConnectionErrorKind::Disconnected
    ));
    assert_eq!(conn.state(), ConnectionState::Error);

    let err = conn.query(SELECT_USERS, &[Value::BigInt(0)]).unwrap_err();
    assert!(matches!(
        err,
        Error::Connection(ref e) if e.kind == ConnectionErrorKind::NotReady
    ));
}

#[test]
fn legacy_eof_server() {
    let response = Response::new()
        .prepare_ok(8, 2, 1)
        .column("?", FieldType::LongLong, 63)
        .eof()
        .column("id", FieldType::LongLong, 63)
        .column("name", FieldType::VarString, 255)
        .eof()
        .execute()
        .frame(&[0x02])
        .column("id", FieldType::LongLong, 63)
        .column("name", FieldType::VarString, 255)
        .eof()
        .user_row(4, Some("edsger"))
        .eof()
        .build();
    let config = MySqlConfig::default().capabilities(
        CapabilityFlags::default().without(capabilities::CLIENT_DEPRECATE_EOF),
    );
    let mut conn = MySqlConnection::new(ScriptedServer::new(3, vec![response]), config).unwrap();

    let rows = conn.query(SELECT_USERS, &[Value::BigInt(0)]).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_named::<i64>("id").unwrap(), 4);
    assert_eq!(conn.status_flags(), 0x02);
}

#[test]
fn statements_left_open_when_configured() {
    let response = Response::new().prepare_ok(6, 0, 0).execute().ok(0, 0).build();
    let config = MySqlConfig::default().close_statements(false);
    let mut conn = MySqlConnection::new(ScriptedServer::new(64, vec![response]), config).unwrap();

    conn.execute("DO 1", &[]).unwrap();
    let requests = conn.get_ref().requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|(_, payload)| payload[0] != 0x19));
}
