//! Prepared-statement payloads.
//!
//! Builders for the COM_STMT_PREPARE, COM_STMT_EXECUTE and COM_STMT_CLOSE
//! requests, and decoders for PREPARE-OK and binary result rows. Framing
//! the payloads is left to the encoder.
//!
//! # References
//!
//! - [COM_STMT_PREPARE](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_stmt_prepare.html)
//! - [COM_STMT_EXECUTE](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_stmt_execute.html)
//! - [Binary Protocol Result Set](https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_binary_resultset.html)

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use bytes::Bytes;
use sqlwire_core::{Error, Value};

use super::{CapabilityFlags, Command, PacketReader, PacketWriter, protocol_error_with_data};
use crate::types::{ColumnDef, FieldType};

/// Cursor flag for COM_STMT_EXECUTE: no cursor, rows are streamed.
pub const CURSOR_TYPE_NO_CURSOR: u8 = 0x00;

/// Parameter type flag marking an unsigned integer.
const PARAM_UNSIGNED: u8 = 0x80;

/// Bit offset of the first column in a binary row's NULL bitmap.
const ROW_NULL_BITMAP_OFFSET: usize = 2;

/// The server's answer to COM_STMT_PREPARE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmtPrepareOk {
    pub statement_id: u32,
    /// Result columns; 0 for statements without a result set
    pub num_columns: u16,
    /// `?` placeholders in the statement
    pub num_params: u16,
    pub warnings: u16,
}

pub fn build_stmt_prepare_payload(sql: &str) -> Bytes {
    let mut w = PacketWriter::with_capacity(1 + sql.len());
    w.write_u8(Command::StmtPrepare as u8);
    w.write_bytes(sql.as_bytes());
    w.into_payload()
}

/// Build a COM_STMT_EXECUTE payload.
///
/// Layout: command byte, statement id, cursor `flags`, iteration count
/// (always 1). With parameters, then: the parameter count (only under
/// CLIENT_QUERY_ATTRIBUTES), the NULL bitmap, the new-params-bound flag,
/// a type and flag byte per parameter (each followed by an empty name under
/// CLIENT_QUERY_ATTRIBUTES) and the non-NULL values in order.
pub fn build_stmt_execute_payload(
    statement_id: u32,
    flags: u8,
    params: &[Value],
    capabilities: CapabilityFlags,
) -> Bytes {
    let mut w = PacketWriter::with_capacity(16 + params.len() * 12);
    w.write_u8(Command::StmtExecute as u8);
    w.write_u32_le(statement_id);
    w.write_u8(flags);
    w.write_u32_le(1);

    if params.is_empty() {
        return w.into_payload();
    }

    let attributes = capabilities.query_attributes();
    if attributes {
        w.write_lenenc_int(params.len() as u64);
    }

    let mut nulls = NullBitmap::new(params.len(), 0);
    for (i, _) in params.iter().enumerate().filter(|(_, p)| p.is_null()) {
        nulls.set(i);
    }
    w.write_bytes(nulls.as_bytes());
    w.write_u8(1);

    for param in params {
        let (field_type, unsigned) = param_type(param);
        w.write_u8(field_type as u8);
        w.write_u8(if unsigned { PARAM_UNSIGNED } else { 0 });
        if attributes {
            w.write_lenenc_int(0);
        }
    }

    for param in params {
        write_param(&mut w, param);
    }

    w.into_payload()
}

/// COM_STMT_CLOSE; the server sends no reply.
pub fn build_stmt_close_payload(statement_id: u32) -> Bytes {
    let mut w = PacketWriter::with_capacity(5);
    w.write_u8(Command::StmtClose as u8);
    w.write_u32_le(statement_id);
    w.into_payload()
}

/// Parse PREPARE-OK: status 0x00, statement id, column count, parameter
/// count, a filler byte and (from MySQL 5.0 on) a warning count.
pub fn parse_stmt_prepare_ok(data: &[u8]) -> Result<StmtPrepareOk, Error> {
    let mut r = PacketReader::new(data);
    let short = || {
        protocol_error_with_data(
            format!("PREPARE response too short ({} bytes)", data.len()),
            data,
        )
    };

    match r.read_u8() {
        Some(0x00) => {}
        Some(status) => {
            return Err(protocol_error_with_data(
                format!("Unexpected PREPARE response status 0x{status:02X}"),
                data,
            ));
        }
        None => return Err(short()),
    }

    let statement_id = r.read_u32_le().ok_or_else(short)?;
    let num_columns = r.read_u16_le().ok_or_else(short)?;
    let num_params = r.read_u16_le().ok_or_else(short)?;
    r.read_u8().ok_or_else(short)?;

    Ok(StmtPrepareOk {
        statement_id,
        num_columns,
        num_params,
        warnings: r.read_u16_le().unwrap_or(0),
    })
}

/// Decode a binary result row against its column definitions.
///
/// The row is a 0x00 header, a NULL bitmap whose first two bits are
/// reserved, then the non-NULL cells in column order.
pub fn decode_binary_row(data: &[u8], columns: &[ColumnDef]) -> Result<Vec<Value>, Error> {
    let mut r = PacketReader::new(data);
    if r.read_u8() != Some(0x00) {
        return Err(protocol_error_with_data("Binary row missing 0x00 header", data));
    }
    let nulls = r
        .read_bytes(NullBitmap::len_for(columns.len(), ROW_NULL_BITMAP_OFFSET))
        .ok_or_else(|| protocol_error_with_data("Binary row NULL bitmap truncated", data))?;
    let nulls = NullBitmap::from_slice(nulls, ROW_NULL_BITMAP_OFFSET);

    let values = columns
        .iter()
        .enumerate()
        .map(|(i, col)| {
            if nulls.is_set(i) {
                return Ok(Value::Null);
            }
            col.decode_binary(&mut r).ok_or_else(|| {
                protocol_error_with_data(
                    format!("Binary row value for column '{}' is truncated or malformed", col.name),
                    data,
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if !r.is_empty() {
        tracing::warn!(
            trailing = r.remaining(),
            columns = columns.len(),
            "binary row has trailing bytes"
        );
    }
    Ok(values)
}

/// NULL bitmap shared by EXECUTE parameters (offset 0) and binary rows
/// (offset 2).
struct NullBitmap<'a> {
    bits: std::borrow::Cow<'a, [u8]>,
    offset: usize,
}

impl<'a> NullBitmap<'a> {
    const fn len_for(count: usize, offset: usize) -> usize {
        (count + offset).div_ceil(8)
    }

    fn new(count: usize, offset: usize) -> Self {
        Self {
            bits: vec![0; Self::len_for(count, offset)].into(),
            offset,
        }
    }

    fn from_slice(bits: &'a [u8], offset: usize) -> Self {
        Self {
            bits: bits.into(),
            offset,
        }
    }

    fn set(&mut self, index: usize) {
        let bit = index + self.offset;
        self.bits.to_mut()[bit / 8] |= 1 << (bit % 8);
    }

    fn is_set(&self, index: usize) -> bool {
        let bit = index + self.offset;
        self.bits.get(bit / 8).is_some_and(|b| b & (1 << (bit % 8)) != 0)
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bits
    }
}

/// Wire type of a bound parameter and whether it is flagged unsigned.
fn param_type(value: &Value) -> (FieldType, bool) {
    let field_type = match value {
        Value::Null => FieldType::Null,
        Value::Bool(_) | Value::TinyInt(_) => FieldType::Tiny,
        Value::SmallInt(_) => FieldType::Short,
        Value::Int(_) => FieldType::Long,
        Value::BigInt(_) | Value::UBigInt(_) => FieldType::LongLong,
        Value::Float(_) => FieldType::Float,
        Value::Double(_) => FieldType::Double,
        Value::Decimal(_) => FieldType::NewDecimal,
        Value::Text(_) => FieldType::VarString,
        Value::Bytes(_) => FieldType::Blob,
        Value::Json(_) => FieldType::Json,
        Value::Date(_) => FieldType::Date,
        Value::Time(_) => FieldType::Time,
        Value::Timestamp(_) => FieldType::DateTime,
    };
    (field_type, matches!(value, Value::UBigInt(_)))
}

/// Append one parameter value; NULLs live only in the bitmap.
fn write_param(w: &mut PacketWriter, value: &Value) {
    match value {
        Value::Null => {}
        Value::Bool(b) => w.write_u8(u8::from(*b)),
        Value::TinyInt(v) => w.write_u8(*v as u8),
        Value::SmallInt(v) => w.write_u16_le(*v as u16),
        Value::Int(v) => w.write_u32_le(*v as u32),
        Value::BigInt(v) => w.write_u64_le(*v as u64),
        Value::UBigInt(v) => w.write_u64_le(*v),
        Value::Float(v) => w.write_u32_le(v.to_bits()),
        Value::Double(v) => w.write_u64_le(v.to_bits()),
        Value::Decimal(s) | Value::Text(s) => w.write_lenenc_string(s),
        Value::Bytes(b) => w.write_lenenc_bytes(b),
        Value::Json(j) => w.write_lenenc_string(&j.to_string()),
        Value::Date(days) => {
            let (year, month, day) = civil_from_days(i64::from(*days));
            w.write_u8(4);
            write_ymd(w, year, month, day);
        }
        Value::Time(micros) => write_time(w, *micros),
        Value::Timestamp(micros) => write_datetime(w, *micros),
    }
}

const MICROS_PER_SECOND: i64 = 1_000_000;
const SECONDS_PER_DAY: i64 = 86_400;

fn write_ymd(w: &mut PacketWriter, year: i64, month: u8, day: u8) {
    w.write_u16_le(year as u16);
    w.write_u8(month);
    w.write_u8(day);
}

/// TIME: length 0 for zero, otherwise sign, days, h:m:s and optional micros.
fn write_time(w: &mut PacketWriter, micros: i64) {
    if micros == 0 {
        w.write_u8(0);
        return;
    }
    let magnitude = micros.unsigned_abs();
    let fraction = (magnitude % 1_000_000) as u32;
    let seconds = magnitude / 1_000_000;

    w.write_u8(if fraction == 0 { 8 } else { 12 });
    w.write_u8(u8::from(micros < 0));
    w.write_u32_le((seconds / 86_400) as u32);
    w.write_u8((seconds % 86_400 / 3600) as u8);
    w.write_u8((seconds % 3600 / 60) as u8);
    w.write_u8((seconds % 60) as u8);
    if fraction != 0 {
        w.write_u32_le(fraction);
    }
}

/// DATETIME: the shortest of the 4, 7 and 11 byte forms that holds the value.
fn write_datetime(w: &mut PacketWriter, micros: i64) {
    let seconds = micros.div_euclid(MICROS_PER_SECOND);
    let fraction = micros.rem_euclid(MICROS_PER_SECOND) as u32;
    let time_of_day = seconds.rem_euclid(SECONDS_PER_DAY);
    let (year, month, day) = civil_from_days(seconds.div_euclid(SECONDS_PER_DAY));

    let len: u8 = match (time_of_day, fraction) {
        (_, 1..) => 11,
        (1.., 0) => 7,
        _ => 4,
    };
    w.write_u8(len);
    write_ymd(w, year, month, day);
    if len >= 7 {
        w.write_u8((time_of_day / 3600) as u8);
        w.write_u8((time_of_day % 3600 / 60) as u8);
        w.write_u8((time_of_day % 60) as u8);
    }
    if len == 11 {
        w.write_u32_le(fraction);
    }
}

/// Proleptic Gregorian date for a count of days since 1970-01-01
/// (Howard Hinnant's `civil_from_days`).
fn civil_from_days(days: i64) -> (i64, u8, u8) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let day_of_era = z.rem_euclid(146_097);
    let year_of_era =
        (day_of_era - day_of_era / 1460 + day_of_era / 36_524 - day_of_era / 146_096) / 365;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);
    // months counted from March
    let mp = (5 * day_of_year + 2) / 153;
    let day = day_of_year - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = year_of_era + era * 400 + i64::from(month <= 2);
    (year, month as u8, day as u8)
}
