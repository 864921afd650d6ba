//! Column metadata and binary-protocol cell decoding.
//!
//! Prepared statements return rows in the binary protocol: fixed-width
//! little-endian integers and floats, length-prefixed date/time structs and
//! length-encoded strings. Column definitions (ColumnDefinition41) tell the
//! decoder which encoding each cell uses.

use sqlwire_core::{Error, Value};

use crate::protocol::{PacketReader, charset, protocol_error_with_data};

macro_rules! field_types {
    ($($name:ident = $code:literal,)*) => {
        /// Column type codes (`MYSQL_TYPE_*`).
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u8)]
        pub enum FieldType {
            $($name = $code,)*
        }

        impl FieldType {
            /// Unknown codes decode as `String`, i.e. as length-encoded text.
            #[must_use]
            pub fn from_u8(code: u8) -> Self {
                match code {
                    $($code => FieldType::$name,)*
                    _ => FieldType::String,
                }
            }
        }
    };
}

field_types! {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0A,
    Time = 0x0B,
    DateTime = 0x0C,
    Year = 0x0D,
    NewDate = 0x0E,
    VarChar = 0x0F,
    Bit = 0x10,
    Timestamp2 = 0x11,
    DateTime2 = 0x12,
    Time2 = 0x13,
    Json = 0xF5,
    NewDecimal = 0xF6,
    Enum = 0xF7,
    Set = 0xF8,
    TinyBlob = 0xF9,
    MediumBlob = 0xFA,
    LongBlob = 0xFB,
    Blob = 0xFC,
    VarString = 0xFD,
    String = 0xFE,
    Geometry = 0xFF,
}

impl FieldType {
    /// CHAR/VARCHAR family; raw bytes when the column charset is `binary`.
    #[must_use]
    pub const fn is_string(self) -> bool {
        matches!(
            self,
            FieldType::VarChar
                | FieldType::VarString
                | FieldType::String
                | FieldType::Enum
                | FieldType::Set
        )
    }

    /// BLOB family; TEXT columns report these types with a text charset.
    #[must_use]
    pub const fn is_blob(self) -> bool {
        matches!(
            self,
            FieldType::TinyBlob
                | FieldType::MediumBlob
                | FieldType::LongBlob
                | FieldType::Blob
                | FieldType::Geometry
        )
    }
}

/// Column flag bits the decoder looks at.
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const UNSIGNED: u16 = 32;
    pub const BINARY: u16 = 128;
}

/// One ColumnDefinition41: a result column or a parameter placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub schema: String,
    /// Table name or alias
    pub table: String,
    /// Column name or alias
    pub name: String,
    pub charset: u16,
    /// Maximum display length
    pub column_length: u32,
    pub column_type: FieldType,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDef {
    #[must_use]
    pub const fn is_not_null(&self) -> bool {
        self.flags & column_flags::NOT_NULL != 0
    }

    #[must_use]
    pub const fn is_unsigned(&self) -> bool {
        self.flags & column_flags::UNSIGNED != 0
    }

    /// String and blob cells of this column are raw bytes, not text.
    #[must_use]
    pub const fn is_binary_data(&self) -> bool {
        self.charset == charset::BINARY
    }

    /// Decode this column's next cell, or `None` if the payload ends early
    /// or the cell is malformed.
    pub fn decode_binary(&self, reader: &mut PacketReader<'_>) -> Option<Value> {
        let binary = self.is_binary_data();
        match self.column_type {
            // BINARY and VARBINARY: string types with the binary charset
            t if t.is_string() && binary => Some(Value::Bytes(reader.read_lenenc_bytes()?.to_vec())),
            // TEXT family: blob types with a text charset
            t if t.is_blob() && !binary => Some(text_or_bytes(reader.read_lenenc_bytes()?)),
            t => decode_binary_value(reader, t, self.is_unsigned()),
        }
    }
}

/// Parse a ColumnDefinition41 payload.
pub fn parse_column_def(data: &[u8]) -> Result<ColumnDef, Error> {
    let mut r = PacketReader::new(data);
    let missing = |field: &str| protocol_error_with_data(format!("Missing {field}"), data);

    // catalog is always "def"
    r.read_lenenc_bytes().ok_or_else(|| missing("catalog"))?;
    let schema = r.read_lenenc_string().ok_or_else(|| missing("schema"))?;
    let table = r.read_lenenc_string().ok_or_else(|| missing("table"))?;
    r.read_lenenc_bytes().ok_or_else(|| missing("org_table"))?;
    let name = r.read_lenenc_string().ok_or_else(|| missing("name"))?;
    r.read_lenenc_bytes().ok_or_else(|| missing("org_name"))?;
    // length of the fixed-size tail, always 0x0C
    r.read_lenenc_int().ok_or_else(|| missing("fixed length"))?;

    Ok(ColumnDef {
        schema,
        table,
        name,
        charset: r.read_u16_le().ok_or_else(|| missing("charset"))?,
        column_length: r.read_u32_le().ok_or_else(|| missing("column_length"))?,
        column_type: FieldType::from_u8(r.read_u8().ok_or_else(|| missing("column_type"))?),
        flags: r.read_u16_le().ok_or_else(|| missing("flags"))?,
        decimals: r.read_u8().ok_or_else(|| missing("decimals"))?,
    })
}

/// Decode one non-NULL binary-protocol cell of type `field_type`.
///
/// NULLs are signalled by the row's NULL bitmap, so they never reach this
/// function except for the NULL type itself.
#[allow(clippy::cast_possible_wrap)]
pub fn decode_binary_value(
    reader: &mut PacketReader<'_>,
    field_type: FieldType,
    unsigned: bool,
) -> Option<Value> {
    use FieldType as T;

    let value = match field_type {
        T::Null => Value::Null,
        T::Tiny => {
            let raw = reader.read_u8()?;
            if unsigned {
                Value::SmallInt(i16::from(raw))
            } else {
                Value::TinyInt(raw as i8)
            }
        }
        T::Short | T::Year => {
            let raw = reader.read_u16_le()?;
            if unsigned {
                Value::Int(i32::from(raw))
            } else {
                Value::SmallInt(raw as i16)
            }
        }
        T::Long | T::Int24 => {
            let raw = reader.read_u32_le()?;
            if unsigned {
                Value::BigInt(i64::from(raw))
            } else {
                Value::Int(raw as i32)
            }
        }
        T::LongLong => {
            let raw = reader.read_u64_le()?;
            if unsigned {
                Value::from_unsigned(raw)
            } else {
                Value::BigInt(raw as i64)
            }
        }
        T::Float => Value::Float(f32::from_bits(reader.read_u32_le()?)),
        T::Double => Value::Double(f64::from_bits(reader.read_u64_le()?)),
        T::Date | T::NewDate => Value::Text(decode_date(temporal_body(reader)?)?),
        T::Time | T::Time2 => Value::Text(decode_time(temporal_body(reader)?)?),
        T::DateTime | T::DateTime2 | T::Timestamp | T::Timestamp2 => {
            Value::Text(decode_datetime(temporal_body(reader)?)?)
        }
        T::Decimal | T::NewDecimal => match std::str::from_utf8(reader.read_lenenc_bytes()?) {
            Ok(digits) => Value::Decimal(digits.to_owned()),
            Err(_) => return None,
        },
        T::Json => {
            let bytes = reader.read_lenenc_bytes()?;
            serde_json::from_slice(bytes).map_or_else(|_| text_or_bytes(bytes), Value::Json)
        }
        T::TinyBlob | T::MediumBlob | T::LongBlob | T::Blob | T::Geometry | T::Bit => {
            Value::Bytes(reader.read_lenenc_bytes()?.to_vec())
        }
        T::VarChar | T::VarString | T::String | T::Enum | T::Set => {
            text_or_bytes(reader.read_lenenc_bytes()?)
        }
    };
    Some(value)
}

/// Text when the bytes are UTF-8; otherwise the bytes untouched, so a
/// cell in a non-UTF-8 charset is never rewritten.
fn text_or_bytes(bytes: &[u8]) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(text) => Value::Text(text.to_owned()),
        Err(_) => Value::Bytes(bytes.to_vec()),
    }
}

/// Temporal cells are a length byte followed by that many component bytes.
fn temporal_body<'a>(reader: &mut PacketReader<'a>) -> Option<PacketReader<'a>> {
    let len = usize::from(reader.read_u8()?);
    reader.read_bytes(len).map(PacketReader::new)
}

fn decode_date(mut body: PacketReader<'_>) -> Option<String> {
    match body.remaining() {
        0 => Some("0000-00-00".to_string()),
        4 => {
            let year = body.read_u16_le()?;
            let (month, day) = (body.read_u8()?, body.read_u8()?);
            Some(format!("{year:04}-{month:02}-{day:02}"))
        }
        _ => None,
    }
}

fn decode_time(mut body: PacketReader<'_>) -> Option<String> {
    let len = body.remaining();
    if len == 0 {
        return Some("00:00:00".to_string());
    }
    if len != 8 && len != 12 {
        return None;
    }
    let sign = if body.read_u8()? != 0 { "-" } else { "" };
    let days = u64::from(body.read_u32_le()?);
    let hours = days * 24 + u64::from(body.read_u8()?);
    let (minutes, seconds) = (body.read_u8()?, body.read_u8()?);
    let mut out = format!("{sign}{hours:02}:{minutes:02}:{seconds:02}");
    if let Some(micros) = body.read_u32_le() {
        out.push_str(&format!(".{micros:06}"));
    }
    Some(out)
}

fn decode_datetime(mut body: PacketReader<'_>) -> Option<String> {
    let len = body.remaining();
    if len == 0 {
        return Some("0000-00-00 00:00:00".to_string());
    }
    if !matches!(len, 4 | 7 | 11) {
        return None;
    }
    let year = body.read_u16_le()?;
    let (month, day) = (body.read_u8()?, body.read_u8()?);
    let (hour, minute, second) = if len >= 7 {
        (body.read_u8()?, body.read_u8()?, body.read_u8()?)
    } else {
        (0, 0, 0)
    };
    let mut out = format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}");
    if let Some(micros) = body.read_u32_le() {
        out.push_str(&format!(".{micros:06}"));
    }
    Some(out)
}
