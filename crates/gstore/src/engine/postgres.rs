//! Postgres backend over `tokio-postgres`.
//!
//! Parameters are bound dynamically: each [`Param`] is encoded according to the
//! type the server declares for its placeholder, so text arriving over the wire
//! can fill numeric, boolean, timestamp and enum columns. Rows decode into
//! [`Record`]s by column type. `NUMERIC` and `UUID` values read back as
//! strings so no digit is lost.

use core::fmt::Write as _;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};
use tokio_postgres::{
    Client, Config, NoTls, Row,
    types::{FromSql, IsNull, Kind, ToSql, Type, to_sql_checked},
};

use super::{Connection, Connector, Param};
use crate::{BoxError, Error, Record, Result};

/// Opens plaintext connections from a parsed connection string.
#[derive(Clone, Debug)]
pub struct PgConnector {
    config: Config,
}

impl PgConnector {
    pub fn new(url: &str) -> Result<Self> {
        let config = url.parse::<Config>().map_err(Error::backend)?;
        Ok(Self { config })
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Conn = PgConnection;

    async fn connect(&self) -> Result<PgConnection> {
        let (client, connection) = self.config.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(_err) = connection.await {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %_err, "postgres connection terminated");
            }
        });
        Ok(PgConnection { client })
    }
}

pub struct PgConnection {
    client: Client,
}

fn bind(params: &[Param]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&mut self, sql: &str, params: &[Param]) -> Result<Vec<Record>> {
        let rows = self.client.query(sql, &bind(params)).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&mut self, sql: &str, params: &[Param]) -> Result<u64> {
        Ok(self.client.execute(sql, &bind(params)).await?)
    }

    async fn batch(&mut self, sql: &str) -> Result<()> {
        Ok(self.client.batch_execute(sql).await?)
    }

    fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

fn mismatch(param: &Param, ty: &Type) -> BoxError {
    format!("cannot bind {param:?} to a {ty} parameter").into()
}

impl ToSql for Param {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> core::result::Result<IsNull, BoxError> {
        match self {
            Self::Null => Ok(IsNull::Yes),
            Self::Bool(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                _ => Self::Text(b.to_string()).to_sql(ty, out),
            },
            Self::Int(n) => match *ty {
                Type::INT2 => i16::try_from(*n)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*n)?.to_sql(ty, out),
                Type::INT8 => n.to_sql(ty, out),
                Type::OID => u32::try_from(*n)?.to_sql(ty, out),
                Type::NUMERIC => Decimal::from(*n).to_sql(ty, out),
                #[allow(clippy::cast_precision_loss)]
                Type::FLOAT8 => (*n as f64).to_sql(ty, out),
                Type::JSON | Type::JSONB => Value::from(*n).to_sql(ty, out),
                _ => Self::Text(n.to_string()).to_sql(ty, out),
            },
            Self::Float(x) => match *ty {
                #[allow(clippy::cast_possible_truncation)]
                Type::FLOAT4 => (*x as f32).to_sql(ty, out),
                Type::FLOAT8 => x.to_sql(ty, out),
                Type::NUMERIC => Decimal::try_from(*x)?.to_sql(ty, out),
                Type::JSON | Type::JSONB => Value::from(*x).to_sql(ty, out),
                _ => Self::Text(x.to_string()).to_sql(ty, out),
            },
            Self::Text(s) => text_to_sql(self, s, ty, out),
            Self::Bytes(b) => match *ty {
                Type::BYTEA => b.to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Self::Json(v) => match *ty {
                Type::JSON | Type::JSONB => v.to_sql(ty, out),
                Type::TEXT | Type::VARCHAR => v.to_string().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn text_to_sql(
    param: &Param,
    s: &str,
    ty: &Type,
    out: &mut BytesMut,
) -> core::result::Result<IsNull, BoxError> {
    match *ty {
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => s.to_sql(ty, out),
        Type::BOOL => s.trim().parse::<bool>()?.to_sql(ty, out),
        Type::INT2 => s.trim().parse::<i16>()?.to_sql(ty, out),
        Type::INT4 => s.trim().parse::<i32>()?.to_sql(ty, out),
        Type::INT8 => s.trim().parse::<i64>()?.to_sql(ty, out),
        Type::FLOAT4 => s.trim().parse::<f32>()?.to_sql(ty, out),
        Type::FLOAT8 => s.trim().parse::<f64>()?.to_sql(ty, out),
        Type::OID => s.trim().parse::<u32>()?.to_sql(ty, out),
        Type::NUMERIC => parse_decimal(s.trim())?.to_sql(ty, out),
        Type::UUID => {
            out.put_slice(&parse_uuid(s.trim()).ok_or_else(|| mismatch(param, ty))?);
            Ok(IsNull::No)
        }
        Type::TIMESTAMPTZ => DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc).to_sql(ty, out),
        Type::TIMESTAMP => s.parse::<NaiveDateTime>()?.to_sql(ty, out),
        Type::DATE => s.parse::<NaiveDate>()?.to_sql(ty, out),
        Type::JSON | Type::JSONB => {
            let value = serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_owned()));
            value.to_sql(ty, out)
        }
        Type::BYTEA => decode_hex(s)
            .ok_or_else(|| mismatch(param, ty))?
            .to_sql(ty, out),
        _ if matches!(ty.kind(), Kind::Enum(_)) => {
            out.put_slice(s.as_bytes());
            Ok(IsNull::No)
        }
        _ => Err(mismatch(param, ty)),
    }
}

/// Accepts plain and scientific notation.
fn parse_decimal(s: &str) -> core::result::Result<Decimal, rust_decimal::Error> {
    s.parse::<Decimal>().or_else(|_| Decimal::from_scientific(s))
}

/// The 16 bytes of a UUID written as 32 hex digits, hyphens optional.
fn parse_uuid(s: &str) -> Option<[u8; 16]> {
    let digits: String = s.chars().filter(|c| *c != '-').collect();
    if digits.len() != 32 {
        return None;
    }
    decode_hex(&digits)?.try_into().ok()
}

fn format_uuid(bytes: &[u8]) -> Option<String> {
    if bytes.len() != 16 {
        return None;
    }
    let mut out = String::with_capacity(36);
    for (i, b) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        let _ = write!(out, "{b:02x}");
    }
    Some(out)
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    let digits = s.strip_prefix("\\x").unwrap_or(s);
    if digits.len() % 2 != 0 {
        return None;
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(digits.get(i..i + 2)?, 16).ok())
        .collect()
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// A `UUID` column in its 16-byte binary form.
struct RawUuid(String);

impl<'a> FromSql<'a> for RawUuid {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> core::result::Result<Self, BoxError> {
        format_uuid(raw)
            .map(Self)
            .ok_or_else(|| format!("malformed {ty} value of {} bytes", raw.len()).into())
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::UUID
    }
}

/// Reads a textual column in its raw form as UTF-8; enum labels arrive this way.
struct RawText(String);

impl<'a> FromSql<'a> for RawText {
    fn from_sql(_: &Type, raw: &'a [u8]) -> core::result::Result<Self, BoxError> {
        Ok(Self(core::str::from_utf8(raw)?.to_owned()))
    }

    /// Other types have binary encodings that are not text.
    fn accepts(ty: &Type) -> bool {
        matches!(*ty, Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN)
            || matches!(ty.kind(), Kind::Enum(_))
    }
}

fn decode_row(row: &Row) -> Result<Record> {
    let mut record = Map::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, idx, column.type_()).map_err(Error::backend)?;
        record.insert(column.name().to_owned(), value);
    }
    Ok(record)
}

fn decode_column(row: &Row, idx: usize, ty: &Type) -> core::result::Result<Value, tokio_postgres::Error> {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
        Type::INT2 => row.try_get::<_, Option<i16>>(idx)?.map(Value::from),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx)?.map(Value::from),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::from),
        Type::OID => row.try_get::<_, Option<u32>>(idx)?.map(Value::from),
        Type::NUMERIC => row
            .try_get::<_, Option<Decimal>>(idx)?
            .map(|d| Value::String(d.to_string())),
        Type::UUID => row
            .try_get::<_, Option<RawUuid>>(idx)?
            .map(|RawUuid(s)| Value::String(s)),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .and_then(|x| Number::from_f64(f64::from(x)))
            .map(Value::Number),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(idx)?
            .and_then(Number::from_f64)
            .map(Value::Number),
        Type::JSON | Type::JSONB => row.try_get::<_, Option<Value>>(idx)?,
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|t| Value::String(t.to_rfc3339())),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|t| Value::String(t.to_string())),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)?
            .map(|d| Value::String(d.to_string())),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)?
            .map(|b| Value::String(encode_hex(&b))),
        _ => row
            .try_get::<_, Option<RawText>>(idx)?
            .map(|RawText(s)| Value::String(s)),
    };
    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(param: &Param, ty: &Type) -> core::result::Result<BytesMut, BoxError> {
        let mut out = BytesMut::new();
        param.to_sql(ty, &mut out)?;
        Ok(out)
    }

    #[test]
    fn text_coerces_to_declared_type() {
        assert_eq!(&encode(&Param::from("42"), &Type::INT8).unwrap()[..], &42i64.to_be_bytes());
        assert_eq!(&encode(&Param::from("7"), &Type::INT4).unwrap()[..], &7i32.to_be_bytes());
        assert_eq!(&encode(&Param::from("true"), &Type::BOOL).unwrap()[..], &[1]);
        assert!(encode(&Param::from("x"), &Type::INT8).is_err());
    }

    #[test]
    fn ints_narrow_or_fail() {
        assert!(encode(&Param::Int(70_000), &Type::INT2).is_err());
        assert_eq!(&encode(&Param::Int(5), &Type::INT2).unwrap()[..], &5i16.to_be_bytes());
        assert_eq!(&encode(&Param::Int(5), &Type::TEXT).unwrap()[..], b"5");
    }

    #[test]
    fn null_is_null_for_any_type() {
        let mut out = BytesMut::new();
        assert!(matches!(Param::Null.to_sql(&Type::INT8, &mut out), Ok(IsNull::Yes)));
    }

    #[test]
    fn numeric_binds_from_text_and_numbers() {
        let text = encode(&Param::from("12.50"), &Type::NUMERIC).unwrap();
        let mut expected = BytesMut::new();
        "12.50".parse::<Decimal>().unwrap().to_sql(&Type::NUMERIC, &mut expected).unwrap();
        assert_eq!(text, expected);

        let int = encode(&Param::Int(7), &Type::NUMERIC).unwrap();
        assert_eq!(Decimal::from_sql(&Type::NUMERIC, &int).unwrap(), Decimal::from(7));
        let float = encode(&Param::Float(0.5), &Type::NUMERIC).unwrap();
        assert_eq!(Decimal::from_sql(&Type::NUMERIC, &float).unwrap().to_string(), "0.5");
        let sci = encode(&Param::from("1e3"), &Type::NUMERIC).unwrap();
        assert_eq!(Decimal::from_sql(&Type::NUMERIC, &sci).unwrap(), Decimal::from(1000));
        assert!(encode(&Param::from("ten"), &Type::NUMERIC).is_err());
    }

    #[test]
    fn uuid_binds_and_reads_as_text() {
        let id = "67e55044-10b1-426f-9247-bb680e5fe0c8";
        let raw = encode(&Param::from(id), &Type::UUID).unwrap();
        assert_eq!(raw.len(), 16);
        assert_eq!(raw[0], 0x67);
        assert_eq!(RawUuid::from_sql(&Type::UUID, &raw).unwrap().0, id);
        assert_eq!(&encode(&Param::from(id.replace('-', "")), &Type::UUID).unwrap()[..], &raw[..]);
        assert!(encode(&Param::from("67e55044"), &Type::UUID).is_err());
        assert!(RawUuid::from_sql(&Type::UUID, &[0; 3]).is_err());
    }

    #[test]
    fn oid_binds_from_text_and_ints() {
        assert_eq!(&encode(&Param::from("26"), &Type::OID).unwrap()[..], &26u32.to_be_bytes());
        assert_eq!(&encode(&Param::Int(26), &Type::OID).unwrap()[..], &26u32.to_be_bytes());
        assert!(encode(&Param::Int(-1), &Type::OID).is_err());
        assert_eq!(u32::from_sql(&Type::OID, &26u32.to_be_bytes()).unwrap(), 26);
    }

    #[test]
    fn raw_text_only_reads_textual_columns() {
        assert!(<RawText as FromSql>::accepts(&Type::TEXT));
        assert!(<RawText as FromSql>::accepts(&Type::VARCHAR));
        assert!(!<RawText as FromSql>::accepts(&Type::NUMERIC));
        assert!(!<RawText as FromSql>::accepts(&Type::INTERVAL));
        assert!(!<RawUuid as FromSql>::accepts(&Type::TEXT));
    }

    #[test]
    fn hex_round_trips_bytea() {
        assert_eq!(encode_hex(&[0xde, 0xad]), "\\xdead");
        assert_eq!(decode_hex("\\xdead"), Some(vec![0xde, 0xad]));
        assert_eq!(decode_hex("abc"), None);
    }
}
