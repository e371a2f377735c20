//! PostgreSQL backend
//!
//! Every query opens its own connection. The driver is async while query
//! tasks run on the blocking pool, so each driver call is run to completion on
//! the runtime handle captured at open time. Rows are pulled one at a time so
//! a full output channel holds back the server stream.

use super::{bytes_to_text, Database, RowCallback};
use crate::config::DatabaseConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::record::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures_util::StreamExt;
use tokio::runtime::Handle;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{Client, NoTls, Row};

type Param = Box<dyn ToSql + Sync + Send>;

/// PostgreSQL server reached through a keyword/value connection string
pub struct PostgresDatabase {
    config: tokio_postgres::Config,
    handle: Handle,
}

impl PostgresDatabase {
    /// Parse the connection parameters; must be called inside a Tokio runtime
    ///
    /// No connection is made here, the first query reports an unreachable server.
    pub fn open(config: &DatabaseConfig) -> MonitorResult<Self> {
        let handle = Handle::try_current().map_err(|e| {
            MonitorError::Config(format!("PostgreSQL backend needs a Tokio runtime: {e}"))
        })?;
        let pg_config: tokio_postgres::Config = config.connection_string().parse()?;

        Ok(Self {
            config: pg_config,
            handle,
        })
    }

    fn connect(&self) -> MonitorResult<Client> {
        let (client, connection) = self.handle.block_on(self.config.connect(NoTls))?;

        self.handle.spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(client)
    }
}

impl Database for PostgresDatabase {
    fn query(
        &self,
        sql: &str,
        params: &[Value],
        on_row: &mut RowCallback<'_>,
    ) -> MonitorResult<Vec<String>> {
        let client = self.connect()?;
        let stmt = self.handle.block_on(client.prepare(sql))?;

        let columns: Vec<String> = stmt
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let bound = params
            .iter()
            .zip(stmt.params())
            .map(|(value, ty)| bind_param(value, ty))
            .collect::<MonitorResult<Vec<Param>>>()?;
        let refs: Vec<&(dyn ToSql + Sync)> = bound
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let mut rows = Box::pin(self.handle.block_on(client.query_raw(&stmt, refs))?);

        while let Some(row) = self.handle.block_on(rows.next()) {
            let row = row?;
            on_row(&columns, row_values(&row)?)?;
        }

        Ok(columns)
    }
}

/// Convert a parameter to the type the server inferred for its placeholder
fn bind_param(value: &Value, ty: &Type) -> MonitorResult<Param> {
    let mismatch = || MonitorError::UnsupportedParameter {
        ty: ty.to_string(),
        value: value.type_name(),
    };

    match value {
        Value::Null => Ok(null_param(ty)),
        Value::Bool(b) => match *ty {
            Type::BOOL => Ok(Box::new(*b)),
            _ => Err(mismatch()),
        },
        Value::Integer(i) => match *ty {
            Type::INT2 => Ok(Box::new(i16::try_from(*i).map_err(|_| mismatch())?)),
            Type::INT4 => Ok(Box::new(i32::try_from(*i).map_err(|_| mismatch())?)),
            Type::INT8 => Ok(Box::new(*i)),
            Type::FLOAT8 => Ok(Box::new(*i as f64)),
            _ => Err(mismatch()),
        },
        Value::Float(x) => match *ty {
            Type::FLOAT4 => Ok(Box::new(*x as f32)),
            Type::FLOAT8 => Ok(Box::new(*x)),
            _ => Err(mismatch()),
        },
        Value::String(s) => match *ty {
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => Ok(Box::new(s.clone())),
            _ => Err(mismatch()),
        },
        Value::Timestamp(ts) => match *ty {
            Type::TIMESTAMPTZ => Ok(Box::new(*ts)),
            Type::TIMESTAMP => Ok(Box::new(ts.naive_utc())),
            Type::DATE => Ok(Box::new(ts.date_naive())),
            Type::TEXT | Type::VARCHAR => {
                Ok(Box::new(ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()))
            }
            _ => Err(mismatch()),
        },
    }
}

fn null_param(ty: &Type) -> Param {
    match *ty {
        Type::BOOL => Box::new(None::<bool>),
        Type::INT2 => Box::new(None::<i16>),
        Type::INT4 => Box::new(None::<i32>),
        Type::INT8 => Box::new(None::<i64>),
        Type::FLOAT4 => Box::new(None::<f32>),
        Type::FLOAT8 => Box::new(None::<f64>),
        Type::TIMESTAMP => Box::new(None::<NaiveDateTime>),
        Type::TIMESTAMPTZ => Box::new(None::<DateTime<Utc>>),
        Type::DATE => Box::new(None::<NaiveDate>),
        _ => Box::new(None::<String>),
    }
}

/// Undecoded column bytes for types without a dedicated mapping
struct RawValue<'a>(&'a [u8]);

impl<'a> FromSql<'a> for RawValue<'a> {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(RawValue(raw))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn row_values(row: &Row) -> MonitorResult<Vec<Value>> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| column_value(row, idx, column.type_()))
        .collect()
}

fn column_value(row: &Row, idx: usize, ty: &Type) -> MonitorResult<Value> {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| Value::Integer(v.into())),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)?
            .map(|v| Value::Integer(v.into())),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::Integer),
        Type::OID => row
            .try_get::<_, Option<u32>>(idx)?
            .map(|v| Value::Integer(v.into())),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| Value::Float(v.into())),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(Value::Float),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            row.try_get::<_, Option<String>>(idx)?.map(Value::String)
        }
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(Value::Timestamp),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|v| Value::Timestamp(v.and_utc())),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)?
            .map(|v| Value::String(v.to_string())),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)?
            .map(|v| Value::String(bytes_to_text(&v))),
        _ => row
            .try_get::<_, Option<RawValue<'_>>>(idx)?
            .map(|raw| Value::String(render_raw(ty, raw.0))),
    };

    Ok(value.unwrap_or(Value::Null))
}

/// Text for a column in binary wire format with no typed mapping
fn render_raw(ty: &Type, raw: &[u8]) -> String {
    match *ty {
        Type::NUMERIC => decode_numeric(raw).unwrap_or_else(|| bytes_to_text(raw)),
        // jsonb carries a one-byte version prefix before the JSON text
        Type::JSONB => match raw.split_first() {
            Some((1, text)) => bytes_to_text(text),
            _ => bytes_to_text(raw),
        },
        _ => bytes_to_text(raw),
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Render a binary NUMERIC (base-10000 digit groups) as decimal text
fn decode_numeric(raw: &[u8]) -> Option<String> {
    let word = |i: usize| -> Option<u16> {
        let bytes = raw.get(i * 2..i * 2 + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    };

    let ndigits = usize::from(word(0)?);
    let weight = i64::from(word(1)? as i16);
    let sign = word(2)?;
    let dscale = usize::from(word(3)?);
    let digits = (0..ndigits)
        .map(|i| word(4 + i))
        .collect::<Option<Vec<u16>>>()?;

    match sign {
        NUMERIC_NAN => return Some("NaN".to_string()),
        NUMERIC_PINF => return Some("Infinity".to_string()),
        NUMERIC_NINF => return Some("-Infinity".to_string()),
        _ => {}
    }

    let group = |idx: i64| -> u16 {
        usize::try_from(idx)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&group(0).to_string());
        for idx in 1..=weight {
            out.push_str(&format!("{:04}", group(idx)));
        }
    }

    if dscale > 0 {
        let mut fraction = String::new();
        let mut idx = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", group(idx)));
            idx += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn numeric(weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        for word in [digits.len() as u16, weight as u16, sign, dscale]
            .into_iter()
            .chain(digits.iter().copied())
        {
            raw.extend_from_slice(&word.to_be_bytes());
        }
        raw
    }

    #[test]
    fn test_decode_numeric() {
        assert_eq!(decode_numeric(&numeric(0, 0, 2, &[123, 4500])).unwrap(), "123.45");
        assert_eq!(decode_numeric(&numeric(-1, 0, 2, &[500])).unwrap(), "0.05");
        assert_eq!(decode_numeric(&numeric(1, 0, 0, &[1])).unwrap(), "10000");
        assert_eq!(decode_numeric(&numeric(0, NUMERIC_NEG, 1, &[7, 5000])).unwrap(), "-7.5");
        assert_eq!(decode_numeric(&numeric(0, 0, 0, &[])).unwrap(), "0");
        assert_eq!(decode_numeric(&numeric(0, NUMERIC_NAN, 0, &[])).unwrap(), "NaN");
        assert!(decode_numeric(&[0, 1]).is_none());
    }

    #[test]
    fn test_render_raw_fallbacks() {
        assert_eq!(render_raw(&Type::JSONB, b"\x01{\"a\":1}"), "{\"a\":1}");
        assert_eq!(render_raw(&Type::JSON, b"[1,2]"), "[1,2]");
        assert_eq!(render_raw(&Type::UUID, &[0xde, 0xad, 0xbe, 0xef]), "deadbeef");
    }

    #[test]
    fn test_bind_timestamp_follows_column_type() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let value = Value::Timestamp(ts);
        let bound = |ty: Type| format!("{:?}", bind_param(&value, &ty).unwrap());

        assert_eq!(bound(Type::TIMESTAMPTZ), "2024-01-02T03:04:05Z");
        assert_eq!(bound(Type::TIMESTAMP), "2024-01-02T03:04:05");
        assert_eq!(bound(Type::DATE), "2024-01-02");
        assert_eq!(bound(Type::TEXT), "\"2024-01-02 03:04:05.000000\"");

        let err = bind_param(&value, &Type::INT8).err().unwrap();
        assert!(matches!(err, MonitorError::UnsupportedParameter { .. }));
    }

    #[test]
    fn test_bind_scalars() {
        let bound = |value: Value, ty: Type| format!("{:?}", bind_param(&value, &ty).unwrap());

        assert_eq!(bound(Value::Integer(7), Type::INT4), "7");
        assert_eq!(bound(Value::Bool(true), Type::BOOL), "true");
        assert_eq!(bound(Value::Null, Type::TIMESTAMPTZ), "None");

        assert!(bind_param(&Value::Integer(i64::MAX), &Type::INT2).is_err());
        assert!(bind_param(&Value::from("x"), &Type::BOOL).is_err());
    }

    #[tokio::test]
    async fn test_open_parses_connection_string() {
        let config = DatabaseConfig {
            username: "monitor".to_string(),
            password: "it's secret".to_string(),
            ..DatabaseConfig::default()
        };

        let db = PostgresDatabase::open(&config).unwrap();
        assert_eq!(db.config.get_user(), Some("monitor"));
        assert_eq!(db.config.get_password(), Some(&b"it's secret"[..]));
        assert_eq!(db.config.get_dbname(), Some("postgres"));
    }

    #[test]
    fn test_open_outside_runtime() {
        let err = PostgresDatabase::open(&DatabaseConfig::default()).err().unwrap();
        assert!(matches!(err, MonitorError::Config(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_query() {
        let config = DatabaseConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            username: "monitor".to_string(),
            ..DatabaseConfig::default()
        };
        let db = PostgresDatabase::open(&config).unwrap();

        let result = tokio::task::spawn_blocking(move || {
            db.query("SELECT 1", &[], &mut |_, _| Ok(()))
        })
        .await
        .unwrap();

        assert!(matches!(result, Err(MonitorError::Postgres(_))));
    }
}
