//! Conversion of query results into polars frames.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use polars::prelude::{Column, DataFrame, DataType, NamedFrom, PolarsResult, Series, TimeUnit};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::{PgColumn, PgRow};
use sqlx::{Column as _, Row, TypeInfo};

use crate::error::{IntegrationError, Result};

/// Days between 0001-01-01 and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnKind {
    Boolean,
    Int64,
    Float64,
    Utf8,
    Date,
    Datetime,
    DatetimeUtc,
}

enum ColumnBuffer {
    Boolean(Vec<Option<bool>>),
    Int64(Vec<Option<i64>>),
    Float64(Vec<Option<f64>>),
    Utf8(Vec<Option<String>>),
    Date(Vec<Option<i32>>),
    Datetime(Vec<Option<i64>>),
    DatetimeUtc(Vec<Option<i64>>),
}

impl ColumnBuffer {
    fn new(kind: ColumnKind, capacity: usize) -> Self {
        match kind {
            ColumnKind::Boolean => ColumnBuffer::Boolean(Vec::with_capacity(capacity)),
            ColumnKind::Int64 => ColumnBuffer::Int64(Vec::with_capacity(capacity)),
            ColumnKind::Float64 => ColumnBuffer::Float64(Vec::with_capacity(capacity)),
            ColumnKind::Utf8 => ColumnBuffer::Utf8(Vec::with_capacity(capacity)),
            ColumnKind::Date => ColumnBuffer::Date(Vec::with_capacity(capacity)),
            ColumnKind::Datetime => ColumnBuffer::Datetime(Vec::with_capacity(capacity)),
            ColumnKind::DatetimeUtc => ColumnBuffer::DatetimeUtc(Vec::with_capacity(capacity)),
        }
    }

    fn into_column(self, name: &str) -> PolarsResult<Column> {
        let series = match self {
            ColumnBuffer::Boolean(values) => Series::new(name.into(), values),
            ColumnBuffer::Int64(values) => Series::new(name.into(), values),
            ColumnBuffer::Float64(values) => Series::new(name.into(), values),
            ColumnBuffer::Utf8(values) => Series::new(name.into(), values),
            ColumnBuffer::Date(values) => Series::new(name.into(), values).cast(&DataType::Date)?,
            ColumnBuffer::Datetime(values) => Series::new(name.into(), values)
                .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?,
            ColumnBuffer::DatetimeUtc(values) => Series::new(name.into(), values).cast(
                &DataType::Datetime(
                    TimeUnit::Microseconds,
                    Some(polars::prelude::TimeZone::UTC),
                ),
            )?,
        };
        Ok(series.into())
    }
}

pub fn date_to_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

pub fn days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)?)
}

fn naive_to_micros(value: NaiveDateTime) -> i64 {
    value.and_utc().timestamp_micros()
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum PgKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
    Uuid,
    Json,
    Date,
    Timestamp,
    Timestamptz,
}

impl PgKind {
    fn from_type_name(name: &str) -> Option<Self> {
        let kind = match name {
            "BOOL" => PgKind::Bool,
            "INT2" => PgKind::Int2,
            "INT4" => PgKind::Int4,
            "INT8" => PgKind::Int8,
            "FLOAT4" => PgKind::Float4,
            "FLOAT8" => PgKind::Float8,
            "NUMERIC" => PgKind::Numeric,
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" => PgKind::Text,
            "UUID" => PgKind::Uuid,
            "JSON" | "JSONB" => PgKind::Json,
            "DATE" => PgKind::Date,
            "TIMESTAMP" => PgKind::Timestamp,
            "TIMESTAMPTZ" => PgKind::Timestamptz,
            _ => return None,
        };
        Some(kind)
    }

    fn column_kind(self) -> ColumnKind {
        match self {
            PgKind::Bool => ColumnKind::Boolean,
            PgKind::Int2 | PgKind::Int4 | PgKind::Int8 => ColumnKind::Int64,
            PgKind::Float4 | PgKind::Float8 | PgKind::Numeric => ColumnKind::Float64,
            PgKind::Text | PgKind::Uuid | PgKind::Json => ColumnKind::Utf8,
            PgKind::Date => ColumnKind::Date,
            PgKind::Timestamp => ColumnKind::Datetime,
            PgKind::Timestamptz => ColumnKind::DatetimeUtc,
        }
    }
}

/// NUMERIC values arrive as `Decimal` and leave as `f64`; the frames only ever
/// average them. NaN and infinities have no `Decimal` form and fail to decode.
fn numeric_to_f64(value: Decimal) -> std::result::Result<f64, sqlx::Error> {
    value
        .to_f64()
        .ok_or_else(|| sqlx::Error::Decode(format!("NUMERIC {value} does not fit in f64").into()))
}

fn decode_error(column: &str, err: sqlx::Error) -> IntegrationError {
    IntegrationError::Decode(format!("column '{column}': {err}"))
}

/// Builds a frame from a prepared statement's columns and the fetched rows.
/// The columns come from the statement, so an empty result keeps its schema.
pub(crate) fn frame_from_pg_rows(columns: &[PgColumn], rows: &[PgRow]) -> Result<DataFrame> {
    let mut output = Vec::with_capacity(columns.len());

    for (idx, column) in columns.iter().enumerate() {
        let name = column.name();
        let type_name = column.type_info().name();
        let kind = PgKind::from_type_name(type_name).ok_or_else(|| {
            IntegrationError::UnsupportedColumnType {
                column: name.to_string(),
                type_name: type_name.to_string(),
            }
        })?;

        let mut buffer = ColumnBuffer::new(kind.column_kind(), rows.len());
        for row in rows {
            push_pg_value(&mut buffer, kind, row, idx).map_err(|err| decode_error(name, err))?;
        }
        output.push(buffer.into_column(name)?);
    }

    Ok(DataFrame::new(output)?)
}

fn push_pg_value(
    buffer: &mut ColumnBuffer,
    kind: PgKind,
    row: &PgRow,
    idx: usize,
) -> std::result::Result<(), sqlx::Error> {
    match (buffer, kind) {
        (ColumnBuffer::Boolean(values), _) => values.push(row.try_get::<Option<bool>, _>(idx)?),
        (ColumnBuffer::Int64(values), PgKind::Int2) => {
            values.push(row.try_get::<Option<i16>, _>(idx)?.map(i64::from))
        }
        (ColumnBuffer::Int64(values), PgKind::Int4) => {
            values.push(row.try_get::<Option<i32>, _>(idx)?.map(i64::from))
        }
        (ColumnBuffer::Int64(values), _) => values.push(row.try_get::<Option<i64>, _>(idx)?),
        (ColumnBuffer::Float64(values), PgKind::Float4) => {
            values.push(row.try_get::<Option<f32>, _>(idx)?.map(f64::from))
        }
        (ColumnBuffer::Float64(values), PgKind::Numeric) => values.push(
            row.try_get::<Option<Decimal>, _>(idx)?
                .map(numeric_to_f64)
                .transpose()?,
        ),
        (ColumnBuffer::Float64(values), _) => values.push(row.try_get::<Option<f64>, _>(idx)?),
        (ColumnBuffer::Utf8(values), PgKind::Uuid) => values.push(
            row.try_get::<Option<uuid::Uuid>, _>(idx)?
                .map(|uuid| uuid.to_string()),
        ),
        (ColumnBuffer::Utf8(values), PgKind::Json) => values.push(
            row.try_get::<Option<Value>, _>(idx)?
                .map(|json| json.to_string()),
        ),
        (ColumnBuffer::Utf8(values), _) => values.push(row.try_get::<Option<String>, _>(idx)?),
        (ColumnBuffer::Date(values), _) => {
            values.push(row.try_get::<Option<NaiveDate>, _>(idx)?.map(date_to_days))
        }
        (ColumnBuffer::Datetime(values), _) => values.push(
            row.try_get::<Option<NaiveDateTime>, _>(idx)?
                .map(naive_to_micros),
        ),
        (ColumnBuffer::DatetimeUtc(values), _) => values.push(
            row.try_get::<Option<DateTime<Utc>>, _>(idx)?
                .map(|value| value.timestamp_micros()),
        ),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ClickHouse
// ---------------------------------------------------------------------------

/// Output format requested from ClickHouse: a names line, a types line, then
/// one JSON array per row.
pub(crate) const CLICKHOUSE_FORMAT: &str = "JSONCompactEachRowWithNamesAndTypes";

pub(crate) fn clickhouse_kind(type_name: &str) -> Option<ColumnKind> {
    let mut inner = type_name.trim();
    loop {
        if let Some(rest) = inner
            .strip_prefix("Nullable(")
            .or_else(|| inner.strip_prefix("LowCardinality("))
        {
            inner = rest.strip_suffix(')')?;
        } else {
            break;
        }
    }

    let kind = match inner {
        "Bool" => ColumnKind::Boolean,
        "Float32" | "Float64" => ColumnKind::Float64,
        "String" | "UUID" | "IPv4" | "IPv6" => ColumnKind::Utf8,
        "Date" | "Date32" => ColumnKind::Date,
        t if t.starts_with("Int") || t.starts_with("UInt") => ColumnKind::Int64,
        t if t.starts_with("Decimal") => ColumnKind::Float64,
        t if t.starts_with("FixedString") || t.starts_with("Enum") => ColumnKind::Utf8,
        t if t.starts_with("DateTime") => ColumnKind::Datetime,
        _ => return None,
    };
    Some(kind)
}

pub(crate) fn frame_from_clickhouse_payload(payload: &[u8]) -> Result<DataFrame> {
    let mut lines = payload
        .split(|byte| *byte == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace));

    let mut header = |what: &str| -> Result<Vec<String>> {
        let line = lines.next().ok_or_else(|| {
            IntegrationError::Decode(format!("ClickHouse response is missing the {what} line"))
        })?;
        serde_json::from_slice(line)
            .map_err(|err| IntegrationError::Decode(format!("ClickHouse {what} line: {err}")))
    };

    let names = header("column names")?;
    let types = header("column types")?;
    if names.len() != types.len() {
        return Err(IntegrationError::Decode(format!(
            "ClickHouse returned {} names for {} types",
            names.len(),
            types.len()
        )));
    }

    let kinds = names
        .iter()
        .zip(&types)
        .map(|(name, type_name)| {
            clickhouse_kind(type_name).ok_or_else(|| IntegrationError::UnsupportedColumnType {
                column: name.clone(),
                type_name: type_name.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut buffers: Vec<ColumnBuffer> = kinds
        .iter()
        .map(|kind| ColumnBuffer::new(*kind, 0))
        .collect();

    for (row_idx, line) in lines.enumerate() {
        let values: Vec<Value> = serde_json::from_slice(line)
            .map_err(|err| IntegrationError::Decode(format!("ClickHouse row {row_idx}: {err}")))?;
        if values.len() != names.len() {
            return Err(IntegrationError::Decode(format!(
                "ClickHouse row {row_idx} has {} values, expected {}",
                values.len(),
                names.len()
            )));
        }

        for ((buffer, value), name) in buffers.iter_mut().zip(values).zip(&names) {
            push_json_value(buffer, value).map_err(|reason| {
                IntegrationError::Decode(format!("ClickHouse row {row_idx}, column '{name}': {reason}"))
            })?;
        }
    }

    let columns = buffers
        .into_iter()
        .zip(&names)
        .map(|(buffer, name)| buffer.into_column(name))
        .collect::<PolarsResult<Vec<_>>>()?;

    Ok(DataFrame::new(columns)?)
}

fn push_json_value(buffer: &mut ColumnBuffer, value: Value) -> std::result::Result<(), String> {
    let invalid = |value: &Value| format!("unexpected value {value}");

    match buffer {
        ColumnBuffer::Boolean(values) => values.push(match &value {
            Value::Null => None,
            Value::Bool(flag) => Some(*flag),
            Value::Number(number) => Some(number.as_f64().unwrap_or_default() != 0.0),
            other => return Err(invalid(other)),
        }),
        ColumnBuffer::Int64(values) => values.push(match &value {
            Value::Null => None,
            Value::Number(number) => Some(
                number
                    .as_i64()
                    .or_else(|| number.as_u64().and_then(|v| i64::try_from(v).ok()))
                    .ok_or_else(|| invalid(&value))?,
            ),
            Value::String(text) => Some(text.parse::<i64>().map_err(|_| invalid(&value))?),
            other => return Err(invalid(other)),
        }),
        ColumnBuffer::Float64(values) => values.push(match &value {
            Value::Null => None,
            Value::Number(number) => number.as_f64(),
            Value::String(text) => Some(text.parse::<f64>().map_err(|_| invalid(&value))?),
            other => return Err(invalid(other)),
        }),
        ColumnBuffer::Utf8(values) => values.push(match value {
            Value::Null => None,
            Value::String(text) => Some(text),
            other => Some(other.to_string()),
        }),
        ColumnBuffer::Date(values) => values.push(match &value {
            Value::Null => None,
            Value::String(text) => Some(date_to_days(
                NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| invalid(&value))?,
            )),
            other => return Err(invalid(other)),
        }),
        ColumnBuffer::Datetime(values) | ColumnBuffer::DatetimeUtc(values) => {
            values.push(match &value {
                Value::Null => None,
                Value::String(text) => Some(naive_to_micros(
                    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
                        .map_err(|_| invalid(&value))?,
                )),
                other => return Err(invalid(other)),
            })
        }
    }
    Ok(())
}
