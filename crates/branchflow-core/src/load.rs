use std::ops::Range;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};
use polars::prelude::{Column, DataFrame, DataType, NamedFrom, PolarsResult, Series, TimeUnit};
use serde::Serialize;
use sqlx::query_builder::Separated;
use sqlx::{Postgres, QueryBuilder};
use tracing::info;

use crate::db::DbPool;
use crate::error::{IntegrationError, Result};
use crate::frame::days_to_date;
use crate::ident::{quote_ident, QualifiedTable};

/// Column stamped on every loaded row with the wall-clock load time.
pub const INGESTION_TIMESTAMP: &str = "inner_ts";

/// Postgres accepts at most this many bind parameters per statement.
const MAX_BIND_PARAMETERS: usize = u16::MAX as usize;
const MAX_ROWS_PER_INSERT: usize = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Keep existing rows, creating the table on first use.
    Append,
    /// Drop and recreate the table, even when there is nothing to insert.
    Replace,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub table: String,
    pub mode: WriteMode,
    pub rows: usize,
}

/// Returns a copy of `frame` with `INGESTION_TIMESTAMP` set to `at` on every
/// row, replacing any existing column of that name.
pub fn stamp_ingestion_time(frame: &DataFrame, at: NaiveDateTime) -> PolarsResult<DataFrame> {
    let micros = at.and_utc().timestamp_micros();
    let stamp = Series::new(INGESTION_TIMESTAMP.into(), vec![micros; frame.height()])
        .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?;

    let mut stamped = frame.clone();
    stamped.with_column(stamp)?;
    Ok(stamped)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SqlType {
    Boolean,
    BigInt,
    Double,
    Text,
    Date,
    Timestamp,
    TimestampTz,
}

impl SqlType {
    fn for_dtype(dtype: &DataType) -> Self {
        match dtype {
            DataType::Boolean => SqlType::Boolean,
            DataType::Date => SqlType::Date,
            DataType::Datetime(_, None) => SqlType::Timestamp,
            DataType::Datetime(_, Some(_)) => SqlType::TimestampTz,
            dtype if dtype.is_integer() => SqlType::BigInt,
            dtype if dtype.is_float() => SqlType::Double,
            _ => SqlType::Text,
        }
    }

    fn ddl(self) -> &'static str {
        match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::BigInt => "BIGINT",
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::Text => "TEXT",
            SqlType::Date => "DATE",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::TimestampTz => "TIMESTAMPTZ",
        }
    }
}

/// One column's values, converted to the Rust type that gets bound.
enum Cells {
    Boolean(Vec<Option<bool>>),
    BigInt(Vec<Option<i64>>),
    Double(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
    Date(Vec<Option<NaiveDate>>),
    Timestamp(Vec<Option<NaiveDateTime>>),
    TimestampTz(Vec<Option<DateTime<Utc>>>),
}

impl Cells {
    fn from_column(column: &Column, sql_type: SqlType) -> PolarsResult<Self> {
        let series = column.as_materialized_series();
        let cells = match sql_type {
            SqlType::Boolean => {
                Cells::Boolean(series.cast(&DataType::Boolean)?.bool()?.into_iter().collect())
            }
            SqlType::BigInt => {
                Cells::BigInt(series.cast(&DataType::Int64)?.i64()?.into_iter().collect())
            }
            SqlType::Double => {
                Cells::Double(series.cast(&DataType::Float64)?.f64()?.into_iter().collect())
            }
            SqlType::Text => Cells::Text(
                series
                    .cast(&DataType::String)?
                    .str()?
                    .into_iter()
                    .map(|value| value.map(str::to_string))
                    .collect(),
            ),
            SqlType::Date => Cells::Date(
                series
                    .cast(&DataType::Int32)?
                    .i32()?
                    .into_iter()
                    .map(|days| days.and_then(days_to_date))
                    .collect(),
            ),
            SqlType::Timestamp => Cells::Timestamp(
                datetime_micros(series)?
                    .into_iter()
                    .map(|micros| {
                        micros
                            .and_then(DateTime::<Utc>::from_timestamp_micros)
                            .map(|dt| dt.naive_utc())
                    })
                    .collect(),
            ),
            SqlType::TimestampTz => Cells::TimestampTz(
                datetime_micros(series)?
                    .into_iter()
                    .map(|micros| micros.and_then(DateTime::<Utc>::from_timestamp_micros))
                    .collect(),
            ),
        };
        Ok(cells)
    }

    fn push_bind(&self, row: &mut Separated<'_, 'static, Postgres, &'static str>, idx: usize) {
        match self {
            Cells::Boolean(values) => row.push_bind(values[idx]),
            Cells::BigInt(values) => row.push_bind(values[idx]),
            Cells::Double(values) => row.push_bind(values[idx]),
            Cells::Text(values) => row.push_bind(values[idx].clone()),
            Cells::Date(values) => row.push_bind(values[idx]),
            Cells::Timestamp(values) => row.push_bind(values[idx]),
            Cells::TimestampTz(values) => row.push_bind(values[idx]),
        };
    }
}

/// Physical UTC microseconds of a datetime column, whatever its time unit.
fn datetime_micros(series: &Series) -> PolarsResult<Vec<Option<i64>>> {
    let zone = match series.dtype() {
        DataType::Datetime(_, zone) => zone.clone(),
        _ => None,
    };
    Ok(series
        .cast(&DataType::Datetime(TimeUnit::Microseconds, zone))?
        .cast(&DataType::Int64)?
        .i64()?
        .into_iter()
        .collect())
}

/// The statements a load will run, prepared before any connection is used.
pub struct LoadPlan {
    target: QualifiedTable,
    ddl: Vec<String>,
    column_list: String,
    cells: Vec<Cells>,
    rows: usize,
}

impl LoadPlan {
    pub fn new(frame: &DataFrame, target: &QualifiedTable, mode: WriteMode) -> Result<Self> {
        let mut definitions = Vec::with_capacity(frame.width());
        let mut names = Vec::with_capacity(frame.width());
        let mut cells = Vec::with_capacity(frame.width());

        for column in frame.get_columns() {
            let sql_type = SqlType::for_dtype(column.dtype());
            let name = quote_ident(column.name().as_str());
            definitions.push(format!("{name} {}", sql_type.ddl()));
            names.push(name);
            cells.push(Cells::from_column(column, sql_type)?);
        }

        let definitions = definitions.join(", ");
        let ddl = match mode {
            WriteMode::Replace => vec![
                format!("DROP TABLE IF EXISTS {target}"),
                format!("CREATE TABLE {target} ({definitions})"),
            ],
            WriteMode::Append => vec![format!(
                "CREATE TABLE IF NOT EXISTS {target} ({definitions})"
            )],
        };

        Ok(Self {
            target: target.clone(),
            ddl,
            column_list: names.join(", "),
            cells,
            rows: frame.height(),
        })
    }

    pub fn ddl(&self) -> &[String] {
        &self.ddl
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn rows_per_batch(&self) -> usize {
        (MAX_BIND_PARAMETERS / self.cells.len().max(1)).clamp(1, MAX_ROWS_PER_INSERT)
    }

    pub fn batches(&self) -> Vec<Range<usize>> {
        let step = self.rows_per_batch();
        (0..self.rows)
            .step_by(step)
            .map(|start| start..(start + step).min(self.rows))
            .collect()
    }

    fn insert_query(&self, rows: Range<usize>) -> QueryBuilder<'static, Postgres> {
        let mut builder = QueryBuilder::new(format!(
            "INSERT INTO {} ({}) ",
            self.target, self.column_list
        ));
        builder.push_values(rows, |mut row, idx| {
            for cells in &self.cells {
                cells.push_bind(&mut row, idx);
            }
        });
        builder
    }
}

/// Writes frames into the reporting store under one schema.
pub struct Loader {
    pool: DbPool,
    schema: String,
}

impl Loader {
    pub fn new(pool: DbPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    /// Stamps `INGESTION_TIMESTAMP` and writes `frame` to `table` inside one
    /// transaction. Earlier loads of the same run are unaffected by a failure.
    pub async fn load(&self, frame: &DataFrame, table: &str, mode: WriteMode) -> Result<LoadReport> {
        let target = QualifiedTable::new(&self.schema, table)?;
        let stamped = stamp_ingestion_time(frame, Local::now().naive_local())?;
        let plan = LoadPlan::new(&stamped, &target, mode)?;

        let store_error = |source: sqlx::Error| IntegrationError::StoreWrite {
            table: table.to_string(),
            source,
        };

        let mut tx = self.pool.begin().await.map_err(store_error)?;
        for statement in plan.ddl() {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(store_error)?;
        }
        for batch in plan.batches() {
            let mut insert = plan.insert_query(batch);
            insert
                .build()
                .execute(&mut *tx)
                .await
                .map_err(store_error)?;
        }
        tx.commit().await.map_err(store_error)?;

        info!(table = %target, ?mode, rows = plan.rows(), "Loaded");

        Ok(LoadReport {
            table: table.to_string(),
            mode,
            rows: plan.rows(),
        })
    }
}
