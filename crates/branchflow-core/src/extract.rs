use std::path::PathBuf;

use chrono::NaiveDate;
use polars::prelude::DataFrame;
use sqlx::postgres::{PgColumn, PgRow};
use sqlx::{Executor, PgConnection, Postgres, Statement, Type};
use tracing::{debug, info};

use crate::db::{DbPool, SourceConnection};
use crate::error::{IntegrationError, QueryError, Result};
use crate::frame::{frame_from_clickhouse_payload, frame_from_pg_rows, CLICKHOUSE_FORMAT};
use crate::ident::QualifiedTable;
use crate::retry::{Attempt, RetryOutcome, RetryPolicy};
use crate::template::{RenderedQuery, SqlTemplate, WindowBound};
use crate::watermark::{resolve_watermark, ExtractWindow};

/// One named extract.
#[derive(Debug, Clone, Copy)]
pub struct ExtractRequest<'a> {
    /// Template name; also the destination table consulted for the watermark.
    pub name: &'a str,
    pub source: &'a SourceConnection,
    /// Date column for incremental extracts; `None` extracts everything.
    pub watermark_column: Option<&'a str>,
}

#[derive(Debug)]
pub struct Extracted {
    pub frame: DataFrame,
    pub window: ExtractWindow,
}

pub struct Extractor {
    sql_dir: PathBuf,
    target_schema: String,
    destination: DbPool,
    retry: RetryPolicy,
    today: NaiveDate,
}

impl Extractor {
    pub fn new(
        sql_dir: impl Into<PathBuf>,
        target_schema: impl Into<String>,
        destination: DbPool,
        today: NaiveDate,
    ) -> Self {
        Self {
            sql_dir: sql_dir.into(),
            target_schema: target_schema.into(),
            destination,
            retry: RetryPolicy::default(),
            today,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn extract(&self, request: ExtractRequest<'_>) -> Result<Extracted> {
        // Template problems surface before any database is touched.
        let template = SqlTemplate::load(&self.sql_dir, request.name)?;
        let rendered = template.render(request.source.engine())?;
        debug!(extract = request.name, sql = %rendered.sql, "Rendered template");

        let window = match request.watermark_column {
            Some(column) => {
                let table = QualifiedTable::new(&self.target_schema, request.name)?;
                let watermark = resolve_watermark(&self.destination, &table, column).await?;
                ExtractWindow::from_watermark(watermark, self.today)
            }
            None => ExtractWindow::full(self.today),
        };

        let frame = match request.source {
            SourceConnection::Postgres(pool) => {
                self.fetch_postgres(request.name, pool, &rendered, &window)
                    .await?
            }
            SourceConnection::ClickHouse(client) => {
                fetch_clickhouse(request.name, client, &rendered, &window).await?
            }
        };

        info!(
            extract = request.name,
            rows = frame.height(),
            columns = frame.width(),
            start = ?window.start,
            stop = %window.stop,
            "Extracted"
        );

        Ok(Extracted { frame, window })
    }

    async fn fetch_postgres(
        &self,
        name: &str,
        pool: &DbPool,
        query: &RenderedQuery,
        window: &ExtractWindow,
    ) -> Result<DataFrame> {
        let mut conn = pool
            .acquire()
            .await
            .map_err(|source| extract_error(name, source.into()))?;

        let mut attempt = PgExtractAttempt {
            conn: &mut *conn,
            query,
            window,
        };
        let (columns, rows) = classify(name, self.retry.run(name, &mut attempt).await)?;
        frame_from_pg_rows(&columns, &rows)
    }
}

/// One execution of a rendered query on a single pooled connection, so that
/// a retry's `ROLLBACK` resets the same session.
struct PgExtractAttempt<'a> {
    conn: &'a mut PgConnection,
    query: &'a RenderedQuery,
    window: &'a ExtractWindow,
}

impl Attempt for PgExtractAttempt<'_> {
    type Output = (Vec<PgColumn>, Vec<PgRow>);
    type Error = sqlx::Error;

    fn sqlstate(err: &sqlx::Error) -> Option<String> {
        crate::retry::sqlstate(err)
    }

    async fn run(&mut self) -> std::result::Result<Self::Output, sqlx::Error> {
        run_postgres(&mut *self.conn, self.query, self.window).await
    }

    async fn rollback(&mut self) -> std::result::Result<(), sqlx::Error> {
        sqlx::query("ROLLBACK").execute(&mut *self.conn).await?;
        Ok(())
    }
}

fn classify<T>(name: &str, outcome: RetryOutcome<T, sqlx::Error>) -> Result<T> {
    match outcome {
        RetryOutcome::Done(output) => Ok(output),
        RetryOutcome::Exhausted { attempts, error } => Err(IntegrationError::TransientTransaction {
            name: name.to_string(),
            attempts,
            source: error,
        }),
        RetryOutcome::Failed(error) => Err(extract_error(name, error.into())),
    }
}

/// Window bounds are declared as DATE so the server never has to infer them.
async fn run_postgres(
    conn: &mut PgConnection,
    query: &RenderedQuery,
    window: &ExtractWindow,
) -> std::result::Result<(Vec<PgColumn>, Vec<PgRow>), sqlx::Error> {
    let parameter_types = vec![<NaiveDate as Type<Postgres>>::type_info(); query.binds.len()];
    let statement = (&mut *conn)
        .prepare_with(&query.sql, &parameter_types)
        .await?;

    let mut bound = statement.query();
    for bound_kind in &query.binds {
        bound = bound.bind(bound_value(window, *bound_kind));
    }
    let rows = bound.fetch_all(&mut *conn).await?;

    Ok((statement.columns().to_vec(), rows))
}

async fn fetch_clickhouse(
    name: &str,
    client: &clickhouse::Client,
    query: &RenderedQuery,
    window: &ExtractWindow,
) -> Result<DataFrame> {
    let mut bound = client.query(&query.sql);
    for bound_kind in &query.binds {
        bound = bound.bind(
            bound_value(window, *bound_kind)
                .format("%Y-%m-%d")
                .to_string(),
        );
    }

    let mut cursor = bound
        .fetch_bytes(CLICKHOUSE_FORMAT)
        .map_err(|source| extract_error(name, source.into()))?;
    let payload = cursor
        .collect()
        .await
        .map_err(|source| extract_error(name, source.into()))?;

    frame_from_clickhouse_payload(&payload)
}

/// A full window has no start; its lower bound is `FULL_EXTRACT_FLOOR` so
/// that plain `col > {StartDate}` comparisons still match every row.
fn bound_value(window: &ExtractWindow, bound: WindowBound) -> NaiveDate {
    match bound {
        WindowBound::Start => window.lower_bound(),
        WindowBound::Stop => window.stop,
    }
}

fn extract_error(name: &str, source: QueryError) -> IntegrationError {
    IntegrationError::ExtractExecution {
        name: name.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watermark::FULL_EXTRACT_FLOOR;

    #[test]
    fn full_window_binds_floor_as_start() {
        let stop = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let window = ExtractWindow::full(stop);
        assert_eq!(bound_value(&window, WindowBound::Start), FULL_EXTRACT_FLOOR);
        assert_eq!(bound_value(&window, WindowBound::Stop), stop);
    }

    #[test]
    fn incremental_window_binds_watermark() {
        let stop = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let start = NaiveDate::from_ymd_opt(2026, 9, 30).unwrap();
        let window = ExtractWindow::from_watermark(Some(start), stop);
        assert_eq!(bound_value(&window, WindowBound::Start), start);
    }

    #[test]
    fn exhausted_retries_become_transient_transaction_error() {
        let outcome: RetryOutcome<(), sqlx::Error> = RetryOutcome::Exhausted {
            attempts: 2,
            error: sqlx::Error::PoolTimedOut,
        };
        match classify("Int.Poruchenij", outcome) {
            Err(IntegrationError::TransientTransaction { name, attempts, .. }) => {
                assert_eq!(name, "Int.Poruchenij");
                assert_eq!(attempts, 2);
            }
            other => panic!("expected transient transaction error, got {other:?}"),
        }
    }

    #[test]
    fn other_failures_become_extract_execution_error() {
        let outcome: RetryOutcome<(), sqlx::Error> = RetryOutcome::Failed(sqlx::Error::RowNotFound);
        assert!(matches!(
            classify("Int.Modeli_Filialov", outcome),
            Err(IntegrationError::ExtractExecution { .. })
        ));
        assert!(matches!(
            classify("Int.Modeli_Filialov", RetryOutcome::<u8, sqlx::Error>::Done(7)),
            Ok(7)
        ));
    }

    #[test]
    fn request_debug_shows_engine() {
        let source = SourceConnection::ClickHouse(clickhouse::Client::default());
        let request = ExtractRequest {
            name: "Int.Sales_Time",
            source: &source,
            watermark_column: Some("Month"),
        };
        assert!(format!("{request:?}").contains("ClickHouse"));
    }
}
