// crates/branchflow-core/src/error.rs

use thiserror::Error;

/// Failure of a source query, whichever engine ran it.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Postgres(#[from] sqlx::Error),

    #[error(transparent)]
    ClickHouse(#[from] clickhouse::error::Error),
}

#[derive(Error, Debug)]
pub enum IntegrationError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Could not connect to the {system} database: {source}")]
    Connection {
        system: String,
        #[source]
        source: QueryError,
    },

    #[error("SQL template '{name}' is invalid: {reason}")]
    Template { name: String, reason: String },

    #[error("Extract '{name}' hit an aborted transaction {attempts} time(s): {source}")]
    TransientTransaction {
        name: String,
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    #[error("Extract '{name}' failed: {source}")]
    ExtractExecution {
        name: String,
        #[source]
        source: QueryError,
    },

    #[error("Watermark lookup on '{table}'.'{column}' failed: {source}")]
    Watermark {
        table: String,
        column: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Write to '{table}' failed: {source}")]
    StoreWrite {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Column '{column}' has unsupported type {type_name}")]
    UnsupportedColumnType { column: String, type_name: String },

    #[error("Result decoding failed: {0}")]
    Decode(String),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntegrationError {
    pub(crate) fn template(name: &str, reason: impl Into<String>) -> Self {
        Self::Template {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IntegrationError>;
